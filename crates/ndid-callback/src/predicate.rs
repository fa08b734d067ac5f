//! Declarative callback predicates.
//!
//! A predicate names the channel it listens on, the callback kind, and the
//! fields the callback must carry. The request it refers to is one of:
//!
//! - any request,
//! - a concrete [`RequestId`],
//! - a [`SlotId`] whose request id is not known yet.
//!
//! Slot predicates evaluate to [`Verdict::AwaitingBinding`] for envelopes
//! that match on everything else while the slot is unbound; the registry
//! parks those envelopes and replays them once the slot is bound.

use std::fmt;

use ndid_core::{NodeId, ReferenceId, RequestId, ServiceId};

use crate::envelope::{CallbackEnvelope, CallbackKind, OpaqueCallback, Status};

/// Handle to a request whose id is learned later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub(crate) usize);

impl SlotId {
    /// Position in the owning registry.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Which request a predicate refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKey {
    Any,
    Known(RequestId),
    Slot(SlotId),
}

impl From<RequestId> for RequestKey {
    fn from(id: RequestId) -> Self {
        Self::Known(id)
    }
}

impl From<SlotId> for RequestKey {
    fn from(slot: SlotId) -> Self {
        Self::Slot(slot)
    }
}

/// Outcome of evaluating a predicate against an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Match,
    NoMatch,
    /// Everything matches except the request, whose slot is still unbound.
    AwaitingBinding,
}

/// Filter selecting one callback.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub node_id: NodeId,
    pub kind: CallbackKind,
    pub request: RequestKey,
    pub reference_id: Option<ReferenceId>,
    pub destination_node_id: Option<NodeId>,
    pub service_id: Option<ServiceId>,
    pub status: Option<Status>,
    pub closed: Option<bool>,
}

impl Predicate {
    /// Match `kind` callbacks emitted by `node_id`, for any request.
    pub fn on(node_id: NodeId, kind: CallbackKind) -> Self {
        Self {
            node_id,
            kind,
            request: RequestKey::Any,
            reference_id: None,
            destination_node_id: None,
            service_id: None,
            status: None,
            closed: None,
        }
    }

    pub fn request(mut self, request: impl Into<RequestKey>) -> Self {
        self.request = request.into();
        self
    }

    pub fn reference(mut self, reference_id: ReferenceId) -> Self {
        self.reference_id = Some(reference_id);
        self
    }

    pub fn destination(mut self, node_id: NodeId) -> Self {
        self.destination_node_id = Some(node_id);
        self
    }

    pub fn service(mut self, service_id: ServiceId) -> Self {
        self.service_id = Some(service_id);
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn closed(mut self, closed: bool) -> Self {
        self.closed = Some(closed);
        self
    }

    /// Evaluate against `envelope`. `binding` resolves slot handles.
    pub fn evaluate<'a>(
        &self,
        envelope: &CallbackEnvelope,
        binding: impl Fn(SlotId) -> Option<&'a RequestId>,
    ) -> Verdict {
        if !self.matches_fields(envelope) {
            return Verdict::NoMatch;
        }
        match &self.request {
            RequestKey::Any => Verdict::Match,
            RequestKey::Known(id) => verdict(envelope.request_id() == Some(id)),
            RequestKey::Slot(slot) => match (binding(*slot), envelope.request_id()) {
                (Some(bound), Some(seen)) => verdict(bound == seen),
                (None, Some(_)) => Verdict::AwaitingBinding,
                (_, None) => Verdict::NoMatch,
            },
        }
    }

    fn matches_fields(&self, envelope: &CallbackEnvelope) -> bool {
        if envelope.node_id != self.node_id {
            return false;
        }
        if let Some((kind, opaque)) = envelope.malformed() {
            return kind == self.kind && self.matches_raw(opaque);
        }
        if envelope.kind() != Some(self.kind) {
            return false;
        }
        if let Some(want) = &self.reference_id {
            if envelope.reference_id() != Some(want) {
                return false;
            }
        }
        if let Some(want) = &self.destination_node_id {
            if envelope.destination_node_id() != Some(want) {
                return false;
            }
        }
        if let Some(want) = &self.service_id {
            if envelope.service_id() != Some(want) {
                return false;
            }
        }
        if self.status.is_some() || self.closed.is_some() {
            let Some(snapshot) = envelope.as_request_status() else {
                return false;
            };
            if self.status.is_some_and(|s| s != snapshot.status) {
                return false;
            }
            if self.closed.is_some_and(|c| c != snapshot.closed) {
                return false;
            }
        }
        true
    }
}

impl Predicate {
    /// Key fields of a body of this kind that failed to decode.
    ///
    /// Status filters are not applied: the expectation takes the body so
    /// the awaiting step can report why it is malformed.
    fn matches_raw(&self, opaque: &OpaqueCallback) -> bool {
        let agrees = |want: Option<&str>, field: &str| {
            want.map_or(true, |w| opaque.field(field) == Some(w))
        };
        agrees(self.reference_id.as_ref().map(ReferenceId::as_str), "reference_id")
            && agrees(
                self.destination_node_id.as_ref().map(NodeId::as_str),
                "destination_node_id",
            )
            && agrees(self.service_id.as_ref().map(ServiceId::as_str), "service_id")
    }
}

fn verdict(matched: bool) -> Verdict {
    if matched {
        Verdict::Match
    } else {
        Verdict::NoMatch
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.kind, self.node_id)?;
        match &self.request {
            RequestKey::Any => {}
            RequestKey::Known(id) => write!(f, " request={id}")?,
            RequestKey::Slot(slot) => write!(f, " request=<slot #{}>", slot.0)?,
        }
        if let Some(r) = &self.reference_id {
            write!(f, " reference={r}")?;
        }
        if let Some(d) = &self.destination_node_id {
            write!(f, " destination={d}")?;
        }
        if let Some(s) = &self.service_id {
            write!(f, " service={s}")?;
        }
        if let Some(s) = &self.status {
            write!(f, " status={s}")?;
        }
        if let Some(c) = &self.closed {
            write!(f, " closed={c}")?;
        }
        Ok(())
    }
}
