//! # Correlation Registry
//!
//! One registry per scenario. It subscribes to the node channels the
//! scenario involves, holds the outstanding expectations, and routes every
//! arriving envelope to the first unresolved expectation (in registration
//! order) whose predicate matches.
//!
//! ## Request slots
//!
//! A request's id is unknown until `createRequest` answers, yet its effects
//! must be subscribed to before the call. A [`SlotId`] stands in for the id:
//!
//! 1. `request_slot()` allocates the slot; expectations refer to it.
//! 2. `expect_binding()` registers a `create_request_result` expectation
//!    keyed on the reference id; when it fires, the slot is bound to the
//!    callback's request id.
//! 3. `arm()` seals registration and yields the [`ArmedSlot`] token the
//!    trigger needs. `bind()` (from the API response) also requires it.
//!
//! Envelopes that match a slot predicate on everything but the request
//! while the slot is unbound are parked and replayed on binding. Binding
//! twice to different ids is an error, as is a slot bound before it was
//! armed (the trigger ran ahead of its subscriptions).
//!
//! Envelopes no expectation claims are kept in the unmatched log and
//! reported when the registry is dropped. Dropping the registry also drops
//! its subscriptions, which abandons any futures still pending.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

use ndid_core::{NodeId, RequestId};

use crate::channel::{CallbackHub, CallbackSink, Subscription};
use crate::deferred::{deferred, Deferred, Resolver};
use crate::envelope::{CallbackEnvelope, CallbackKind, RequestStatus};
use crate::error::RegistryError;
use crate::predicate::{Predicate, RequestKey, SlotId, Verdict};

/// Future resolving to the first envelope matching one expectation.
pub type PendingCallback = Deferred<CallbackEnvelope>;

/// Proof that a slot's expectations are registered. Required to trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedSlot {
    slot: SlotId,
}

impl ArmedSlot {
    pub fn slot(&self) -> SlotId {
        self.slot
    }
}

/// State of outstanding work when a registry is torn down.
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    /// Descriptions of expectations that never resolved.
    pub pending: Vec<String>,
    /// Envelopes nothing claimed.
    pub unmatched: Vec<CallbackEnvelope>,
    /// Envelopes still parked on an unbound slot.
    pub parked: Vec<CallbackEnvelope>,
    /// Binding violations detected while dispatching.
    pub violations: Vec<RegistryError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.pending.is_empty()
            && self.unmatched.is_empty()
            && self.parked.is_empty()
            && self.violations.is_empty()
    }
}

struct Matcher {
    predicate: Predicate,
    resolver: Resolver<CallbackEnvelope>,
    binds: Option<SlotId>,
}

struct Slot {
    label: String,
    request_id: Option<RequestId>,
    armed: bool,
}

#[derive(Default)]
struct RegistryState {
    attached: HashSet<NodeId>,
    matchers: Vec<Matcher>,
    slots: Vec<Slot>,
    parked: Vec<CallbackEnvelope>,
    unmatched: Vec<CallbackEnvelope>,
    history: Vec<CallbackEnvelope>,
    violations: Vec<RegistryError>,
}

impl RegistryState {
    fn route(&mut self, envelope: CallbackEnvelope) {
        let mut awaiting = false;
        let mut hit = None;
        {
            let slots = &self.slots;
            let binding = |s: SlotId| slots.get(s.0).and_then(|slot| slot.request_id.as_ref());
            for (i, matcher) in self.matchers.iter().enumerate() {
                // Resolved, or the waiting step gave up on it.
                if matcher.resolver.is_orphaned() {
                    continue;
                }
                match matcher.predicate.evaluate(&envelope, binding) {
                    Verdict::Match => {
                        hit = Some(i);
                        break;
                    }
                    Verdict::AwaitingBinding => awaiting = true,
                    Verdict::NoMatch => {}
                }
            }
        }

        let Some(i) = hit else {
            if awaiting {
                tracing::trace!(kind = envelope.kind_label(), node = %envelope.node_id, "parked until slot is bound");
                self.parked.push(envelope);
            } else {
                tracing::debug!(kind = envelope.kind_label(), node = %envelope.node_id, "unmatched callback");
                self.unmatched.push(envelope);
            }
            return;
        };

        let binds = self.matchers[i].binds;
        let request_id = envelope.request_id().cloned();
        tracing::trace!(expectation = %self.matchers[i].predicate, "expectation resolved");
        if self.matchers[i].resolver.resolve(envelope).is_err() {
            tracing::warn!("expectation resolved twice");
        }
        if let (Some(slot), Some(request_id)) = (binds, request_id) {
            if let Err(violation) = self.bind(slot, request_id, false) {
                tracing::error!(%violation, "slot binding from callback failed");
                self.violations.push(violation);
            }
        }
    }

    fn bind(
        &mut self,
        slot: SlotId,
        request_id: RequestId,
        require_armed: bool,
    ) -> Result<(), RegistryError> {
        let entry = self
            .slots
            .get_mut(slot.0)
            .ok_or(RegistryError::UnknownSlot(slot.0))?;
        match &entry.request_id {
            Some(existing) if *existing == request_id => return Ok(()),
            Some(existing) => {
                return Err(RegistryError::ConflictingBinding {
                    slot: entry.label.clone(),
                    existing: existing.clone(),
                    attempted: request_id,
                })
            }
            None => {}
        }
        if require_armed && !entry.armed {
            return Err(RegistryError::TriggeredBeforeArmed {
                slot: entry.label.clone(),
            });
        }
        tracing::debug!(slot = %entry.label, request_id = %request_id, "slot bound");
        entry.request_id = Some(request_id);

        for envelope in std::mem::take(&mut self.parked) {
            self.route(envelope);
        }
        Ok(())
    }

    fn register(&mut self, predicate: Predicate, binds: Option<SlotId>) -> PendingCallback {
        if self
            .unmatched
            .iter()
            .any(|e| predicate.evaluate(e, |_| None) == Verdict::Match)
        {
            tracing::warn!(expectation = %predicate, "registered after a matching callback already arrived");
        }
        let (resolver, pending) = deferred();
        self.matchers.push(Matcher {
            predicate,
            resolver,
            binds,
        });
        pending
    }

    fn check_attached(&self, predicate: &Predicate) -> Result<(), RegistryError> {
        if self.attached.contains(&predicate.node_id) {
            Ok(())
        } else {
            Err(RegistryError::NotAttached {
                node: predicate.node_id.clone(),
            })
        }
    }

    fn check_slot(&self, predicate: &Predicate) -> Result<(), RegistryError> {
        match predicate.request {
            RequestKey::Slot(slot) if slot.0 >= self.slots.len() => {
                Err(RegistryError::UnknownSlot(slot.0))
            }
            _ => Ok(()),
        }
    }

    fn pending_descriptions(&self) -> Vec<String> {
        self.matchers
            .iter()
            .filter(|m| !m.resolver.is_resolved())
            .map(|m| m.predicate.to_string())
            .collect()
    }
}

struct RegistrySink {
    state: Arc<Mutex<RegistryState>>,
}

impl CallbackSink for RegistrySink {
    fn deliver(&self, envelope: &CallbackEnvelope) {
        let mut state = self.state.lock();
        state.history.push(envelope.clone());
        state.route(envelope.clone());
    }
}

/// Per-scenario correlation state.
pub struct CorrelationRegistry {
    scenario: String,
    hub: CallbackHub,
    state: Arc<Mutex<RegistryState>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl CorrelationRegistry {
    pub fn new(hub: &CallbackHub, scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            hub: hub.clone(),
            state: Arc::new(Mutex::new(RegistryState::default())),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    /// Subscribe to `node_id`'s channel. Idempotent.
    pub fn attach(&self, node_id: &NodeId) {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions.iter().any(|s| s.node_id() == Some(node_id)) {
            return;
        }
        let sink = Arc::new(RegistrySink {
            state: self.state.clone(),
        });
        subscriptions.push(self.hub.subscribe(node_id, sink));
        self.state.lock().attached.insert(node_id.clone());
    }

    /// Subscribe to every channel in `node_ids`.
    pub fn attach_all<'a>(&self, node_ids: impl IntoIterator<Item = &'a NodeId>) {
        for node_id in node_ids {
            self.attach(node_id);
        }
    }

    /// Allocate a request slot.
    pub fn request_slot(&self, label: impl Into<String>) -> SlotId {
        let mut state = self.state.lock();
        state.slots.push(Slot {
            label: label.into(),
            request_id: None,
            armed: false,
        });
        SlotId(state.slots.len() - 1)
    }

    /// Register an expectation.
    pub fn expect(&self, predicate: Predicate) -> Result<PendingCallback, RegistryError> {
        let mut state = self.state.lock();
        state.check_attached(&predicate)?;
        state.check_slot(&predicate)?;
        Ok(state.register(predicate, None))
    }

    /// Register `count` identical expectations, resolved in arrival order.
    pub fn expect_series(
        &self,
        predicate: Predicate,
        count: usize,
    ) -> Result<Vec<PendingCallback>, RegistryError> {
        let mut state = self.state.lock();
        state.check_attached(&predicate)?;
        state.check_slot(&predicate)?;
        Ok((0..count)
            .map(|_| state.register(predicate.clone(), None))
            .collect())
    }

    /// Register one expectation per key.
    pub fn expect_each<K, I>(&self, items: I) -> Result<FanOut<K>, RegistryError>
    where
        K: Eq + Hash,
        I: IntoIterator<Item = (K, Predicate)>,
    {
        let mut state = self.state.lock();
        let mut fan_out = FanOut {
            pending: HashMap::new(),
        };
        for (key, predicate) in items {
            state.check_attached(&predicate)?;
            state.check_slot(&predicate)?;
            let pending = state.register(predicate, None);
            fan_out.pending.entry(key).or_default().push_back(pending);
        }
        Ok(fan_out)
    }

    /// Register the expectation that binds `slot` when it fires.
    ///
    /// `predicate` must carry the reference id the trigger will use.
    pub fn expect_binding(
        &self,
        predicate: Predicate,
        slot: SlotId,
    ) -> Result<PendingCallback, RegistryError> {
        let mut state = self.state.lock();
        state.check_attached(&predicate)?;
        let label = state
            .slots
            .get(slot.0)
            .map(|s| s.label.clone())
            .ok_or(RegistryError::UnknownSlot(slot.0))?;
        if predicate.reference_id.is_none() {
            return Err(RegistryError::BindingWithoutReference { slot: label });
        }
        let predicate = predicate.request(RequestKey::Any);
        Ok(state.register(predicate, Some(slot)))
    }

    /// Seal registration for `slot`.
    pub fn arm(&self, slot: SlotId) -> Result<ArmedSlot, RegistryError> {
        let mut state = self.state.lock();
        let entry = state
            .slots
            .get_mut(slot.0)
            .ok_or(RegistryError::UnknownSlot(slot.0))?;
        if entry.armed {
            return Err(RegistryError::AlreadyArmed {
                slot: entry.label.clone(),
            });
        }
        if entry.request_id.is_some() {
            return Err(RegistryError::TriggeredBeforeArmed {
                slot: entry.label.clone(),
            });
        }
        entry.armed = true;
        Ok(ArmedSlot { slot })
    }

    /// Bind the slot from a synchronous API response.
    ///
    /// Agrees silently with an identical binding already made by the
    /// callback path.
    pub fn bind(&self, armed: &ArmedSlot, request_id: RequestId) -> Result<(), RegistryError> {
        self.state.lock().bind(armed.slot, request_id, true)
    }

    /// Request id bound to `slot`, if any.
    pub fn request_id(&self, slot: SlotId) -> Option<RequestId> {
        self.state
            .lock()
            .slots
            .get(slot.0)
            .and_then(|s| s.request_id.clone())
    }

    /// Every envelope received on attached channels, in arrival order.
    pub fn history(&self) -> Vec<CallbackEnvelope> {
        self.state.lock().history.clone()
    }

    /// `request_status` snapshots for `request_id` emitted by `node_id`,
    /// in arrival order.
    pub fn status_history(&self, node_id: &NodeId, request_id: &RequestId) -> Vec<RequestStatus> {
        self.state
            .lock()
            .history
            .iter()
            .filter(|e| &e.node_id == node_id)
            .filter_map(CallbackEnvelope::as_request_status)
            .filter(|s| &s.request_id == request_id)
            .cloned()
            .collect()
    }

    /// Envelopes received from `node_id` that no expectation claimed.
    pub fn unmatched_on(&self, node_id: &NodeId) -> Vec<CallbackEnvelope> {
        self.state
            .lock()
            .unmatched
            .iter()
            .filter(|e| &e.node_id == node_id)
            .cloned()
            .collect()
    }

    /// Unclaimed envelopes for `request_id` that must not be left over:
    /// delivery confirmations beyond the expected fan-out, and bodies of a
    /// known kind that failed to decode.
    pub fn leftovers(&self, request_id: &RequestId) -> Vec<CallbackEnvelope> {
        self.state
            .lock()
            .unmatched
            .iter()
            .filter(|e| e.request_id() == Some(request_id))
            .filter(|e| {
                e.kind() == Some(CallbackKind::MessageQueueSendSuccess) || e.malformed().is_some()
            })
            .cloned()
            .collect()
    }

    /// Binding violations detected while dispatching.
    pub fn violations(&self) -> Vec<RegistryError> {
        self.state.lock().violations.clone()
    }

    /// Descriptions of unresolved expectations.
    pub fn pending(&self) -> Vec<String> {
        self.state.lock().pending_descriptions()
    }

    /// Snapshot of outstanding work.
    pub fn teardown_report(&self) -> TeardownReport {
        let state = self.state.lock();
        TeardownReport {
            pending: state.pending_descriptions(),
            unmatched: state.unmatched.clone(),
            parked: state.parked.clone(),
            violations: state.violations.clone(),
        }
    }
}

impl Drop for CorrelationRegistry {
    fn drop(&mut self) {
        let report = self.teardown_report();
        if !report.unmatched.is_empty() {
            let kinds: Vec<String> = report
                .unmatched
                .iter()
                .map(|e| format!("{}@{}", e.kind_label(), e.node_id))
                .collect();
            tracing::warn!(
                scenario = %self.scenario,
                count = report.unmatched.len(),
                callbacks = ?kinds,
                "unmatched callbacks at teardown"
            );
        }
        if !report.pending.is_empty() {
            tracing::debug!(
                scenario = %self.scenario,
                pending = ?report.pending,
                "abandoning unresolved expectations"
            );
        }
        self.subscriptions.lock().clear();
    }
}

impl std::fmt::Debug for CorrelationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CorrelationRegistry")
            .field("scenario", &self.scenario)
            .field("attached", &state.attached.len())
            .field("expectations", &state.matchers.len())
            .field("received", &state.history.len())
            .finish()
    }
}

/// Expectations grouped by key, taken in registration order.
pub struct FanOut<K> {
    pending: HashMap<K, VecDeque<PendingCallback>>,
}

impl<K: Eq + Hash> FanOut<K> {
    /// Next future registered under `key`.
    pub fn take(&mut self, key: &K) -> Option<PendingCallback> {
        let queue = self.pending.get_mut(key)?;
        let next = queue.pop_front();
        if queue.is_empty() {
            self.pending.remove(key);
        }
        next
    }

    /// Futures not yet taken.
    pub fn len(&self) -> usize {
        self.pending.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
