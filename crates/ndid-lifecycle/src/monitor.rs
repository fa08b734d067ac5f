//! # Lifecycle Monitor
//!
//! Consumes every `request_status` snapshot for one request, in arrival
//! order, and rejects the first one that breaks a sequence rule:
//!
//! - the status transition must be legal ([`crate::transition`]);
//! - the answered count and per-service counters never decrease;
//! - block heights stay on one chain and never go backwards, and advance
//!   strictly whenever the status or a counted field changes;
//! - nothing follows a `closed` or `timed_out` snapshot;
//! - a `closed` snapshot repeats the payload of the snapshot before it.
//!
//! Accepted snapshots are appended to a transition log.

use chrono::{DateTime, Utc};
use serde::Serialize;

use ndid_callback::{RequestStatus, Status};
use ndid_core::{BlockHeight, RequestId};

use crate::error::LifecycleError;
use crate::transition::is_legal;

/// One accepted snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionRecord {
    /// Status before this snapshot; `None` for the first.
    pub from: Option<Status>,
    pub to: Status,
    pub block_height: BlockHeight,
    pub answered: u32,
    pub closed: bool,
    pub timed_out: bool,
    /// When the harness processed the snapshot.
    pub observed_at: DateTime<Utc>,
}

/// Sequence checker for one request.
#[derive(Debug)]
pub struct LifecycleMonitor {
    request_id: RequestId,
    last: Option<RequestStatus>,
    terminal_at: Option<BlockHeight>,
    log: Vec<TransitionRecord>,
}

impl LifecycleMonitor {
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            last: None,
            terminal_at: None,
            log: Vec::new(),
        }
    }

    /// Check every snapshot and require a terminal one at the end.
    pub fn verify<'a>(
        request_id: RequestId,
        snapshots: impl IntoIterator<Item = &'a RequestStatus>,
    ) -> Result<Self, LifecycleError> {
        let mut monitor = Self::new(request_id);
        for snapshot in snapshots {
            monitor.observe(snapshot)?;
        }
        monitor.finish()?;
        Ok(monitor)
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Feed the next snapshot.
    pub fn observe(&mut self, snapshot: &RequestStatus) -> Result<(), LifecycleError> {
        if snapshot.request_id != self.request_id {
            return Err(LifecycleError::WrongRequest {
                expected: self.request_id.clone(),
                actual: snapshot.request_id.clone(),
            });
        }
        if let Some(terminal_height) = &self.terminal_at {
            return Err(LifecycleError::EventAfterTerminal {
                request_id: self.request_id.clone(),
                terminal_height: terminal_height.clone(),
                event_height: snapshot.block_height.clone(),
            });
        }
        if let Some(previous) = &self.last {
            self.check_step(previous, snapshot)?;
        }

        tracing::debug!(
            request_id = %self.request_id,
            status = %snapshot.status,
            answered = snapshot.answered_count(),
            closed = snapshot.closed,
            timed_out = snapshot.timed_out,
            block_height = %snapshot.block_height,
            "request status accepted"
        );
        self.log.push(TransitionRecord {
            from: self.last.as_ref().map(|s| s.status),
            to: snapshot.status,
            block_height: snapshot.block_height.clone(),
            answered: snapshot.answered_count(),
            closed: snapshot.closed,
            timed_out: snapshot.timed_out,
            observed_at: Utc::now(),
        });
        if snapshot.is_terminal() {
            self.terminal_at = Some(snapshot.block_height.clone());
        }
        self.last = Some(snapshot.clone());
        Ok(())
    }

    fn check_step(
        &self,
        previous: &RequestStatus,
        current: &RequestStatus,
    ) -> Result<(), LifecycleError> {
        let request_id = || self.request_id.clone();

        if !is_legal(previous.status, current.status) {
            return Err(LifecycleError::IllegalTransition {
                request_id: request_id(),
                from: previous.status,
                to: current.status,
                block_height: current.block_height.clone(),
            });
        }

        if current.answered_count() < previous.answered_count() {
            return Err(LifecycleError::AnsweredCountDecreased {
                request_id: request_id(),
                previous: previous.answered_count(),
                current: current.answered_count(),
            });
        }
        for before in &previous.service_list {
            let Some(after) = current.service(&before.service_id) else {
                continue;
            };
            for (counter, was, now) in [
                ("signed_data_count", before.signed_data_count, after.signed_data_count),
                ("received_data_count", before.received_data_count, after.received_data_count),
            ] {
                if now < was {
                    return Err(LifecycleError::ServiceCounterDecreased {
                        request_id: request_id(),
                        service_id: before.service_id.clone(),
                        counter,
                        previous: was,
                        current: now,
                    });
                }
            }
        }

        let (was, now) = (&previous.block_height, &current.block_height);
        match was.compare(now) {
            None => {
                return Err(LifecycleError::ChainChanged {
                    request_id: request_id(),
                    previous: was.chain_id().to_string(),
                    current: now.chain_id().to_string(),
                })
            }
            Some(std::cmp::Ordering::Greater) => {
                return Err(LifecycleError::BlockHeightRegressed {
                    request_id: request_id(),
                    previous: was.clone(),
                    current: now.clone(),
                })
            }
            Some(std::cmp::Ordering::Equal) if current.counted_fields_differ(previous) => {
                return Err(LifecycleError::BlockHeightNotAdvanced {
                    request_id: request_id(),
                    height: now.clone(),
                })
            }
            Some(_) => {}
        }

        if current.closed {
            if let Some(field) = closed_payload_difference(previous, current) {
                return Err(LifecycleError::ClosedSnapshotDiffers {
                    request_id: request_id(),
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Require that the last snapshot was terminal.
    pub fn finish(&self) -> Result<&RequestStatus, LifecycleError> {
        let last = self.last.as_ref().ok_or_else(|| LifecycleError::NoSnapshots {
            request_id: self.request_id.clone(),
        })?;
        if !last.is_terminal() {
            return Err(LifecycleError::NotTerminated {
                request_id: self.request_id.clone(),
                last: last.status,
            });
        }
        Ok(last)
    }

    /// Latest accepted snapshot.
    pub fn current(&self) -> Option<&RequestStatus> {
        self.last.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal_at.is_some()
    }

    pub fn transition_log(&self) -> &[TransitionRecord] {
        &self.log
    }

    /// Distinct statuses in the order they were first seen.
    pub fn status_path(&self) -> Vec<Status> {
        let mut path: Vec<Status> = Vec::new();
        for record in &self.log {
            if path.last() != Some(&record.to) {
                path.push(record.to);
            }
        }
        path
    }
}

fn closed_payload_difference(previous: &RequestStatus, current: &RequestStatus) -> Option<&'static str> {
    if previous.status != current.status {
        return Some("status");
    }
    if previous.answered_count() != current.answered_count() {
        return Some("answered_idp_count");
    }
    if previous.validity() != current.validity() {
        return Some("response_valid_list");
    }
    if previous.service_list != current.service_list {
        return Some("service_list");
    }
    None
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn status_strategy() -> impl Strategy<Value = Status> {
        prop_oneof![
            Just(Status::Pending),
            Just(Status::Confirmed),
            Just(Status::Rejected),
            Just(Status::Complicated),
            Just(Status::Completed),
        ]
    }

    fn snapshot(status: Status, answered: u32, height: u64) -> RequestStatus {
        RequestStatus {
            request_id: RequestId::new("r").unwrap(),
            status,
            mode: None,
            min_idp: None,
            answered_idp_count: Some(answered),
            response_list: None,
            response_valid_list: Vec::new(),
            service_list: Vec::new(),
            closed: false,
            timed_out: false,
            block_height: BlockHeight::new("c", height),
        }
    }

    proptest! {
        /// Whatever sequence is accepted, its answered counts and block
        /// heights are monotonic and every step is a legal transition.
        #[test]
        fn accepted_sequences_are_monotonic(
            steps in prop::collection::vec((status_strategy(), 0u32..4, 0u64..6), 1..12)
        ) {
            let mut monitor = LifecycleMonitor::new(RequestId::new("r").unwrap());
            let mut accepted: Vec<RequestStatus> = Vec::new();
            for (status, answered, height) in steps {
                let s = snapshot(status, answered, height);
                if monitor.observe(&s).is_ok() {
                    accepted.push(s);
                }
            }
            for pair in accepted.windows(2) {
                prop_assert!(pair[1].answered_count() >= pair[0].answered_count());
                prop_assert!(pair[1].block_height.height() >= pair[0].block_height.height());
                prop_assert!(crate::transition::is_legal(pair[0].status, pair[1].status));
            }
            prop_assert_eq!(monitor.transition_log().len(), accepted.len());
        }
    }
}
