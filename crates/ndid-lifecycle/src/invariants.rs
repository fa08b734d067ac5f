//! Per-status invariants.
//!
//! Given how the IdPs have answered so far ([`Tally`]), every status
//! constrains the counted fields of a snapshot. These checks are
//! independent of any expected payload and run on every snapshot the
//! orchestrator captures.
//!
//! Error answers are counted in `answered_idp_count` and in the validity
//! list, but they are neither accepts nor rejects.

use serde::Serialize;

use ndid_callback::{RequestStatus, Status};

use crate::error::ConformanceError;

/// How one IdP answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Answer {
    Accept,
    Reject,
    Error,
}

/// Running count of IdP answers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub accepted: u32,
    pub rejected: u32,
    pub errored: u32,
}

impl Tally {
    pub fn record(&mut self, answer: Answer) {
        match answer {
            Answer::Accept => self.accepted += 1,
            Answer::Reject => self.rejected += 1,
            Answer::Error => self.errored += 1,
        }
    }

    /// Total answers, errors included.
    pub fn answered(&self) -> u32 {
        self.accepted + self.rejected + self.errored
    }

    /// Status a node must report for this tally, before any data phase.
    pub fn derived_status(&self, min_idp: u32) -> Status {
        match (self.accepted, self.rejected) {
            (0, 0) => Status::Pending,
            (_, 0) if self.accepted >= min_idp => Status::Completed,
            (_, 0) => Status::Confirmed,
            (0, _) => Status::Rejected,
            _ => Status::Complicated,
        }
    }
}

/// Check the counted fields of `snapshot` against `tally`.
pub fn check_invariants(
    snapshot: &RequestStatus,
    min_idp: u32,
    tally: &Tally,
) -> Result<(), ConformanceError> {
    let context = format!(
        "{} snapshot for {} at {}",
        snapshot.status, snapshot.request_id, snapshot.block_height
    );
    let fail = |field: &str, expected: String, actual: String| {
        Err(ConformanceError::new(context.clone(), field, expected, actual))
    };

    let answered = snapshot.answered_count();
    if answered != tally.answered() {
        return fail("answered_idp_count", tally.answered().to_string(), answered.to_string());
    }
    let listed = snapshot.validity().len();
    if listed != answered as usize {
        return fail("response_valid_list.len", answered.to_string(), listed.to_string());
    }

    for service in &snapshot.service_list {
        let field = |name: &str| format!("service_list[{}].{name}", service.service_id);
        if service.signed_data_count > service.min_as {
            return fail(
                &field("signed_data_count"),
                format!("<= {}", service.min_as),
                service.signed_data_count.to_string(),
            );
        }
        if service.received_data_count > service.signed_data_count {
            return fail(
                &field("received_data_count"),
                format!("<= {}", service.signed_data_count),
                service.received_data_count.to_string(),
            );
        }
    }

    match snapshot.status {
        Status::Pending => {
            if tally.accepted + tally.rejected != 0 {
                return fail("status", tally.derived_status(min_idp).to_string(), "pending".into());
            }
            if let Some(service) = snapshot
                .service_list
                .iter()
                .find(|s| s.signed_data_count != 0 || s.received_data_count != 0)
            {
                return fail(
                    &format!("service_list[{}]", service.service_id),
                    "no data while pending".into(),
                    format!(
                        "signed {} received {}",
                        service.signed_data_count, service.received_data_count
                    ),
                );
            }
        }
        Status::Confirmed => {
            if tally.accepted == 0 || tally.rejected != 0 {
                return fail("status", tally.derived_status(min_idp).to_string(), "confirmed".into());
            }
        }
        Status::Rejected => {
            if tally.rejected == 0 || tally.accepted != 0 {
                return fail("status", tally.derived_status(min_idp).to_string(), "rejected".into());
            }
        }
        Status::Complicated => {
            if tally.accepted == 0 || tally.rejected == 0 {
                return fail("status", tally.derived_status(min_idp).to_string(), "complicated".into());
            }
        }
        Status::Completed => {
            if tally.accepted < min_idp || tally.rejected != 0 {
                return fail("status", tally.derived_status(min_idp).to_string(), "completed".into());
            }
            if let Some(service) = snapshot.service_list.iter().find(|s| {
                s.signed_data_count != s.min_as || s.received_data_count != s.min_as
            }) {
                return fail(
                    &format!("service_list[{}]", service.service_id),
                    format!("signed == received == {}", service.min_as),
                    format!(
                        "signed {} received {}",
                        service.signed_data_count, service.received_data_count
                    ),
                );
            }
        }
    }
    Ok(())
}
