//! Outcome of a successful scenario run.

use chrono::{DateTime, Utc};
use serde::Serialize;

use ndid_callback::Status;
use ndid_core::{Mode, NodeId, RequestId};
use ndid_lifecycle::{Answer, TransitionRecord};

/// One verified callback.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: String,
    pub kind: String,
    pub node_id: NodeId,
    pub at: DateTime<Utc>,
}

/// How one IdP answered.
#[derive(Debug, Clone, Serialize)]
pub struct IdpAnswerRecord {
    pub idp_id: NodeId,
    pub answer: Answer,
    /// Invalid attempts the node correctly refused.
    pub refused_attempts: usize,
}

/// Confirmed message deliveries from one node.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryRecord {
    pub source: NodeId,
    pub destinations: Vec<NodeId>,
}

/// Everything verified during a run.
#[derive(Debug, Clone, Serialize)]
pub struct FlowReport {
    pub scenario: String,
    pub request_id: RequestId,
    pub mode: Mode,
    pub final_status: Status,
    pub closed: bool,
    pub timed_out: bool,
    /// Distinct statuses in order.
    pub status_path: Vec<Status>,
    pub transitions: Vec<TransitionRecord>,
    pub steps: Vec<StepRecord>,
    pub idp_answers: Vec<IdpAnswerRecord>,
    pub deliveries: Vec<DeliveryRecord>,
    /// Body of the RP's data fetch, when data was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Callbacks nothing was waiting for.
    pub unmatched_callbacks: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl FlowReport {
    /// Number of `request_status` snapshots verified.
    pub fn status_events(&self) -> usize {
        self.transitions.len()
    }
}

impl std::fmt::Display for FlowReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path: Vec<&str> = self.status_path.iter().map(Status::as_str).collect();
        let end = match (self.closed, self.timed_out) {
            (_, true) => "timed out",
            (true, false) => "closed",
            (false, false) => "open",
        };
        writeln!(
            f,
            "{}: request {} ({}) {} {} after {} status events",
            self.scenario,
            self.request_id,
            self.mode,
            self.final_status,
            end,
            self.status_events()
        )?;
        writeln!(f, "  path: {}", path.join(" -> "))?;
        for answer in &self.idp_answers {
            writeln!(
                f,
                "  {}: {:?} ({} refused attempts)",
                answer.idp_id, answer.answer, answer.refused_attempts
            )?;
        }
        for delivery in &self.deliveries {
            let destinations: Vec<&str> = delivery.destinations.iter().map(NodeId::as_str).collect();
            writeln!(f, "  {} delivered to {}", delivery.source, destinations.join(", "))?;
        }
        if self.unmatched_callbacks > 0 {
            writeln!(f, "  {} unmatched callbacks", self.unmatched_callbacks)?;
        }
        Ok(())
    }
}
