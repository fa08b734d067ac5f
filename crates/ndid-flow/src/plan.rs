//! Expected checkpoints.
//!
//! From a scenario and its resolved topology, the plan lists every
//! `request_status` snapshot the RP must emit, in order, with the payload
//! each one must carry. The orchestrator registers one expectation per
//! checkpoint before triggering, then checks them as they arrive.

use ndid_callback::{IdpValidity, ServiceProgress, Status};
use ndid_core::{Mode, NodeId, RequestId, ServiceId};
use ndid_lifecycle::{service_progress, validity_for, Answer, ExpectedStatus, Tally};

use crate::scenario::{AnswerOrder, Finish, IdpOutcome, Scenario, ServiceAnswer};

/// Nodes a request is addressed to.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Topology {
    /// IdPs the RP sends the request to.
    pub idps: Vec<NodeId>,
    /// AS nodes addressed per service line item, in line-item order.
    pub services: Vec<(ServiceId, Vec<NodeId>)>,
}

impl Topology {
    /// Destinations of the RP's data requests: one per AS per service line
    /// item, so an AS serving two services is listed twice.
    pub fn data_request_destinations(&self) -> Vec<NodeId> {
        self.services
            .iter()
            .flat_map(|(_, nodes)| nodes.iter().cloned())
            .collect()
    }
}

/// One expected `request_status` snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// Step name used in reports and errors.
    pub step: String,
    pub status: Status,
    /// IdP answers the snapshot reflects.
    pub tally: Tally,
    pub validity: Vec<IdpValidity>,
    /// `false` for snapshots whose content depends on arrival order
    /// (concurrent answers); only counts and invariants are checked.
    pub exact: bool,
    pub any_order: bool,
    pub services: Vec<ServiceProgress>,
    pub closed: bool,
    pub timed_out: bool,
}

impl Checkpoint {
    /// The full payload this checkpoint requires.
    pub fn expected(&self, request_id: &RequestId, mode: Mode, min_idp: u32) -> ExpectedStatus {
        let expected = ExpectedStatus::new(request_id.clone(), self.status)
            .mode(mode)
            .min_idp(min_idp)
            .validity(self.validity.clone())
            .services(self.services.clone())
            .closed(self.closed)
            .timed_out(self.timed_out);
        if self.any_order {
            expected.any_order()
        } else {
            expected
        }
    }

    fn next(&self, step: String) -> Self {
        Self {
            step,
            exact: true,
            ..self.clone()
        }
    }
}

/// One AS answer in the data phase.
#[derive(Debug, Clone, PartialEq)]
pub struct DataStep {
    pub as_node: NodeId,
    pub service_id: ServiceId,
    pub answer: ServiceAnswer,
    /// Snapshot after the AS signs; `None` for error answers.
    pub signed: Option<Checkpoint>,
    /// Snapshot after the RP receives the data.
    pub received: Option<Checkpoint>,
}

/// How a scenario's request ends, computed without any node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Projection {
    /// Every declared IdP answer.
    pub tally: Tally,
    /// AS nodes are asked for data.
    pub data_phase: bool,
    /// The request is terminal once all declared answers are in, so the
    /// node closes it on its own.
    pub terminal: bool,
}

/// Project the end state of `scenario`.
pub fn project(scenario: &Scenario) -> Projection {
    let min_idp = scenario.request.min_idp;
    let mut tally = Tally::default();
    for idp in &scenario.idps {
        tally.record(answer_of(idp.outcome));
    }
    let data_phase = scenario.requests_data()
        && tally.rejected == 0
        && tally.errored == 0
        && tally.accepted >= min_idp;
    let data_complete = scenario.request.data_request_list.iter().all(|item| {
        let delivered = scenario
            .responders(&item.service_id)
            .iter()
            .filter(|(_, answer)| matches!(answer, ServiceAnswer::Data(_)))
            .count();
        delivered == item.min_as as usize
    });
    let terminal = match tally.derived_status(min_idp) {
        Status::Completed => !data_phase || data_complete,
        Status::Rejected | Status::Complicated => tally.answered() >= min_idp,
        Status::Pending | Status::Confirmed => false,
    };
    Projection {
        tally,
        data_phase,
        terminal,
    }
}

pub fn answer_of(outcome: IdpOutcome) -> Answer {
    match outcome {
        IdpOutcome::Accept => Answer::Accept,
        IdpOutcome::Reject => Answer::Reject,
        IdpOutcome::Error(_) => Answer::Error,
    }
}

/// Validity entry for one answer.
pub fn validity_entry(idp_id: &NodeId, outcome: IdpOutcome, mode: Mode) -> IdpValidity {
    match outcome {
        IdpOutcome::Error(_) => IdpValidity {
            idp_id: idp_id.clone(),
            valid_signature: None,
            valid_ial: None,
        },
        IdpOutcome::Accept | IdpOutcome::Reject => validity_for(idp_id.clone(), mode, true),
    }
}

/// Every snapshot a scenario must produce, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowPlan {
    pub topology: Topology,
    pub projection: Projection,
    pub pending: Checkpoint,
    /// One per IdP answer, in declared order.
    pub answers: Vec<Checkpoint>,
    pub data: Vec<DataStep>,
    /// The `closed` or `timed_out` snapshot.
    pub last: Checkpoint,
}

impl FlowPlan {
    pub fn build(scenario: &Scenario, topology: Topology) -> Self {
        let request = &scenario.request;
        let mode = request.mode;
        let projection = project(scenario);

        let services: Vec<ServiceProgress> = request
            .data_request_list
            .iter()
            .map(|item| service_progress(item.service_id.clone(), item.min_as, 0, 0))
            .collect();
        let pending = Checkpoint {
            step: "pending".into(),
            status: Status::Pending,
            tally: Tally::default(),
            validity: Vec::new(),
            exact: true,
            any_order: false,
            services,
            closed: false,
            timed_out: false,
        };

        let concurrent = scenario.answer_order == AnswerOrder::Concurrent;
        let mut answers = Vec::with_capacity(scenario.idps.len());
        let mut current = pending.clone();
        for (i, idp) in scenario.idps.iter().enumerate() {
            let mut next = current.next(format!("status after {} answered", idp.node_id));
            next.tally.record(answer_of(idp.outcome));
            next.validity
                .push(validity_entry(&idp.node_id, idp.outcome, mode));
            next.status = answer_status(&next.tally, request.min_idp, projection.data_phase);
            if concurrent {
                next.exact = i + 1 == scenario.idps.len();
                next.any_order = true;
            }
            answers.push(next.clone());
            current = next;
        }

        let mut data = Vec::new();
        if projection.data_phase {
            for as_participant in &scenario.as_nodes {
                for response in &as_participant.services {
                    let (signed, received) = match &response.answer {
                        ServiceAnswer::Error(_) => (None, None),
                        ServiceAnswer::Data(_) => {
                            let mut signed = current.next(format!(
                                "{} signed {}",
                                as_participant.node_id, response.service_id
                            ));
                            bump(&mut signed.services, &response.service_id, |s| {
                                s.signed_data_count += 1
                            });
                            signed.status = Status::Confirmed;

                            let mut received = signed.next(format!(
                                "rp received {} from {}",
                                response.service_id, as_participant.node_id
                            ));
                            bump(&mut received.services, &response.service_id, |s| {
                                s.received_data_count += 1
                            });
                            received.status = if data_done(&received.services) {
                                Status::Completed
                            } else {
                                Status::Confirmed
                            };
                            current = received.clone();
                            (Some(signed), Some(received))
                        }
                    };
                    data.push(DataStep {
                        as_node: as_participant.node_id.clone(),
                        service_id: response.service_id.clone(),
                        answer: response.answer.clone(),
                        signed,
                        received,
                    });
                }
            }
        }

        let mut last = current.next(match scenario.finish {
            Finish::Auto => "closed".to_string(),
            Finish::Close => "closed by rp".to_string(),
            Finish::Timeout => "timed out".to_string(),
        });
        match scenario.finish {
            Finish::Auto | Finish::Close => last.closed = true,
            Finish::Timeout => last.timed_out = true,
        }
        Self {
            topology,
            projection,
            pending,
            answers,
            data,
            last,
        }
    }

    /// Number of `request_status` snapshots expected.
    pub fn status_count(&self) -> usize {
        let data = self
            .data
            .iter()
            .filter(|step| step.signed.is_some())
            .count();
        2 + self.answers.len() + 2 * data
    }

    /// All checkpoints in arrival order.
    pub fn checkpoints(&self) -> Vec<&Checkpoint> {
        let mut out = vec![&self.pending];
        out.extend(self.answers.iter());
        for step in &self.data {
            out.extend(step.signed.iter());
            out.extend(step.received.iter());
        }
        out.push(&self.last);
        out
    }
}

fn answer_status(tally: &Tally, min_idp: u32, data_phase: bool) -> Status {
    match tally.derived_status(min_idp) {
        Status::Completed if data_phase => Status::Confirmed,
        status => status,
    }
}

fn bump(services: &mut [ServiceProgress], service_id: &ServiceId, f: impl FnOnce(&mut ServiceProgress)) {
    if let Some(service) = services.iter_mut().find(|s| &s.service_id == service_id) {
        f(service);
    }
}

fn data_done(services: &[ServiceProgress]) -> bool {
    services
        .iter()
        .all(|s| s.signed_data_count == s.min_as && s.received_data_count == s.min_as)
}
