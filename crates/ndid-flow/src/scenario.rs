//! Declarative scenario description.
//!
//! A scenario names the RP, the request it creates, how each IdP answers
//! (including deliberately invalid attempts), what each AS returns, and how
//! the request is expected to end. Scenarios are loaded from YAML:
//!
//! ```yaml
//! name: mode1-single-idp-accept
//! rp: rp1
//! request:
//!   mode: 1
//!   namespace: citizen_id
//!   identifier: "1234567890123"
//!   message: Consent to share your data?
//!   min_ial: 1.1
//!   min_aal: 1
//!   min_idp: 1
//!   idp_id_list: [idp1]
//! idps:
//!   - node_id: idp1
//!     outcome: accept
//!     ial: 2.3
//!     aal: 3
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use zeroize::Zeroizing;

use ndid_core::{AccessorId, Mode, NodeId, ServiceId};

use crate::error::FlowError;

/// One end-to-end request scenario.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    /// Node that creates the request.
    pub rp: NodeId,
    pub request: RequestSpec,
    /// IdPs that answer, in declared order.
    #[serde(default)]
    pub idps: Vec<IdpParticipant>,
    #[serde(default, rename = "as")]
    pub as_nodes: Vec<AsParticipant>,
    #[serde(default)]
    pub answer_order: AnswerOrder,
    #[serde(default)]
    pub finish: Finish,
    #[serde(default)]
    pub budgets: BudgetOverrides,
    /// Remove private messages on every involved node afterwards.
    #[serde(default)]
    pub housekeeping: bool,
}

/// Parameters of the `createRequest` call.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestSpec {
    pub mode: Mode,
    pub namespace: String,
    pub identifier: String,
    #[serde(default)]
    pub reference_group_code: Option<String>,
    pub message: String,
    pub min_ial: f64,
    pub min_aal: f64,
    pub min_idp: u32,
    /// Seconds; defaults to the harness configuration.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Explicit IdP list. When empty, IdPs are looked up by identity.
    #[serde(default)]
    pub idp_id_list: Vec<NodeId>,
    #[serde(default)]
    pub data_request_list: Vec<DataRequestSpec>,
}

/// One data-request line item.
#[derive(Debug, Clone, Deserialize)]
pub struct DataRequestSpec {
    pub service_id: ServiceId,
    /// Explicit AS list. When empty, AS nodes are looked up by service.
    #[serde(default)]
    pub as_id_list: Vec<NodeId>,
    pub min_as: u32,
    #[serde(default)]
    pub request_params: String,
}

/// How an IdP finally answers.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdpOutcome {
    Accept,
    Reject,
    /// Answer with `createErrorResponse` and this error code.
    Error(i64),
}

/// An IdP taking part in the scenario.
#[derive(Debug, Clone, Deserialize)]
pub struct IdpParticipant {
    pub node_id: NodeId,
    pub outcome: IdpOutcome,
    #[serde(default = "default_ial")]
    pub ial: f64,
    #[serde(default = "default_aal")]
    pub aal: f64,
    /// Key used for the consent signature in modes 2 and 3.
    #[serde(default)]
    pub accessor: Option<AccessorBinding>,
    /// Answers that must be refused before the real one is sent.
    #[serde(default)]
    pub invalid_attempts: Vec<InvalidAttempt>,
}

fn default_ial() -> f64 {
    2.3
}

fn default_aal() -> f64 {
    3.0
}

/// Accessor and signing seed an IdP answers with.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessorBinding {
    pub accessor_id: AccessorId,
    /// Base64 Ed25519 seed.
    pub seed: AccessorSeed,
}

/// Base64 signing seed, wiped on drop and never printed.
#[derive(Clone)]
pub struct AccessorSeed(Zeroizing<String>);

impl AccessorSeed {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(Zeroizing::new(encoded.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Debug for AccessorSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessorSeed(<redacted>)")
    }
}

impl<'de> Deserialize<'de> for AccessorSeed {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// How an invalid answer is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMutation {
    /// Answer a request id that does not exist.
    UnknownRequestId,
    /// Claim an IAL below the request's `min_ial`.
    IalBelowMinimum,
    /// Claim an AAL below the request's `min_aal`.
    AalBelowMinimum,
    /// Sign something other than the request-message hash.
    WrongSignature,
    /// Omit the signature (modes 2 and 3).
    MissingSignature,
}

/// A deliberately malformed answer and the refusal it must get.
#[derive(Debug, Clone, Deserialize)]
pub struct InvalidAttempt {
    pub mutation: ResponseMutation,
    #[serde(default = "default_refusal_status")]
    pub expect_status: u16,
    pub expect_error_code: i64,
}

fn default_refusal_status() -> u16 {
    400
}

/// An AS taking part in the scenario.
#[derive(Debug, Clone, Deserialize)]
pub struct AsParticipant {
    pub node_id: NodeId,
    pub services: Vec<ServiceResponse>,
}

/// What an AS returns for one service.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceResponse {
    pub service_id: ServiceId,
    #[serde(flatten)]
    pub answer: ServiceAnswer,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceAnswer {
    Data(String),
    Error(i64),
}

/// Whether IdPs answer one at a time or back to back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOrder {
    /// Each answer's status snapshot is awaited before the next answer.
    #[default]
    Sequential,
    /// All answers are sent before any snapshot is awaited; their
    /// snapshots may arrive in any order.
    Concurrent,
}

/// How the request ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Finish {
    /// The node closes the request once it is terminal.
    #[default]
    Auto,
    /// The RP closes the request.
    Close,
    /// The request times out.
    Timeout,
}

/// Per-step budget overrides, in seconds.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BudgetOverrides {
    pub create_secs: Option<u64>,
    pub delivery_secs: Option<u64>,
    pub incoming_secs: Option<u64>,
    pub answer_secs: Option<u64>,
    pub status_secs: Option<u64>,
    pub data_secs: Option<u64>,
    pub close_secs: Option<u64>,
}

/// Wall-clock budget for each kind of step.
///
/// Defaults grow with the number of hops between trigger and callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepBudgets {
    pub create: Duration,
    pub delivery: Duration,
    pub incoming: Duration,
    pub answer: Duration,
    pub status: Duration,
    pub data: Duration,
    pub close: Duration,
}

impl Default for StepBudgets {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(10),
            delivery: Duration::from_secs(15),
            incoming: Duration::from_secs(15),
            answer: Duration::from_secs(15),
            status: Duration::from_secs(20),
            data: Duration::from_secs(30),
            close: Duration::from_secs(20),
        }
    }
}

impl StepBudgets {
    /// Apply scenario overrides, then `global` (which wins when set).
    pub fn resolve(overrides: &BudgetOverrides, global: Option<Duration>) -> Self {
        let base = Self::default();
        let pick = |own: Option<u64>, default: Duration| {
            global.unwrap_or_else(|| own.map(Duration::from_secs).unwrap_or(default))
        };
        Self {
            create: pick(overrides.create_secs, base.create),
            delivery: pick(overrides.delivery_secs, base.delivery),
            incoming: pick(overrides.incoming_secs, base.incoming),
            answer: pick(overrides.answer_secs, base.answer),
            status: pick(overrides.status_secs, base.status),
            data: pick(overrides.data_secs, base.data),
            close: pick(overrides.close_secs, base.close),
        }
    }
}

impl Scenario {
    /// Parse a YAML scenario.
    pub fn from_yaml(source: &str) -> Result<Self, FlowError> {
        serde_yaml::from_str(source)
            .map_err(|e| FlowError::HarnessUsage(format!("scenario does not parse: {e}")))
    }

    /// Read and parse a YAML scenario file.
    pub fn load(path: &Path) -> Result<Self, FlowError> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            FlowError::HarnessUsage(format!("cannot read scenario {}: {e}", path.display()))
        })?;
        Self::from_yaml(&source)
    }

    pub fn idp(&self, node_id: &NodeId) -> Option<&IdpParticipant> {
        self.idps.iter().find(|p| &p.node_id == node_id)
    }

    /// Every node the scenario names, RP first, without duplicates.
    pub fn involved_nodes(&self) -> Vec<NodeId> {
        let mut nodes = vec![self.rp.clone()];
        let named = self
            .request
            .idp_id_list
            .iter()
            .chain(self.idps.iter().map(|p| &p.node_id))
            .chain(
                self.request
                    .data_request_list
                    .iter()
                    .flat_map(|item| item.as_id_list.iter()),
            )
            .chain(self.as_nodes.iter().map(|a| &a.node_id));
        for node in named {
            if !nodes.contains(node) {
                nodes.push(node.clone());
            }
        }
        nodes
    }

    /// Whether any data is requested.
    pub fn requests_data(&self) -> bool {
        !self.request.data_request_list.is_empty()
    }

    /// AS participants answering `service_id`, with their answer, in
    /// declared order.
    pub fn responders(&self, service_id: &ServiceId) -> Vec<(&NodeId, &ServiceAnswer)> {
        self.as_nodes
            .iter()
            .flat_map(|a| {
                a.services
                    .iter()
                    .filter(move |s| &s.service_id == service_id)
                    .map(move |s| (&a.node_id, &s.answer))
            })
            .collect()
    }
}
