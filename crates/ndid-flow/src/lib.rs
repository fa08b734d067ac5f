//! # ndid-flow
//!
//! Scenario-driven request flows for the NDID end-to-end harness.
//!
//! A [`Scenario`] declares the RP, the request, how each IdP and AS node
//! answers, and how the request should end. [`validate`] rejects scenarios
//! that cannot produce a well-defined run, [`FlowPlan`] derives every
//! `request_status` snapshot the RP must emit, and [`FlowOrchestrator`]
//! drives the live nodes through the flow while checking each callback
//! against the plan.
//!
//! Failures are [`FlowError`]s, each with a [`FailureClass`] so a runner
//! can tell a misbehaving node from a misconfigured scenario.

pub mod checks;
pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod report;
pub mod scenario;
pub mod setup;
pub mod signer;
pub mod step;
pub mod validate;

pub use error::{FailureClass, FlowError};
pub use orchestrator::FlowOrchestrator;
pub use plan::{project, Checkpoint, DataStep, FlowPlan, Projection, Topology};
pub use report::{DeliveryRecord, FlowReport, IdpAnswerRecord, StepRecord};
pub use scenario::{
    AccessorBinding, AccessorSeed, AnswerOrder, AsParticipant, BudgetOverrides, DataRequestSpec,
    Finish, IdpOutcome, IdpParticipant, InvalidAttempt, RequestSpec, ResponseMutation, Scenario,
    ServiceAnswer, ServiceResponse, StepBudgets,
};
pub use setup::register_callbacks;
pub use signer::{ConsentSigner, ScenarioSigner};
pub use validate::validate;
