//! Flow failures.
//!
//! Every way a scenario can fail maps to one [`FlowError`] variant, and
//! every variant to one [`FailureClass`], which the runner turns into an
//! exit code.

use std::time::Duration;

use thiserror::Error;

use ndid_callback::{DeliveryError, RegistryError};
use ndid_client::NodeApiError;
use ndid_crypto::CryptoError;
use ndid_lifecycle::{ConformanceError, LifecycleError};

/// Broad category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The node under test broke the protocol.
    Conformance,
    /// An expected callback never arrived.
    Liveness,
    /// The scenario or the harness was used inconsistently.
    HarnessUsage,
    /// A node could not be reached.
    Transport,
}

#[derive(Error, Debug)]
pub enum FlowError {
    /// The scenario is inconsistent. Raised before any network call.
    #[error("invalid scenario: {0}")]
    HarnessUsage(String),

    #[error("registry misuse: {0}")]
    Registry(#[from] RegistryError),

    #[error("step `{step}`: no callback within {budget:?}")]
    Liveness { step: String, budget: Duration },

    #[error("step `{step}`: expectation abandoned")]
    Abandoned { step: String },

    #[error("step `{step}`: {source}")]
    Conformance {
        step: String,
        #[source]
        source: ConformanceError,
    },

    #[error("lifecycle violation: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// An API call answered differently than the scenario requires.
    #[error("step `{step}`: expected {expected}, node answered {actual}")]
    UnexpectedApiOutcome {
        step: String,
        expected: String,
        actual: String,
    },

    #[error("message delivery: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("node API: {0}")]
    Api(#[from] NodeApiError),

    #[error("consent signature: {0}")]
    Crypto(#[from] CryptoError),
}

impl FlowError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::HarnessUsage(_) | Self::Registry(_) | Self::Crypto(_) => {
                FailureClass::HarnessUsage
            }
            Self::Delivery(DeliveryError::Malformed { .. }) => FailureClass::Conformance,
            Self::Liveness { .. } | Self::Abandoned { .. } | Self::Delivery(_) => {
                FailureClass::Liveness
            }
            Self::Conformance { .. } | Self::Lifecycle(_) | Self::UnexpectedApiOutcome { .. } => {
                FailureClass::Conformance
            }
            Self::Api(_) => FailureClass::Transport,
        }
    }

    pub(crate) fn conformance(step: &str, source: ConformanceError) -> Self {
        Self::Conformance {
            step: step.to_string(),
            source,
        }
    }
}
