//! Conformance and sequence errors.

use thiserror::Error;

use ndid_callback::Status;
use ndid_core::{BlockHeight, RequestId, ServiceId};

/// A single field of an observed snapshot disagreed with what the protocol
/// requires.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{context}: `{field}` expected {expected}, got {actual}")]
pub struct ConformanceError {
    /// Which snapshot was being checked.
    pub context: String,
    /// Dotted path of the mismatched field.
    pub field: String,
    pub expected: String,
    pub actual: String,
}

impl ConformanceError {
    pub fn new(
        context: impl Into<String>,
        field: impl Into<String>,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        Self {
            context: context.into(),
            field: field.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// The sequence of `request_status` snapshots for one request broke a
/// lifecycle rule.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("request {request_id}: illegal transition {from} -> {to} at {block_height}")]
    IllegalTransition {
        request_id: RequestId,
        from: Status,
        to: Status,
        block_height: BlockHeight,
    },

    #[error("request {request_id}: answered count decreased from {previous} to {current}")]
    AnsweredCountDecreased {
        request_id: RequestId,
        previous: u32,
        current: u32,
    },

    #[error("request {request_id}: {counter} for {service_id} decreased from {previous} to {current}")]
    ServiceCounterDecreased {
        request_id: RequestId,
        service_id: ServiceId,
        counter: &'static str,
        previous: u32,
        current: u32,
    },

    #[error("request {request_id}: block height went backwards from {previous} to {current}")]
    BlockHeightRegressed {
        request_id: RequestId,
        previous: BlockHeight,
        current: BlockHeight,
    },

    #[error("request {request_id}: state changed without block height advancing past {height}")]
    BlockHeightNotAdvanced {
        request_id: RequestId,
        height: BlockHeight,
    },

    #[error("request {request_id}: chain changed from {previous} to {current}")]
    ChainChanged {
        request_id: RequestId,
        previous: String,
        current: String,
    },

    #[error("request {request_id}: request_status at {event_height} after terminal snapshot at {terminal_height}")]
    EventAfterTerminal {
        request_id: RequestId,
        terminal_height: BlockHeight,
        event_height: BlockHeight,
    },

    #[error("request {request_id}: closed snapshot differs from the one before it in `{field}`")]
    ClosedSnapshotDiffers { request_id: RequestId, field: String },

    #[error("monitor for {expected} received a snapshot for {actual}")]
    WrongRequest {
        expected: RequestId,
        actual: RequestId,
    },

    #[error("request {request_id}: no request_status observed")]
    NoSnapshots { request_id: RequestId },

    #[error("request {request_id}: never reached a closed or timed-out snapshot (last status {last})")]
    NotTerminated { request_id: RequestId, last: Status },
}

impl LifecycleError {
    /// The request the error concerns.
    pub fn request_id(&self) -> &RequestId {
        match self {
            Self::IllegalTransition { request_id, .. }
            | Self::AnsweredCountDecreased { request_id, .. }
            | Self::ServiceCounterDecreased { request_id, .. }
            | Self::BlockHeightRegressed { request_id, .. }
            | Self::BlockHeightNotAdvanced { request_id, .. }
            | Self::ChainChanged { request_id, .. }
            | Self::EventAfterTerminal { request_id, .. }
            | Self::ClosedSnapshotDiffers { request_id, .. }
            | Self::NoSnapshots { request_id }
            | Self::NotTerminated { request_id, .. } => request_id,
            Self::WrongRequest { expected, .. } => expected,
        }
    }
}
