//! Error types for the correlation engine.

use std::time::Duration;

use thiserror::Error;

use ndid_core::{IdentifierError, NodeId, RequestId};

/// A wire body could not be turned into an envelope at all.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnvelopeError {
    #[error("callback body is not a JSON object")]
    NotAnObject,

    #[error("callback body has no node_id and no channel was given")]
    MissingNodeId,

    #[error("{field} must be a string, got {value}")]
    NotAString { field: &'static str, value: String },

    #[error("invalid node_id: {0}")]
    InvalidNodeId(#[from] IdentifierError),
}

/// Failure of a single-resolution deferred future.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredError {
    /// The resolver was used twice.
    #[error("deferred value already resolved")]
    AlreadyResolved,

    /// The resolver was dropped without ever resolving.
    #[error("deferred value abandoned before resolution")]
    Abandoned,
}

/// Misuse of the correlation registry, or an inconsistency it detected.
///
/// Every variant is a harness-usage or conformance finding, never a
/// transient condition.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// An expectation was registered on a node channel the registry is
    /// not attached to; the event could never be observed.
    #[error("no subscription on channel {node}: attach the registry before registering expectations")]
    NotAttached { node: NodeId },

    /// A binding predicate did not carry the reference id it must
    /// promote on.
    #[error("binding expectation for slot '{slot}' has no reference_id")]
    BindingWithoutReference { slot: String },

    /// A request slot was bound twice to different ids.
    #[error("slot '{slot}' already bound to {existing}, refusing to rebind to {attempted}")]
    ConflictingBinding {
        slot: String,
        existing: RequestId,
        attempted: RequestId,
    },

    /// The slot received its binding before its expectations were armed,
    /// meaning the triggering call ran ahead of the subscriptions.
    #[error("slot '{slot}' was bound before it was armed")]
    TriggeredBeforeArmed { slot: String },

    /// A slot was armed twice.
    #[error("slot '{slot}' is already armed")]
    AlreadyArmed { slot: String },

    /// Unknown slot handle.
    #[error("unknown request slot #{0}")]
    UnknownSlot(usize),
}

/// A message-delivery fan-out did not complete.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliveryError {
    #[error("{source_node} did not confirm delivery to {missing:?} within {budget:?}")]
    Incomplete {
        source_node: NodeId,
        missing: Vec<NodeId>,
        budget: Duration,
    },

    #[error("delivery tracking for {source_node} abandoned (registry dropped)")]
    Abandoned { source_node: NodeId },

    /// A confirmation for the destination arrived but could not be decoded.
    #[error("{source_node} sent an undecodable delivery confirmation for {destination}: {reason}")]
    Malformed {
        source_node: NodeId,
        destination: NodeId,
        reason: String,
    },
}
