//! # ndid-callback — Callback Correlation Engine
//!
//! Nodes report the outcome of nearly every operation asynchronously, by
//! POSTing a callback to the harness. This crate turns that stream into
//! something a test can `await`:
//!
//! - [`envelope`]: typed callback bodies and the [`CallbackEnvelope`]
//!   that pairs one with its emitting node.
//! - [`deferred`]: single-resolution futures.
//! - [`predicate`]: declarative filters over envelopes.
//! - [`channel`]: per-node subscription hub with RAII unsubscription.
//! - [`registry`]: per-scenario correlation of envelopes to expectations,
//!   including request ids learned after the trigger.
//! - [`delivery`]: per-destination message-queue delivery tracking.
//! - [`receiver`]: the axum endpoint nodes deliver callbacks to.
//!
//! ## Ordering contract
//!
//! Every expectation must be registered before the operation that causes
//! it is triggered. The registry enforces this for request slots through
//! [`ArmedSlot`]; other expectations rely on the orchestrator registering
//! them first, and a late registration is logged when a matching callback
//! already sits in the unmatched log.

pub mod channel;
pub mod deferred;
pub mod delivery;
pub mod envelope;
pub mod error;
pub mod predicate;
pub mod receiver;
pub mod registry;

pub use channel::{CallbackHub, CallbackSink, Subscription};
pub use deferred::{deferred, Deferred, Resolver};
pub use delivery::{DeliveryConfirmation, MessageDeliveryTracker};
pub use envelope::{
    Callback, CallbackEnvelope, CallbackFailure, CallbackKind, DataRequestItem, IdpValidity,
    RequestStatus, ServiceProgress, Status,
};
pub use error::{DeferredError, DeliveryError, EnvelopeError, RegistryError};
pub use predicate::{Predicate, RequestKey, SlotId, Verdict};
pub use registry::{ArmedSlot, CorrelationRegistry, FanOut, PendingCallback, TeardownReport};
