//! # ndid-core — Foundational Types for the NDID E2E Harness
//!
//! Defines the primitives every other harness crate speaks in: identifiers
//! for nodes, requests, references, services and accessors; the protocol
//! `Mode`; actor `Role`s (including the `proxyN_roleM` naming convention
//! for proxy-routed nodes); and the composite `BlockHeight` ordering token
//! attached to every request-status callback.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `ndid-*` crates (this is the leaf of the DAG).
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.
//! - Identifiers are newtypes with validated constructors. No bare strings
//!   cross crate boundaries where an identifier is meant.

pub mod block_height;
pub mod error;
pub mod identity;
pub mod mode;
pub mod role;

pub use block_height::BlockHeight;
pub use error::IdentifierError;
pub use identity::{AccessorId, NodeId, ReferenceId, RequestId, ServiceId};
pub use mode::Mode;
pub use role::{ProxyRoute, Role};
