//! # ndid-crypto — Local Reproduction of Node-Side Derivations
//!
//! The harness never trusts a hash or salt it cannot recompute. This crate
//! holds the pure functions the flow orchestrator calls to rebuild what the
//! node under test derived:
//!
//! - **Content hash**: base64 of SHA-256.
//! - **Request-message salt**: derived from the request id and the
//!   `initial_salt` returned by `createRequest`.
//! - **Request-message hash**: `hash(request_message || salt)`.
//! - **Padded hash + accessor signature**: the IdP's consent signature over
//!   the request-message hash (modes 2 and 3).
//!
//! ## Crate Policy
//!
//! - Depends only on `ndid-core` internally.
//! - No mocking of cryptographic operations in tests.
//! - Private keys are never serialized or logged.

pub mod accessor_key;
pub mod error;
pub mod hash;

pub use accessor_key::{AccessorKeyPair, AccessorPublicKey};
pub use error::CryptoError;
pub use hash::{
    derive_request_message_salt, hash, padded_hash, request_message_hash, sha256,
    PADDED_HASH_LEN,
};
