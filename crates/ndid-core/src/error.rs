//! # Error Types
//!
//! Parsing and validation failures for the core primitives. All errors use
//! `thiserror` and carry the offending input so a failing scenario names
//! exactly what it could not interpret.

use thiserror::Error;

/// Failure to construct or parse a core identifier or token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    /// An identifier was empty or whitespace-only.
    #[error("{kind} must not be empty")]
    Empty {
        /// Identifier kind, e.g. "node id".
        kind: &'static str,
    },

    /// An identifier contained characters that cannot appear in a URL path
    /// segment or callback body key.
    #[error("invalid {kind} {value:?}: {reason}")]
    Invalid {
        /// Identifier kind.
        kind: &'static str,
        /// The rejected input.
        value: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A block height was not of the form `<chain-id>:<height>`.
    #[error("invalid block height {0:?}: expected \"<chain-id>:<height>\"")]
    InvalidBlockHeight(String),

    /// A protocol mode outside 1..=3.
    #[error("invalid protocol mode {0}: expected 1, 2 or 3")]
    InvalidMode(u8),
}
