//! Crypto error types.

use thiserror::Error;

/// Error in a local crypto derivation or signature check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Input was not valid base64.
    #[error("invalid base64 in {field}: {reason}")]
    Base64 {
        /// Which value failed to decode.
        field: &'static str,
        /// Decoder message.
        reason: String,
    },

    /// Decoded value had the wrong length.
    #[error("{field} must be {expected} bytes, got {actual}")]
    Length {
        /// Which value had the wrong length.
        field: &'static str,
        /// Required length.
        expected: usize,
        /// Observed length.
        actual: usize,
    },

    /// Key material could not be parsed.
    #[error("key error: {0}")]
    Key(String),

    /// Signature verification failed.
    #[error("signature verification failed: {0}")]
    VerificationFailed(String),
}
