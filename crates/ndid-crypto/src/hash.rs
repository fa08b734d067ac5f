//! # Hashing and Salt Derivation
//!
//! Reproduces the digests a node computes for a request so the harness can
//! compare them against the values reported in `incoming_request`.
//!
//! ```text
//! salt  = base64( SHA-256(request_id || initial_salt)[..16] )
//! hash  = base64( SHA-256(request_message || salt) )
//! pad   = 00 01 FF .. FF 00 || DigestInfo(SHA-256) || digest     (256 bytes)
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

use ndid_core::RequestId;

use crate::error::CryptoError;

/// Length of the padded hash the accessor signature is computed over.
pub const PADDED_HASH_LEN: usize = 256;

/// Number of digest bytes kept for a request-message salt.
const SALT_LEN: usize = 16;

/// ASN.1 DigestInfo prefix for SHA-256.
const SHA256_DIGEST_INFO: [u8; 19] = [
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01,
    0x05, 0x00, 0x04, 0x20,
];

/// Raw SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Content hash: base64 of SHA-256.
pub fn hash(data: impl AsRef<[u8]>) -> String {
    STANDARD.encode(sha256(data.as_ref()))
}

/// Derive the per-request message salt from the platform's `initial_salt`.
pub fn derive_request_message_salt(request_id: &RequestId, initial_salt: &str) -> String {
    let mut input = Vec::with_capacity(request_id.as_str().len() + initial_salt.len());
    input.extend_from_slice(request_id.as_str().as_bytes());
    input.extend_from_slice(initial_salt.as_bytes());
    STANDARD.encode(&sha256(&input)[..SALT_LEN])
}

/// `request_message_hash` as reported to IdPs.
pub fn request_message_hash(request_message: &str, request_message_salt: &str) -> String {
    hash(format!("{request_message}{request_message_salt}"))
}

/// Pad a base64 request-message hash for signing.
///
/// # Errors
///
/// Fails if `request_message_hash` is not base64 or not a SHA-256 digest.
pub fn padded_hash(request_message_hash: &str) -> Result<Vec<u8>, CryptoError> {
    let digest = STANDARD
        .decode(request_message_hash)
        .map_err(|e| CryptoError::Base64 {
            field: "request_message_hash",
            reason: e.to_string(),
        })?;
    if digest.len() != 32 {
        return Err(CryptoError::Length {
            field: "request_message_hash",
            expected: 32,
            actual: digest.len(),
        });
    }

    let tail_len = SHA256_DIGEST_INFO.len() + digest.len();
    let fill = PADDED_HASH_LEN - 3 - tail_len;
    let mut out = Vec::with_capacity(PADDED_HASH_LEN);
    out.extend_from_slice(&[0x00, 0x01]);
    out.extend(std::iter::repeat(0xff).take(fill));
    out.push(0x00);
    out.extend_from_slice(&SHA256_DIGEST_INFO);
    out.extend_from_slice(&digest);
    Ok(out)
}
