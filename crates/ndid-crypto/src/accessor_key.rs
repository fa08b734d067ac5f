//! # Accessor Keys and Consent Signatures
//!
//! In modes 2 and 3 an IdP answers a request with a signature produced by
//! the subject's accessor key over the padded request-message hash. The
//! harness holds those keys on behalf of the simulated subjects.
//!
//! ## Security Invariant
//!
//! - `AccessorKeyPair` does not implement `Serialize` and its `Debug`
//!   output never includes key material.
//! - Seeds parsed from configuration are wiped after use (`zeroize`).
//!
//! Public keys and signatures travel as standard base64 strings, the form
//! the node APIs accept.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signer, Verifier};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::hash::padded_hash;

/// An Ed25519 accessor public key (32 bytes).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AccessorPublicKey([u8; 32]);

/// An Ed25519 accessor key pair.
pub struct AccessorKeyPair {
    signing_key: ed25519_dalek::SigningKey,
}

impl AccessorPublicKey {
    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Standard base64 form.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Parse from standard base64.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = decode_exact::<32>("accessor public key", encoded)?;
        Ok(Self(bytes))
    }

    /// Verify a consent signature produced by [`AccessorKeyPair::sign_consent`].
    pub fn verify_consent(
        &self,
        request_message_hash: &str,
        signature: &str,
    ) -> Result<(), CryptoError> {
        let vk = ed25519_dalek::VerifyingKey::from_bytes(&self.0)
            .map_err(|e| CryptoError::Key(format!("invalid public key: {e}")))?;
        let sig_bytes = decode_exact::<64>("signature", signature)?;
        let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
        let padded = padded_hash(request_message_hash)?;
        vk.verify(&padded, &sig)
            .map_err(|e| CryptoError::VerificationFailed(e.to_string()))
    }
}

impl Serialize for AccessorPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for AccessorPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Debug for AccessorPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix: String = self.0.iter().take(4).map(|b| format!("{b:02x}")).collect();
        write!(f, "AccessorPublicKey({prefix}...)")
    }
}

impl AccessorKeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let mut csprng = rand_core::OsRng;
        Self {
            signing_key: ed25519_dalek::SigningKey::generate(&mut csprng),
        }
    }

    /// Build from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(seed),
        }
    }

    /// Build from a base64-encoded 32-byte seed (the configuration form).
    pub fn from_seed_base64(encoded: &str) -> Result<Self, CryptoError> {
        let seed = Zeroizing::new(decode_exact::<32>("accessor seed", encoded)?);
        Ok(Self::from_seed(&seed))
    }

    /// Public half.
    pub fn public_key(&self) -> AccessorPublicKey {
        AccessorPublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign the padded request-message hash. Returns base64.
    pub fn sign_consent(&self, request_message_hash: &str) -> Result<String, CryptoError> {
        let padded = padded_hash(request_message_hash)?;
        let sig = self.signing_key.sign(&padded);
        Ok(STANDARD.encode(sig.to_bytes()))
    }
}

impl std::fmt::Debug for AccessorKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AccessorKeyPair(<private>)")
    }
}

fn decode_exact<const N: usize>(field: &'static str, encoded: &str) -> Result<[u8; N], CryptoError> {
    let bytes = Zeroizing::new(STANDARD.decode(encoded.trim()).map_err(|e| {
        CryptoError::Base64 {
            field,
            reason: e.to_string(),
        }
    })?);
    if bytes.len() != N {
        return Err(CryptoError::Length {
            field,
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}
