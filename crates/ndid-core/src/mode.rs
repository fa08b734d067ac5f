//! # Protocol Mode
//!
//! Mode governs how the subject of a request is identified:
//!
//! - **Mode 1**: the RP names the IdPs directly; no accessor signature.
//! - **Mode 2**: the subject is identified by namespace/identifier; IdPs
//!   sign their answer with a registered accessor key.
//! - **Mode 3**: like mode 2 but resolved through a reference group.
//!
//! Serialized as the bare integer the nodes use on the wire.

use serde::{Deserialize, Serialize};

use crate::error::IdentifierError;

/// Protocol mode of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Mode {
    /// Direct IdP addressing.
    One,
    /// Namespace/identifier addressing with accessor signatures.
    Two,
    /// Reference-group addressing with accessor signatures.
    Three,
}

impl Mode {
    /// Wire value.
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }

    /// Whether IdP answers carry an accessor signature that the platform
    /// verifies (and reports in `valid_signature`/`valid_ial`).
    pub fn requires_accessor_signature(&self) -> bool {
        !matches!(self, Self::One)
    }

    /// Whether the request must name the subject by namespace/identifier.
    pub fn requires_identity(&self) -> bool {
        !matches!(self, Self::One)
    }
}

impl TryFrom<u8> for Mode {
    type Error = IdentifierError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            3 => Ok(Self::Three),
            other => Err(IdentifierError::InvalidMode(other)),
        }
    }
}

impl From<Mode> for u8 {
    fn from(mode: Mode) -> Self {
        mode.as_u8()
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mode {}", self.as_u8())
    }
}
