//! # Composite Block Height
//!
//! Every status callback carries a `block_height` of the form
//! `"<chain-id>:<height>"`. Heights are only comparable within one chain;
//! a chain-id change between two snapshots of the same request is itself a
//! protocol violation that the lifecycle monitor reports.
//!
//! Older node versions send a bare integer. That form is accepted and
//! treated as an empty chain id.

use std::cmp::Ordering;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::IdentifierError;

/// Ordering token attached to each status update.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockHeight {
    chain_id: String,
    height: u64,
}

impl BlockHeight {
    /// Construct from parts.
    pub fn new(chain_id: impl Into<String>, height: u64) -> Self {
        Self {
            chain_id: chain_id.into(),
            height,
        }
    }

    /// Parse `"<chain-id>:<height>"` or a bare `"<height>"`.
    ///
    /// The split is on the last `:` so chain ids containing colons survive.
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        let invalid = || IdentifierError::InvalidBlockHeight(raw.to_string());
        let (chain_id, height) = match raw.rsplit_once(':') {
            Some((chain, height)) if !chain.is_empty() => (chain, height),
            Some(_) => return Err(invalid()),
            None => ("", raw),
        };
        let height = height.trim().parse::<u64>().map_err(|_| invalid())?;
        Ok(Self::new(chain_id, height))
    }

    /// Chain id part (empty for legacy bare heights).
    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// Numeric suffix.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Compare heights on the same chain. `None` if the chains differ.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        (self.chain_id == other.chain_id).then(|| self.height.cmp(&other.height))
    }
}

impl std::fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.chain_id.is_empty() {
            write!(f, "{}", self.height)
        } else {
            write!(f, "{}:{}", self.chain_id, self.height)
        }
    }
}

impl std::str::FromStr for BlockHeight {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for BlockHeight {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BlockHeight {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => Self::parse(&text).map_err(serde::de::Error::custom),
            Raw::Number(height) => Ok(Self::new("", height)),
        }
    }
}
