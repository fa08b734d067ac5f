//! # Identifier Newtypes
//!
//! Newtype wrappers for every identifier that appears in a callback or an
//! API call. They prevent accidental confusion between namespaces: a
//! `ReferenceId` cannot be passed where a `RequestId` is expected, which
//! matters because correlation keys mix both.
//!
//! All identifiers are opaque strings assigned either by the harness
//! (`ReferenceId`) or by the nodes under test (`RequestId`, `AccessorId`).
//! Validation only rejects what would break routing: empty values and
//! characters that cannot appear in a URL path segment.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IdentifierError;
use crate::role::{ProxyRoute, Role};

fn validate(kind: &'static str, value: &str) -> Result<(), IdentifierError> {
    if value.trim().is_empty() {
        return Err(IdentifierError::Empty { kind });
    }
    if value.chars().any(|c| c.is_whitespace() || c == '/' || c == '?' || c == '#') {
        return Err(IdentifierError::Invalid {
            kind,
            value: value.to_string(),
            reason: "must not contain whitespace, '/', '?' or '#'",
        });
    }
    Ok(())
}

macro_rules! string_identifier {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create the identifier, rejecting empty or path-unsafe values.
            pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
                let value = value.into();
                validate($kind, &value)?;
                Ok(Self(value))
            }

            /// Access the identifier string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdentifierError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdentifierError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_identifier!(
    /// Logical id of a node under test (`rp1`, `idp2`, `as1`, `proxy1_idp4`).
    ///
    /// Callbacks are routed by this id. For proxy-routed nodes it is the
    /// node's own logical id, never the physical proxy process.
    NodeId,
    "node id"
);

string_identifier!(
    /// Request id assigned by the platform when a request is created.
    RequestId,
    "request id"
);

string_identifier!(
    /// Harness-chosen id that correlates an asynchronous `*_result`
    /// callback with the API call that caused it.
    ReferenceId,
    "reference id"
);

string_identifier!(
    /// Data service id (`bank_statement`, `customer_info`, ...).
    ServiceId,
    "service id"
);

string_identifier!(
    /// Accessor id registered for an identity (modes 2 and 3).
    AccessorId,
    "accessor id"
);

impl ReferenceId {
    /// Generate a fresh random reference id.
    ///
    /// Reference ids are the only correlation key the harness controls, so
    /// they must never repeat within a process run.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl NodeId {
    /// The role implied by the node's naming convention, if any.
    ///
    /// `rp1` → RP, `idp2` → IdP, `as1` → AS, `ndid1` → NDID, and
    /// `proxy1_idp4` → IdP (the logical role behind the proxy).
    pub fn role(&self) -> Option<Role> {
        match self.proxy_route() {
            Some(route) => Some(route.role),
            None => Role::from_node_prefix(&self.0),
        }
    }

    /// Parse the `proxyN_roleM` convention for proxy-routed nodes.
    pub fn proxy_route(&self) -> Option<ProxyRoute> {
        ProxyRoute::parse(&self.0)
    }

    /// Whether this node is reached through a proxy.
    pub fn is_behind_proxy(&self) -> bool {
        self.proxy_route().is_some()
    }
}
