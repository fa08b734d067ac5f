//! # Actor Roles
//!
//! The protocol has four node roles plus the governance actor. Node ids
//! follow a naming convention that the harness relies on for routing
//! decisions: `rp1`, `idp1`, `as1`, `ndid1`, and `proxyN_roleM` for nodes
//! that sit behind proxy `N`.

use serde::{Deserialize, Serialize};

/// Role of a node in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Relying Party: originates requests.
    Rp,
    /// Identity Provider: authenticates the subject and answers.
    Idp,
    /// Accessor/data service: fulfills data-request line items.
    As,
    /// Relay in front of one or more logical nodes.
    Proxy,
    /// Governance actor.
    Ndid,
}

impl Role {
    /// Canonical lowercase name used in node ids and API paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rp => "rp",
            Self::Idp => "idp",
            Self::As => "as",
            Self::Proxy => "proxy",
            Self::Ndid => "ndid",
        }
    }

    /// Infer a role from a plain (non-proxied) node id such as `idp2`.
    ///
    /// The prefix must be followed by at least one digit and nothing else,
    /// so `rpc` or `idp_x` do not match.
    pub(crate) fn from_node_prefix(id: &str) -> Option<Self> {
        for role in [Self::Proxy, Self::Ndid, Self::Idp, Self::Rp, Self::As] {
            if let Some(rest) = id.strip_prefix(role.as_str()) {
                if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
                    return Some(role);
                }
            }
        }
        None
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Rp => "RP",
            Self::Idp => "IdP",
            Self::As => "AS",
            Self::Proxy => "Proxy",
            Self::Ndid => "NDID",
        })
    }
}

/// A node reached through a proxy: `proxy{proxy}_{role}{index}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProxyRoute {
    /// Proxy number.
    pub proxy: u32,
    /// Logical role of the node behind the proxy.
    pub role: Role,
    /// Node number within its role.
    pub index: u32,
}

impl ProxyRoute {
    /// Parse `proxyN_roleM`. Returns `None` for anything else.
    pub fn parse(id: &str) -> Option<Self> {
        let rest = id.strip_prefix("proxy")?;
        let (proxy, node) = rest.split_once('_')?;
        let proxy = proxy.parse().ok()?;
        let role = Role::from_node_prefix(node)?;
        if role == Role::Proxy {
            return None;
        }
        let index = node[role.as_str().len()..].parse().ok()?;
        Some(Self { proxy, role, index })
    }
}
