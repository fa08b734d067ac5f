//! Error types for the protocol API client.
//!
//! HTTP statuses are data ([`crate::ApiResponse`]); only failures to
//! obtain a response at all are errors. Nothing is retried.

use ndid_core::NodeId;

/// A call to a node could not be completed.
#[derive(Debug, thiserror::Error)]
pub enum NodeApiError {
    /// The HTTP request failed (connection refused, timeout, TLS).
    #[error("HTTP error calling {endpoint} on {node}: {source}")]
    Http {
        node: NodeId,
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// The node answered with a body that is not JSON.
    #[error("{endpoint} on {node} answered {status} with a non-JSON body: {reason}")]
    Decode {
        node: NodeId,
        endpoint: String,
        status: u16,
        reason: String,
    },

    /// Transport failure reported by a non-HTTP implementation.
    #[error("transport error calling {endpoint} on {node}: {reason}")]
    Transport {
        node: NodeId,
        endpoint: String,
        reason: String,
    },

    /// No API base URL is configured for the node.
    #[error("no API endpoint configured for node {0}")]
    UnknownNode(NodeId),

    /// Building the request URL failed.
    #[error("invalid URL for {endpoint}: {reason}")]
    Url { endpoint: String, reason: String },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

impl NodeApiError {
    /// Node the failed call targeted, if known.
    pub fn node(&self) -> Option<&NodeId> {
        match self {
            Self::Http { node, .. } | Self::Decode { node, .. } | Self::Transport { node, .. } => {
                Some(node)
            }
            Self::UnknownNode(node) => Some(node),
            Self::Url { .. } | Self::Build(_) => None,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("NDID_E2E_CONFIG is not set and no config path was given")]
    MissingPath,

    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid URL for {0}: {1}")]
    InvalidUrl(String, String),

    #[error("invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        var: String,
        value: String,
        reason: String,
    },

    #[error("config lists no nodes")]
    NoNodes,
}
