//! Harness configuration.
//!
//! Names the API base URL of every node under test, where the callback
//! receiver listens, the public URL nodes should deliver callbacks to, and
//! the timing knobs. Loaded from YAML with environment overrides:
//!
//! - `NDID_E2E_CONFIG`: path of the YAML file
//! - `NDID_CALLBACK_LISTEN`: receiver bind address
//! - `NDID_CALLBACK_BASE_URL`: base URL nodes POST callbacks to
//! - `NDID_STEP_TIMEOUT_SECS`: overrides every step budget
//! - `NDID_HTTP_TIMEOUT_SECS`: per-call HTTP timeout
//!
//! ```yaml
//! nodes:
//!   rp1: http://rp1.local:8200
//!   idp1: http://idp1.local:8100
//!   as1: http://as1.local:8300
//!   proxy1: http://proxy1.local:8400
//! callback_listen: 0.0.0.0:9200
//! callback_base_url: http://harness.local:9200
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use ndid_core::NodeId;

use crate::error::ConfigError;

pub const CONFIG_PATH_VAR: &str = "NDID_E2E_CONFIG";

/// Harness configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Node id to API base URL. Nodes behind a proxy may be omitted; their
    /// calls go to the proxy's entry.
    pub nodes: BTreeMap<NodeId, Url>,
    #[serde(default = "default_listen")]
    pub callback_listen: SocketAddr,
    /// Public base URL of the receiver; defaults to `http://{callback_listen}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_base_url: Option<Url>,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
    /// Overrides every per-step budget when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_timeout_secs: Option<u64>,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    /// Default `request_timeout` for created requests.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9200))
}

fn default_body_limit() -> usize {
    2 * 1024 * 1024
}

fn default_http_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    86_400
}

impl HarnessConfig {
    /// Parse a YAML document.
    pub fn from_yaml(source: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(source).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            reason: e.to_string(),
        })?;
        if config.nodes.is_empty() {
            return Err(ConfigError::NoNodes);
        }
        Ok(config)
    }

    /// Read and parse a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: display.clone(),
            source: e,
        })?;
        Self::from_yaml(&source, &display)
    }

    /// Load from `path` (or `NDID_E2E_CONFIG`) and apply environment
    /// overrides.
    pub fn from_env(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => {
                let path = std::env::var(CONFIG_PATH_VAR).map_err(|_| ConfigError::MissingPath)?;
                Self::load(Path::new(&path))?
            }
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (the environment, in production).
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = lookup("NDID_CALLBACK_LISTEN") {
            self.callback_listen = raw.parse().map_err(|e: std::net::AddrParseError| {
                ConfigError::InvalidValue {
                    var: "NDID_CALLBACK_LISTEN".into(),
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(raw) = lookup("NDID_CALLBACK_BASE_URL") {
            self.callback_base_url = Some(Url::parse(&raw).map_err(|e| {
                ConfigError::InvalidUrl("NDID_CALLBACK_BASE_URL".into(), e.to_string())
            })?);
        }
        if let Some(raw) = lookup("NDID_STEP_TIMEOUT_SECS") {
            self.step_timeout_secs = Some(parse_secs("NDID_STEP_TIMEOUT_SECS", &raw)?);
        }
        if let Some(raw) = lookup("NDID_HTTP_TIMEOUT_SECS") {
            self.http_timeout_secs = parse_secs("NDID_HTTP_TIMEOUT_SECS", &raw)?;
        }
        Ok(())
    }

    /// All nodes on localhost, for tests.
    ///
    /// `rp1`..`rp2` from `base_port`, `idp1`..`idp3` from `base_port + 10`,
    /// `as1`..`as2` from `base_port + 20`, `proxy1` at `base_port + 30`;
    /// the receiver listens on `base_port + 100`.
    pub fn local(base_port: u16) -> Result<Self, ConfigError> {
        let make_url = |port: u16| -> Result<Url, ConfigError> {
            Url::parse(&format!("http://127.0.0.1:{port}"))
                .map_err(|e| ConfigError::InvalidUrl("localhost".to_string(), e.to_string()))
        };
        let node = |id: &str| -> Result<NodeId, ConfigError> {
            NodeId::new(id).map_err(|e| ConfigError::InvalidValue {
                var: "nodes".into(),
                value: id.into(),
                reason: e.to_string(),
            })
        };

        let layout: [(&str, u16); 8] = [
            ("rp1", 0),
            ("rp2", 1),
            ("idp1", 10),
            ("idp2", 11),
            ("idp3", 12),
            ("as1", 20),
            ("as2", 21),
            ("proxy1", 30),
        ];
        let mut nodes = BTreeMap::new();
        for (id, offset) in layout {
            nodes.insert(node(id)?, make_url(base_port + offset)?);
        }
        let listen_port = base_port + 100;
        Ok(Self {
            nodes,
            callback_listen: SocketAddr::from(([127, 0, 0, 1], listen_port)),
            callback_base_url: Some(make_url(listen_port)?),
            body_limit_bytes: default_body_limit(),
            step_timeout_secs: Some(5),
            http_timeout_secs: 5,
            request_timeout_secs: default_request_timeout(),
        })
    }

    /// API base URL for `node_id`; proxied nodes resolve to their proxy.
    pub fn node_url(&self, node_id: &NodeId) -> Option<&Url> {
        if let Some(url) = self.nodes.get(node_id) {
            return Some(url);
        }
        let route = node_id.proxy_route()?;
        let proxy = NodeId::new(format!("proxy{}", route.proxy)).ok()?;
        self.nodes.get(&proxy)
    }

    /// URL `node_id` should deliver its callbacks to.
    pub fn callback_url(&self, node_id: &NodeId) -> String {
        let base = match &self.callback_base_url {
            Some(url) => url.as_str().trim_end_matches('/').to_string(),
            None => format!("http://{}", self.callback_listen),
        };
        format!("{base}/callback/{node_id}")
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Step budget, honoring the global override.
    pub fn step_budget(&self, default: Duration) -> Duration {
        self.step_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(default)
    }
}

fn parse_secs(var: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
        var: var.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}
