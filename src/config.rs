//! Node Configuration
//!
//! YAML-backed settings of one cache node. Command-line flags override the
//! file (see `main.rs`).
//!
//! ```yaml
//! self_url: http://10.0.0.1:8080
//! peers: [http://10.0.0.1:8080, http://10.0.0.2:8080]
//! listen: 0.0.0.0:8080
//! groups:
//!   - name: assets
//!     cache_bytes: 67108864
//!     hot_admission: { one_in: 4 }
//!     data_dir: /srv/assets
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{HotAdmission, DEFAULT_CACHE_BYTES, DEFAULT_HOT_RATIO};
use crate::error::{Error, Result};
use crate::group::GroupConfig;
use crate::peers::{HttpConfig, DEFAULT_BASE_PATH};
use crate::ring::DEFAULT_REPLICAS;

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_base_path() -> String {
    DEFAULT_BASE_PATH.to_string()
}

fn default_replicas() -> usize {
    DEFAULT_REPLICAS
}

fn default_peer_timeout_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_cache_bytes() -> u64 {
    DEFAULT_CACHE_BYTES
}

fn default_hot_ratio() -> u64 {
    DEFAULT_HOT_RATIO
}

fn default_true() -> bool {
    true
}

/// Settings of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// This node's own peer identifier (its base URL)
    #[serde(default)]
    pub self_url: String,

    /// Every member of the ring, this node included
    #[serde(default)]
    pub peers: Vec<String>,

    /// Address the HTTP server binds to
    #[serde(default = "default_listen")]
    pub listen: String,

    /// URL prefix of peer requests
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Virtual nodes per peer
    #[serde(default = "default_replicas")]
    pub replicas: usize,

    /// Timeout of one peer fetch
    #[serde(default = "default_peer_timeout_ms")]
    pub peer_timeout_ms: u64,

    /// Timeout of one request served to a client or peer
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub groups: Vec<GroupSpec>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            self_url: String::new(),
            peers: Vec::new(),
            listen: default_listen(),
            base_path: default_base_path(),
            replicas: default_replicas(),
            peer_timeout_ms: default_peer_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            groups: Vec::new(),
        }
    }
}

/// Settings of one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSpec {
    pub name: String,

    #[serde(default = "default_cache_bytes")]
    pub cache_bytes: u64,

    #[serde(default = "default_hot_ratio")]
    pub hot_ratio: u64,

    /// `always`, `never` or `{ one_in: n }`
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub hot_admission: HotAdmission,

    #[serde(default = "default_true")]
    pub fallback_to_local: bool,

    /// Remember not-found keys for this long; absent disables it
    #[serde(default)]
    pub negative_ttl_ms: Option<u64>,

    /// Directory served by the file loader
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl GroupSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cache_bytes: default_cache_bytes(),
            hot_ratio: default_hot_ratio(),
            hot_admission: HotAdmission::default(),
            fallback_to_local: true,
            negative_ttl_ms: None,
            data_dir: None,
        }
    }

    pub fn group_config(&self) -> GroupConfig {
        let mut config = GroupConfig::default()
            .with_cache_bytes(self.cache_bytes)
            .with_hot_ratio(self.hot_ratio)
            .with_hot_admission(self.hot_admission)
            .with_fallback_to_local(self.fallback_to_local);
        if let Some(ms) = self.negative_ttl_ms {
            config = config.with_negative_ttl(Duration::from_millis(ms));
        }
        config
    }
}

impl NodeConfig {
    /// Load from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| Error::Config(format!("Invalid config: {}", e)))
    }

    /// Reject settings the node cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.self_url.trim().is_empty() {
            return Err(Error::Config("self_url must not be empty".to_string()));
        }
        if self.replicas == 0 {
            return Err(Error::Config("replicas must be at least 1".to_string()));
        }

        let mut names = HashSet::new();
        for group in &self.groups {
            if group.name.is_empty() {
                return Err(Error::Config("group name must not be empty".to_string()));
            }
            if !names.insert(group.name.as_str()) {
                return Err(Error::Config(format!("duplicate group: {}", group.name)));
            }
            if group.hot_ratio == 0 {
                return Err(Error::Config(format!(
                    "group {}: hot_ratio must be at least 1",
                    group.name
                )));
            }
            if group.hot_admission == HotAdmission::OneIn(0) {
                return Err(Error::Config(format!(
                    "group {}: one_in must be at least 1",
                    group.name
                )));
            }
        }
        Ok(())
    }

    /// Ring members; a node with no peers configured runs alone
    pub fn ring_members(&self) -> Vec<String> {
        if self.peers.is_empty() {
            vec![self.self_url.clone()]
        } else {
            self.peers.clone()
        }
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            base_path: self.base_path.clone(),
            timeout: Duration::from_millis(self.peer_timeout_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
