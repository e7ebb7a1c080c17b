use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FedError, Result};

/// Default worker fan-out when the config leaves `worker_ct` at zero.
pub const DEFAULT_WORKER_CT: usize = 2;

/// Top-level gateway configuration.
///
/// Loaded once at startup from a JSON document. Structural problems
/// (duplicate schema names, dangling source references) are reported by
/// the server context during load, not here; this layer only parses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Backend data sources, in declaration order.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    /// Federated schemas grouping sources under one namespace each.
    #[serde(default)]
    pub schemas: Vec<SchemaConfig>,
    /// Known grid nodes, keyed by the source they serve.
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    /// Number of distributed workers per query; 0 means use the default.
    #[serde(default)]
    pub worker_ct: usize,
    /// Address the coordinator listens on.
    #[serde(default)]
    pub coordinator_address: String,
    /// Interval for the periodic schema refresh loop; 0 disables it.
    #[serde(default)]
    pub schema_refresh_secs: u64,
    /// Convert internal panics during planning/execution into per-query
    /// errors instead of unwinding the process.
    #[serde(default = "default_suppress_recover")]
    pub suppress_recover: bool,
}

fn default_suppress_recover() -> bool {
    true
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            schemas: Vec::new(),
            nodes: Vec::new(),
            worker_ct: 0,
            coordinator_address: String::new(),
            schema_refresh_secs: 0,
            suppress_recover: default_suppress_recover(),
        }
    }
}

/// One backend data source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    /// Driver key, matched case-insensitively against registered factories.
    pub source_type: String,
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Driver-specific settings, passed through opaquely.
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,
    /// Named partitions of this source. Empty means a single implicit partition.
    #[serde(default)]
    pub partitions: Vec<String>,
}

/// A federated schema: one namespace over one or more sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub name: String,
    /// Names of [`SourceConfig`] entries attached to this schema, in order.
    #[serde(default)]
    pub sources: Vec<String>,
}

/// A grid node advertisement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Source name this node serves.
    pub source: String,
    pub address: String,
}

impl GatewayConfig {
    /// Parses a config from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| FedError::Config(format!("config parse: {e}")))
    }

    /// Reads and parses a config file.
    pub fn load_from_json(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&bytes)
    }

    /// Effective worker count with the zero-means-default substitution applied.
    pub fn effective_worker_ct(&self) -> usize {
        if self.worker_ct == 0 {
            DEFAULT_WORKER_CT
        } else {
            self.worker_ct
        }
    }

    /// Source config by name.
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// Node addresses serving a given source, in declaration order.
    pub fn nodes_for(&self, source: &str) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.source == source)
            .map(|n| n.address.clone())
            .collect()
    }
}

impl SourceConfig {
    /// Partition names with the single implicit partition fallback.
    pub fn partition_names(&self) -> Vec<String> {
        if self.partitions.is_empty() {
            vec!["0".to_string()]
        } else {
            self.partitions.clone()
        }
    }

    /// A string-valued setting, if present and a JSON string.
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(|v| v.as_str())
    }

    /// A boolean setting, defaulting to false when absent or non-boolean.
    pub fn setting_bool(&self, key: &str) -> bool {
        self.settings
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}
