use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::utils::error::{GateError, GateResult};

/// Main engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
    /// Path of the VSchema JSON document describing sharded tables
    #[serde(default)]
    pub vschema_path: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Knobs that shape how operators execute
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Rows an operator may hold in memory before failing
    pub max_memory_rows: usize,
    /// LIMIT offsets above this switch to streaming skip-then-take
    pub deep_pagination_threshold: u64,
    /// Let multi-shard DML commit per shard instead of rolling back on error
    pub multi_shard_autocommit: bool,
    /// Advisory per-query timeout handed to the execution layer
    pub query_timeout_ms: Option<u64>,
    /// Rows per batch returned by in-memory streams
    pub stream_batch_size: usize,
}

/// Keyspaces and the shards serving them
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TopologyConfig {
    #[serde(default)]
    pub keyspaces: BTreeMap<String, KeyspaceTopology>,
}

/// Shards of one keyspace, named by key range ("-80", "80-") or "0" when unsharded
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeyspaceTopology {
    #[serde(default)]
    pub sharded: bool,
    pub shards: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut keyspaces = BTreeMap::new();
        keyspaces.insert(
            "main".to_string(),
            KeyspaceTopology {
                sharded: false,
                shards: vec!["0".to_string()],
            },
        );
        keyspaces.insert(
            "user".to_string(),
            KeyspaceTopology {
                sharded: true,
                shards: vec!["-80".to_string(), "80-".to_string()],
            },
        );

        Self {
            execution: ExecutionConfig::default(),
            topology: TopologyConfig { keyspaces },
            vschema_path: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_memory_rows: 300_000,
            deep_pagination_threshold: 10_000,
            multi_shard_autocommit: false,
            query_timeout_ms: None,
            stream_batch_size: 128,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ExecutionConfig {
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }
}

impl EngineConfig {
    /// Load a configuration document from a JSON file
    pub fn load(path: impl AsRef<Path>) -> GateResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            GateError::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        let mut config: EngineConfig = serde_json::from_str(&content).map_err(|e| {
            GateError::Configuration(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override settings with environment variables if present
    pub fn apply_env_overrides(&mut self) {
        if let Ok(rows) = std::env::var("SHARDGATE_MAX_MEMORY_ROWS") {
            if let Ok(rows) = rows.parse::<usize>() {
                self.execution.max_memory_rows = rows;
            }
        }

        if let Ok(threshold) = std::env::var("SHARDGATE_DEEP_PAGINATION_THRESHOLD") {
            if let Ok(threshold) = threshold.parse::<u64>() {
                self.execution.deep_pagination_threshold = threshold;
            }
        }

        if let Ok(level) = std::env::var("SHARDGATE_LOG_LEVEL") {
            if !level.trim().is_empty() {
                self.logging.level = level;
            }
        }
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> GateResult<()> {
        if self.execution.stream_batch_size == 0 {
            return Err(GateError::Configuration(
                "stream_batch_size must be greater than zero".to_string(),
            ));
        }

        for (name, keyspace) in &self.topology.keyspaces {
            if keyspace.shards.is_empty() {
                return Err(GateError::Configuration(format!(
                    "keyspace '{}' has no shards",
                    name
                )));
            }
            if !keyspace.sharded && keyspace.shards.len() > 1 {
                return Err(GateError::Configuration(format!(
                    "unsharded keyspace '{}' lists {} shards",
                    name,
                    keyspace.shards.len()
                )));
            }
        }

        Ok(())
    }
}
