use serde::{Deserialize, Serialize};

use crate::error::{ShardexError, ShardexResult};

/// Largest worker id a snowflake key generator can encode (10 bits).
pub const MAX_WORKER_ID: u64 = 1023;

/// Top-level configuration for the sharding core (`shardex.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardexConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub keygen: KeyGenConfig,
    /// Log every logical statement and its rewritten per-shard SQL at `info`.
    #[serde(default)]
    pub sql_show: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum worker threads used to fan out one logical call.
    pub executor_size: usize,
    /// Connections one logical call may hold per shard. When a shard receives
    /// more route units than this, its units share connections and run serially.
    pub max_connections_per_query: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            executor_size: cpus,
            max_connections_per_query: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Upper bound on rows held in memory by a materialising merge.
    pub max_rows_buffered: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_rows_buffered: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyGenConfig {
    /// Snowflake worker id (0..=1023).
    pub worker_id: u64,
    /// How far the wall clock may step backwards before key generation fails.
    pub max_tolerate_time_difference_ms: u64,
}

impl Default for KeyGenConfig {
    fn default() -> Self {
        Self {
            worker_id: 0,
            max_tolerate_time_difference_ms: 10,
        }
    }
}

impl ShardexConfig {
    pub fn validate(&self) -> ShardexResult<()> {
        if self.executor.executor_size == 0 {
            return Err(ShardexError::Config(
                "executor.executor_size must be > 0".into(),
            ));
        }
        if self.executor.max_connections_per_query == 0 {
            return Err(ShardexError::Config(
                "executor.max_connections_per_query must be > 0".into(),
            ));
        }
        if self.merge.max_rows_buffered == 0 {
            return Err(ShardexError::Config(
                "merge.max_rows_buffered must be > 0".into(),
            ));
        }
        if self.keygen.worker_id > MAX_WORKER_ID {
            return Err(ShardexError::Config(format!(
                "keygen.worker_id {} out of range 0..={}",
                self.keygen.worker_id, MAX_WORKER_ID
            )));
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> ShardexResult<Self> {
        let config: ShardexConfig =
            toml::from_str(text).map_err(|e| ShardexError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, falling back to defaults when the file is missing or invalid.
    pub fn load_or_default(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match Self::from_toml_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path);
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse config {}: {}, using defaults", path, e);
                    ShardexConfig::default()
                }
            },
            Err(_) => {
                tracing::info!("Config file {} not found, using defaults", path);
                ShardexConfig::default()
            }
        }
    }
}
