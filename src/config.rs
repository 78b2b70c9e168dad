//! Graph configuration
//!
//! Loaded from YAML or built in code:
//!
//! ```yaml
//! path: ./graphdex_data
//! storage: rocks_db
//! index:
//!   refresh:
//!     mode: background
//!     min_stale_ms: 10
//!     max_stale_ms: 1000
//!   wait_timeout_ms: 5000
//! events: on_commit
//! ```

use crate::graph::event::EventDelivery;
use crate::index::RefreshPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Value out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Source of the root storage path (`GetPath`)
pub trait GraphConfiguration {
    fn path(&self) -> &Path;
}

/// Key/value backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Process-lifetime storage; `path` only names the instance
    #[default]
    Memory,
    /// RocksDB database under `path`
    RocksDb,
}

/// Indexing service settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub refresh: RefreshPolicy,
    /// Staleness bound of `wait_for_generation`
    pub wait_timeout_ms: u64,
    pub default_hits_limit: usize,
    /// Persist committed index state next to a RocksDB backend
    pub persist: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            refresh: RefreshPolicy::Immediate,
            wait_timeout_ms: 5_000,
            default_hits_limit: 1_000,
            persist: true,
        }
    }
}

/// Everything needed to open a graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub path: PathBuf,
    pub storage: StorageKind,
    pub index: IndexConfig,
    pub events: EventDelivery,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./graphdex_data"),
            storage: StorageKind::Memory,
            index: IndexConfig::default(),
            events: EventDelivery::Immediate,
        }
    }
}

impl GraphConfig {
    /// In-memory graph
    pub fn memory() -> Self {
        Self::default()
    }

    /// RocksDB-backed graph under `path`
    pub fn rocksdb(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            storage: StorageKind::RocksDb,
            ..Self::default()
        }
    }

    pub fn with_refresh(mut self, refresh: RefreshPolicy) -> Self {
        self.index.refresh = refresh;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.index.wait_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_hits_limit(mut self, hits: usize) -> Self {
        self.index.default_hits_limit = hits;
        self
    }

    pub fn with_index_persistence(mut self, persist: bool) -> Self {
        self.index.persist = persist;
        self
    }

    pub fn with_events(mut self, events: EventDelivery) -> Self {
        self.events = events;
        self
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: GraphConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.index.default_hits_limit == 0 {
            return Err(ConfigError::Invalid("default_hits_limit must be positive".to_string()));
        }
        if let RefreshPolicy::Background {
            min_stale_ms,
            max_stale_ms,
        } = self.index.refresh
        {
            if max_stale_ms == 0 || min_stale_ms > max_stale_ms {
                return Err(ConfigError::Invalid(format!(
                    "refresh window {}..{} ms is empty",
                    min_stale_ms, max_stale_ms
                )));
            }
        }
        Ok(())
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.index.wait_timeout_ms)
    }

    /// Directory for index snapshots, when they are persisted
    pub fn index_dir(&self) -> Option<PathBuf> {
        match (self.storage, self.index.persist) {
            (StorageKind::RocksDb, true) => Some(self.path.join("index")),
            _ => None,
        }
    }

    /// Directory of the RocksDB database
    pub fn storage_dir(&self) -> PathBuf {
        self.path.join("kv")
    }
}

impl GraphConfiguration for GraphConfig {
    fn path(&self) -> &Path {
        &self.path
    }
}
