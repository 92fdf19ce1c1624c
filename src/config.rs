//! Manager configuration.
//!
//! Plain serde struct with defaults; optionally stored as JSON next to
//! whatever process hosts the manager.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

/// Tunables for a `GraphManager`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ManagerConfig {
    /// Shards created for a new graph (explicit or implicit).
    pub initial_shards: usize,

    /// Default `row_exists` wait, in milliseconds.
    pub probe_timeout_ms: u64,

    /// Longest accepted graph name, in bytes.
    pub max_graph_name_len: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            initial_shards: 1,
            probe_timeout_ms: 10_000,
            max_graph_name_len: 256,
        }
    }
}

impl ManagerConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_shards == 0 {
            return Err(GraphError::InvalidArgument(
                "initial_shards must be > 0".to_string(),
            ));
        }
        if self.max_graph_name_len == 0 {
            return Err(GraphError::InvalidArgument(
                "max_graph_name_len must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Read config from a JSON file. Returns None if the file doesn't exist.
    pub fn read_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(Some(config))
    }

    /// Write config to a JSON file.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
