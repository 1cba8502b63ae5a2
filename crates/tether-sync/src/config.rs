//! Replication policy configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::SyncError;

/// Tunables for the [`ReplicationManager`](crate::manager::ReplicationManager).
///
/// Deserializable from JSON; missing fields take their defaults.
///
/// ```
/// use tether_sync::config::SyncConfig;
///
/// let config = SyncConfig::from_json_str(r#"{ "dirty_check_interval": 4 }"#).unwrap();
/// assert_eq!(config.dirty_check_interval, 4);
/// assert!(config.full_sync_on_respawn);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Run the dirty check every N ticks. Must be at least 1; 1 checks every
    /// tick.
    pub dirty_check_interval: u32,
    /// Send a full snapshot to all observers when a host respawns.
    pub full_sync_on_respawn: bool,
}

impl Default for SyncConfig {
    /// Dirty check every tick, full sync on respawn.
    fn default() -> Self {
        Self {
            dirty_check_interval: 1,
            full_sync_on_respawn: true,
        }
    }
}

impl SyncConfig {
    /// # Errors
    ///
    /// [`SyncError::InvalidConfig`] if `dirty_check_interval` is 0.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.dirty_check_interval == 0 {
            return Err(SyncError::InvalidConfig {
                details: "dirty_check_interval must be at least 1".to_owned(),
            });
        }
        Ok(())
    }

    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self, SyncError> {
        let config: SyncConfig =
            serde_json::from_str(json).map_err(|e| SyncError::InvalidConfig {
                details: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read sync config {}: {e}", path.display()))?;
        Self::from_json_str(&text)
            .map_err(|e| anyhow::anyhow!("invalid sync config {}: {e}", path.display()))
    }
}
