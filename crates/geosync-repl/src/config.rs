//! Engine configuration: local region identity, loop intervals, and the
//! retry policy replication tasks are enqueued under.

use crate::error::SyncError;
use crate::queue::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Configuration for the replication engine.
///
/// Fields omitted from a config file fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Name of the region this process runs in. Required; the process
    /// refuses to start without it.
    pub region_name: String,
    /// Host of the local region's data store.
    pub host: String,
    /// Port of the local region's data store.
    pub port: u16,
    /// Whether this region is the primary deployment.
    pub is_primary: bool,
    /// How often the dispatcher polls for pending entries, in milliseconds.
    pub sync_interval_ms: u64,
    /// How often the health monitor samples all regions, in milliseconds.
    pub health_check_interval_ms: u64,
    /// Health ping timeout, in milliseconds. Much shorter than the check
    /// interval.
    pub ping_timeout_ms: u64,
    /// Per-attempt execution ceiling for one apply task, in milliseconds.
    pub apply_timeout_ms: u64,
    /// Pending entries loaded per dispatch poll.
    pub dispatch_batch_size: usize,
    /// Concurrent worker tasks consuming the replication queue.
    pub worker_count: usize,
    /// Redelivery policy for failed apply tasks.
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            region_name: String::new(),
            host: String::from("localhost"),
            port: 5432,
            is_primary: false,
            sync_interval_ms: 5000,
            health_check_interval_ms: 30_000,
            ping_timeout_ms: 2000,
            apply_timeout_ms: 30_000,
            dispatch_batch_size: 100,
            worker_count: 4,
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Build a config from process environment variables.
    pub fn from_env() -> Result<Self, SyncError> {
        let mut config = Self::default();
        config.apply_vars(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overlay configuration from an environment-style lookup.
    ///
    /// Unset or unparsable values leave the current setting untouched.
    pub fn apply_vars<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = get("REGION_NAME") {
            self.region_name = name;
        }
        if let Some(host) = get("DATABASE_HOST") {
            self.host = host;
        }
        if let Some(port) = get("DATABASE_PORT").and_then(|v| v.parse().ok()) {
            self.port = port;
        }
        if let Some(primary) = get("IS_PRIMARY_REGION") {
            self.is_primary = primary == "true";
        }
        if let Some(ms) = get("SYNC_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.sync_interval_ms = ms;
        }
        if let Some(ms) = get("HEALTH_CHECK_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.health_check_interval_ms = ms;
        }
    }

    /// Check that required settings are present.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.region_name.trim().is_empty() {
            return Err(SyncError::MissingConfiguration {
                key: "REGION_NAME".to_string(),
            });
        }
        Ok(())
    }
}
