//! Process configuration for the management binary.

use geosync_repl::config::SyncConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Configuration for the `gs-mgmt` process: where the operator API listens
/// and how the replication engine behaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MgmtConfig {
    /// Address the operator API binds to.
    pub bind_addr: SocketAddr,
    /// Replication engine configuration.
    pub sync: SyncConfig,
}

impl Default for MgmtConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8443)),
            sync: SyncConfig::default(),
        }
    }
}

impl MgmtConfig {
    /// Load configuration from a TOML or JSON file, by extension.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: MgmtConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: MgmtConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = MgmtConfig::default();
        assert_eq!(config.bind_addr, SocketAddr::from(([0, 0, 0, 0], 8443)));
        assert!(config.sync.region_name.is_empty());
        assert_eq!(config.sync.sync_interval_ms, 5000);
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
bind_addr = "10.0.0.1:8080"

[sync]
region_name = "us-east-1"
is_primary = true
sync_interval_ms = 1000
            "#
        )
        .unwrap();

        let config = MgmtConfig::from_file(file.path()).unwrap();
        assert_eq!(config.bind_addr, SocketAddr::from(([10, 0, 0, 1], 8080)));
        assert_eq!(config.sync.region_name, "us-east-1");
        assert!(config.sync.is_primary);
        assert_eq!(config.sync.sync_interval_ms, 1000);
        // Unset fields keep their defaults.
        assert_eq!(config.sync.health_check_interval_ms, 30_000);
        assert_eq!(config.sync.retry.max_attempts, 3);
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(
            file,
            r#"{{
                "bind_addr": "127.0.0.1:9000",
                "sync": {{
                    "region_name": "eu-west-1",
                    "host": "db.eu-west-1.internal"
                }}
            }}"#
        )
        .unwrap();

        let config = MgmtConfig::from_file(file.path()).unwrap();
        assert_eq!(config.bind_addr, SocketAddr::from(([127, 0, 0, 1], 9000)));
        assert_eq!(config.sync.region_name, "eu-west-1");
        assert_eq!(config.sync.host, "db.eu-west-1.internal");
    }

    #[test]
    fn test_unsupported_extension_rejected() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(file, "bind_addr: 0.0.0.0:1").unwrap();
        assert!(MgmtConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_serialization_round_trip() {
        let mut config = MgmtConfig::default();
        config.sync.region_name = "ap-south-1".to_string();
        let json = serde_json::to_string(&config).unwrap();
        let decoded: MgmtConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, config);
    }
}
