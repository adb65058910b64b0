//! Region records: identity, network address, and derived health fields.
//!
//! A region is an independently deployed instance of the backend with its own
//! data store. Rows are created once at process start (self-registration) and
//! mutated only by the health monitor afterwards.

use crate::log::JsonMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Health classification of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionStatus {
    /// Region is reachable and replicating within thresholds.
    Active,
    /// Region is reachable but latency, lag, or success rate is degraded.
    Degraded,
    /// Region is unreachable or far outside thresholds.
    Inactive,
}

/// Record of a known region in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Unique region identifier.
    pub id: Uuid,
    /// Unique human-readable name, e.g. "us-east-1".
    pub name: String,
    /// Host of the region's data store.
    pub host: String,
    /// Port of the region's data store.
    pub port: u16,
    /// Ordering hint used as a tie-break when routing.
    pub priority: i32,
    /// Current health classification.
    pub status: RegionStatus,
    /// Whether this region is the primary deployment.
    pub is_primary: bool,
    /// Average replication lag in seconds, written by the health monitor.
    pub replication_lag: f64,
    /// Last measured ping latency in milliseconds, written by the health monitor.
    pub latency: f64,
    /// Free-form metadata.
    pub metadata: Option<JsonMap>,
    /// When the region row was created.
    pub created_at: DateTime<Utc>,
    /// When the region row was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Region {
    /// Create a new active region record with default priority.
    pub fn new(name: &str, host: &str, port: u16) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            host: host.to_string(),
            port,
            priority: 1,
            status: RegionStatus::Active,
            is_primary: false,
            replication_lag: 0.0,
            latency: 0.0,
            metadata: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_region_defaults() {
        let region = Region::new("us-east-1", "db.us-east-1.internal", 5432);
        assert_eq!(region.name, "us-east-1");
        assert_eq!(region.host, "db.us-east-1.internal");
        assert_eq!(region.port, 5432);
        assert_eq!(region.priority, 1);
        assert_eq!(region.status, RegionStatus::Active);
        assert!(!region.is_primary);
        assert_eq!(region.replication_lag, 0.0);
        assert_eq!(region.latency, 0.0);
        assert!(region.metadata.is_none());
    }

    #[test]
    fn test_region_ids_are_unique() {
        let a = Region::new("a", "host-a", 5432);
        let b = Region::new("b", "host-b", 5432);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&RegionStatus::Active).unwrap(),
            "\"active\""
        );
        assert_eq!(
            serde_json::to_string(&RegionStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&RegionStatus::Inactive).unwrap(),
            "\"inactive\""
        );
    }

    #[test]
    fn test_region_round_trip() {
        let region = Region::new("eu-west-1", "db.eu-west-1.internal", 5433);
        let json = serde_json::to_string(&region).unwrap();
        let decoded: Region = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, region);
    }
}
