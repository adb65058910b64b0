//! Region health monitoring.
//!
//! On a fixed interval the monitor pings every region's store, aggregates
//! replication metrics, and derives a composite ACTIVE/DEGRADED/INACTIVE
//! status that is cached in-process and written back to the region row. The
//! dispatcher reads those rows to decide which regions are eligible fan-out
//! targets.

use crate::error::SyncError;
use crate::link::RegionRouter;
use crate::log::EntryStatus;
use crate::region::{Region, RegionStatus};
use crate::store::SyncStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Thresholds for deriving a region's status from its measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// Ping latency above this is degraded, in milliseconds.
    pub degraded_latency_ms: f64,
    /// Ping latency above this is inactive, in milliseconds.
    pub inactive_latency_ms: f64,
    /// Replication lag above this is degraded, in seconds.
    pub degraded_lag_secs: f64,
    /// Replication lag above this is inactive, in seconds.
    pub inactive_lag_secs: f64,
    /// Success rate below this is degraded, in percent.
    pub degraded_success_rate: f64,
    /// Success rate below this is inactive, in percent.
    pub inactive_success_rate: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            degraded_latency_ms: 1000.0,
            inactive_latency_ms: 5000.0,
            degraded_lag_secs: 300.0,
            inactive_lag_secs: 900.0,
            degraded_success_rate: 95.0,
            inactive_success_rate: 80.0,
        }
    }
}

impl HealthThresholds {
    /// Derive a status from measurements; the most severe breach wins.
    pub fn classify(&self, latency_ms: f64, lag_secs: f64, success_rate: f64) -> RegionStatus {
        if latency_ms > self.inactive_latency_ms
            || lag_secs > self.inactive_lag_secs
            || success_rate < self.inactive_success_rate
        {
            return RegionStatus::Inactive;
        }
        if latency_ms > self.degraded_latency_ms
            || lag_secs > self.degraded_lag_secs
            || success_rate < self.degraded_success_rate
        {
            return RegionStatus::Degraded;
        }
        RegionStatus::Active
    }
}

/// Replication metrics sampled for one region.
///
/// Counts are `-1` when the region could not be measured at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthMetrics {
    /// Target states still pending for this region.
    pub pending_replications: i64,
    /// Target states that dead-lettered for this region.
    pub failed_replications: i64,
    /// Percentage of target states that did not fail; 100 when none exist.
    pub success_rate: f64,
    /// Mean seconds between a worker picking a task up and completing it.
    pub avg_processing_secs: f64,
}

/// One region's health snapshot, as cached after a check cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionHealth {
    /// The sampled region.
    pub region_id: Uuid,
    /// The region's name.
    pub region_name: String,
    /// Derived status.
    pub status: RegionStatus,
    /// Measured ping round-trip, in milliseconds; `-1` when unreachable.
    pub latency_ms: f64,
    /// Mean replication lag, in seconds; `-1` when unreachable.
    pub replication_lag_secs: f64,
    /// Sampled replication metrics.
    pub metrics: HealthMetrics,
    /// When the sample was taken.
    pub last_checked: DateTime<Utc>,
}

impl RegionHealth {
    /// Snapshot for a region whose store did not answer the ping.
    fn unreachable(region: &Region) -> Self {
        Self {
            region_id: region.id,
            region_name: region.name.clone(),
            status: RegionStatus::Inactive,
            latency_ms: -1.0,
            replication_lag_secs: -1.0,
            metrics: HealthMetrics {
                pending_replications: -1,
                failed_replications: -1,
                success_rate: 0.0,
                avg_processing_secs: -1.0,
            },
            last_checked: Utc::now(),
        }
    }

    /// Snapshot for a region whose metrics could not be gathered.
    fn check_failed(region: &Region) -> Self {
        Self {
            status: RegionStatus::Degraded,
            ..Self::unreachable(region)
        }
    }
}

/// Aggregate health across all regions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    /// Number of known regions.
    pub total_regions: usize,
    /// Regions currently ACTIVE.
    pub active_regions: usize,
    /// Regions currently DEGRADED.
    pub degraded_regions: usize,
    /// Regions currently INACTIVE.
    pub inactive_regions: usize,
    /// Worst-case rollup across all regions.
    pub overall_health: OverallHealth,
}

/// Cluster-level health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    /// Every region is active.
    Healthy,
    /// At least one region is degraded.
    Warning,
    /// At least one region is inactive.
    Critical,
}

/// Samples region health and keeps the registry's derived fields current.
pub struct HealthMonitor {
    store: Arc<dyn SyncStore>,
    router: Arc<dyn RegionRouter>,
    thresholds: HealthThresholds,
    ping_timeout: Duration,
    cache: DashMap<Uuid, RegionHealth>,
}

impl HealthMonitor {
    /// Create a monitor with the given thresholds and ping timeout.
    pub fn new(
        store: Arc<dyn SyncStore>,
        router: Arc<dyn RegionRouter>,
        thresholds: HealthThresholds,
        ping_timeout: Duration,
    ) -> Self {
        Self {
            store,
            router,
            thresholds,
            ping_timeout,
            cache: DashMap::new(),
        }
    }

    /// Run one health cycle over every known region.
    ///
    /// Each region's snapshot is cached and its derived fields written back
    /// to the registry. A region whose metrics cannot be gathered is cached
    /// as degraded and skipped for write-back; the next cycle retries it.
    pub async fn check_all(&self) -> Result<(), SyncError> {
        let regions = self.store.regions().await?;
        for region in regions {
            match self.check_region(&region).await {
                Ok(health) => {
                    self.store
                        .update_region_health(
                            region.id,
                            health.status,
                            health.latency_ms,
                            health.replication_lag_secs,
                        )
                        .await?;
                    self.cache.insert(region.id, health);
                }
                Err(e) => {
                    tracing::warn!(region = %region.name, error = %e, "health check failed");
                    self.cache.insert(region.id, RegionHealth::check_failed(&region));
                }
            }
        }
        Ok(())
    }

    /// Sample one region: ping its store, then aggregate replication metrics.
    pub async fn check_region(&self, region: &Region) -> Result<RegionHealth, SyncError> {
        let link = match self.router.link(region) {
            Some(link) => link,
            None => return Ok(RegionHealth::unreachable(region)),
        };

        let latency_ms = match tokio::time::timeout(self.ping_timeout, link.ping()).await {
            Ok(Ok(rtt)) => rtt.as_secs_f64() * 1000.0,
            Ok(Err(_)) | Err(_) => return Ok(RegionHealth::unreachable(region)),
        };

        let pending = self
            .store
            .count_target_states(region.id, Some(EntryStatus::Pending))
            .await?;
        let failed = self
            .store
            .count_target_states(region.id, Some(EntryStatus::Failed))
            .await?;
        let total = self.store.count_target_states(region.id, None).await?;
        let lag_secs = self.store.avg_lag_seconds(region.id).await?;
        let processing_secs = self.store.avg_processing_seconds(region.id).await?;

        let success_rate = if total > 0 {
            (total - failed) as f64 / total as f64 * 100.0
        } else {
            100.0
        };

        Ok(RegionHealth {
            region_id: region.id,
            region_name: region.name.clone(),
            status: self.thresholds.classify(latency_ms, lag_secs, success_rate),
            latency_ms,
            replication_lag_secs: lag_secs,
            metrics: HealthMetrics {
                pending_replications: pending as i64,
                failed_replications: failed as i64,
                success_rate,
                avg_processing_secs: processing_secs,
            },
            last_checked: Utc::now(),
        })
    }

    /// The cached snapshot for one region, if it has been sampled.
    pub fn region_health(&self, region_id: Uuid) -> Option<RegionHealth> {
        self.cache.get(&region_id).map(|h| h.clone())
    }

    /// Cached snapshots for every sampled region, ordered by name.
    pub fn all_region_health(&self) -> Vec<RegionHealth> {
        let mut snapshots: Vec<RegionHealth> =
            self.cache.iter().map(|entry| entry.value().clone()).collect();
        snapshots.sort_by(|a, b| a.region_name.cmp(&b.region_name));
        snapshots
    }

    /// Aggregate counts per status and the worst-case overall rollup.
    ///
    /// Regions not yet sampled fall back to their registry status, so the
    /// summary is meaningful before the first cycle completes.
    pub async fn health_summary(&self) -> Result<HealthSummary, SyncError> {
        let regions = self.store.regions().await?;
        let mut summary = HealthSummary {
            total_regions: regions.len(),
            active_regions: 0,
            degraded_regions: 0,
            inactive_regions: 0,
            overall_health: OverallHealth::Healthy,
        };

        for region in &regions {
            let status = self
                .cache
                .get(&region.id)
                .map(|h| h.status)
                .unwrap_or(region.status);
            match status {
                RegionStatus::Active => summary.active_regions += 1,
                RegionStatus::Degraded => summary.degraded_regions += 1,
                RegionStatus::Inactive => summary.inactive_regions += 1,
            }
        }

        summary.overall_health = if summary.inactive_regions > 0 {
            OverallHealth::Critical
        } else if summary.degraded_regions > 0 {
            OverallHealth::Warning
        } else {
            OverallHealth::Healthy
        };
        Ok(summary)
    }
}
