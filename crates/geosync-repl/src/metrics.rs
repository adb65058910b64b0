//! Replication status and per-region metrics reports.
//!
//! Read-only aggregations over the store, served to operators through the
//! management API. Failures are never surfaced synchronously to writers, so
//! these reports are the only place a stuck or failing replication shows up.

use crate::error::SyncError;
use crate::log::{EntryStatus, ReplicationEntry};
use crate::region::Region;
use crate::store::SyncStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Entry-level counters across the whole log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationStats {
    /// Entries waiting for dispatch.
    pub pending_count: u64,
    /// Entries whose rollup is FAILED.
    pub failed_count: u64,
    /// Entries fully applied on every target.
    pub completed_count: u64,
}

/// Operator-facing snapshot of the replication engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// The region this process runs in.
    pub current_region: Region,
    /// Entry-level counters.
    pub stats: ReplicationStats,
    /// The ten most recently created entries, newest first.
    pub recent_entries: Vec<ReplicationEntry>,
    /// Every known region with its derived health fields.
    pub regions: Vec<Region>,
}

/// Per-target-region replication counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionMetrics {
    /// The target region the counters describe.
    pub region_id: Uuid,
    /// All target states for this region.
    pub total_count: u64,
    /// Target states still pending.
    pub pending_count: u64,
    /// Target states that dead-lettered.
    pub failed_count: u64,
    /// Mean seconds from entry creation to completion on this region.
    pub avg_latency_seconds: f64,
}

/// Builds status and metrics reports from the store.
pub struct MetricsReporter {
    store: Arc<dyn SyncStore>,
    source_region: Uuid,
}

impl MetricsReporter {
    /// Create a reporter for the given local region.
    pub fn new(store: Arc<dyn SyncStore>, source_region: Uuid) -> Self {
        Self {
            store,
            source_region,
        }
    }

    /// The full engine snapshot served by the status endpoint.
    pub async fn status_report(&self) -> Result<StatusReport, SyncError> {
        let current_region = self
            .store
            .region(self.source_region)
            .await?
            .ok_or(SyncError::RegionNotFound {
                region_id: self.source_region,
            })?;

        let pending_count = self.store.count_entries(Some(EntryStatus::Pending)).await?;
        let failed_count = self.store.count_entries(Some(EntryStatus::Failed)).await?;
        let completed_count = self
            .store
            .count_entries(Some(EntryStatus::Completed))
            .await?;

        Ok(StatusReport {
            current_region,
            stats: ReplicationStats {
                pending_count,
                failed_count,
                completed_count,
            },
            recent_entries: self.store.recent_entries(10).await?,
            regions: self.store.regions().await?,
        })
    }

    /// Per-target counters for one region.
    pub async fn region_metrics(&self, region_id: Uuid) -> Result<RegionMetrics, SyncError> {
        let total_count = self.store.count_target_states(region_id, None).await?;
        let pending_count = self
            .store
            .count_target_states(region_id, Some(EntryStatus::Pending))
            .await?;
        let failed_count = self
            .store
            .count_target_states(region_id, Some(EntryStatus::Failed))
            .await?;
        let avg_latency_seconds = self.store.avg_lag_seconds(region_id).await?;

        Ok(RegionMetrics {
            region_id,
            total_count,
            pending_count,
            failed_count,
            avg_latency_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{JsonMap, Operation, SyncTable, TargetState};
    use crate::store::MemStore;
    use chrono::Duration;

    async fn seed_region(store: &Arc<MemStore>, name: &str) -> Region {
        let region = Region::new(name, &format!("db-{name}"), 5432);
        store.insert_region(region.clone()).await.unwrap();
        region
    }

    async fn seed_entry(
        store: &Arc<MemStore>,
        source: Uuid,
        record: &str,
        sequence: u64,
        status: EntryStatus,
    ) -> ReplicationEntry {
        let mut entry = ReplicationEntry::new(
            SyncTable::Messages,
            record,
            Operation::Update,
            JsonMap::new(),
            None,
            source,
            sequence,
        );
        entry.status = status;
        store.insert_entry(entry.clone()).await.unwrap();
        entry
    }

    #[tokio::test]
    async fn test_status_report_counts_and_recent_entries() {
        let store = Arc::new(MemStore::new());
        let local = seed_region(&store, "us-east-1").await;
        seed_region(&store, "eu-west-1").await;

        seed_entry(&store, local.id, "m1", 1, EntryStatus::Pending).await;
        seed_entry(&store, local.id, "m2", 2, EntryStatus::Failed).await;
        seed_entry(&store, local.id, "m3", 3, EntryStatus::Completed).await;
        seed_entry(&store, local.id, "m4", 4, EntryStatus::Completed).await;

        let reporter = MetricsReporter::new(store, local.id);
        let report = reporter.status_report().await.unwrap();

        assert_eq!(report.current_region.id, local.id);
        assert_eq!(report.stats.pending_count, 1);
        assert_eq!(report.stats.failed_count, 1);
        assert_eq!(report.stats.completed_count, 2);
        assert_eq!(report.recent_entries.len(), 4);
        assert_eq!(report.regions.len(), 2);
    }

    #[tokio::test]
    async fn test_status_report_caps_recent_entries_at_ten() {
        let store = Arc::new(MemStore::new());
        let local = seed_region(&store, "us-east-1").await;
        for seq in 1..=12u64 {
            seed_entry(&store, local.id, &format!("m{seq}"), seq, EntryStatus::Pending).await;
        }

        let reporter = MetricsReporter::new(store, local.id);
        let report = reporter.status_report().await.unwrap();
        assert_eq!(report.recent_entries.len(), 10);
    }

    #[tokio::test]
    async fn test_status_report_without_local_region_row() {
        let store = Arc::new(MemStore::new());
        let reporter = MetricsReporter::new(store, Uuid::new_v4());
        let err = reporter.status_report().await.unwrap_err();
        assert!(matches!(err, SyncError::RegionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_region_metrics_counts_and_latency() {
        let store = Arc::new(MemStore::new());
        let local = seed_region(&store, "us-east-1").await;
        let target = seed_region(&store, "eu-west-1").await;

        let completed = seed_entry(&store, local.id, "m1", 1, EntryStatus::Completed).await;
        let mut state = TargetState::pending(completed.id, target.id);
        state.status = EntryStatus::Completed;
        state.started_at = Some(completed.created_at + Duration::seconds(1));
        state.completed_at = Some(completed.created_at + Duration::seconds(3));
        store.upsert_target_state(state).await.unwrap();

        let pending = seed_entry(&store, local.id, "m2", 2, EntryStatus::InProgress).await;
        store
            .upsert_target_state(TargetState::pending(pending.id, target.id))
            .await
            .unwrap();

        let failed = seed_entry(&store, local.id, "m3", 3, EntryStatus::Failed).await;
        let mut state = TargetState::pending(failed.id, target.id);
        state.status = EntryStatus::Failed;
        store.upsert_target_state(state).await.unwrap();

        let reporter = MetricsReporter::new(store, local.id);
        let metrics = reporter.region_metrics(target.id).await.unwrap();

        assert_eq!(metrics.total_count, 3);
        assert_eq!(metrics.pending_count, 1);
        assert_eq!(metrics.failed_count, 1);
        assert!((metrics.avg_latency_seconds - 3.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_region_metrics_empty_region() {
        let store = Arc::new(MemStore::new());
        let local = seed_region(&store, "us-east-1").await;
        let reporter = MetricsReporter::new(store, local.id);

        let metrics = reporter.region_metrics(Uuid::new_v4()).await.unwrap();
        assert_eq!(metrics.total_count, 0);
        assert_eq!(metrics.avg_latency_seconds, 0.0);
    }

    #[tokio::test]
    async fn test_reports_propagate_storage_outage() {
        let store = Arc::new(MemStore::new());
        let local = seed_region(&store, "us-east-1").await;
        let reporter = MetricsReporter::new(store.clone(), local.id);
        store.set_unavailable(true);

        assert!(matches!(
            reporter.status_report().await.unwrap_err(),
            SyncError::StorageUnavailable { .. }
        ));
        assert!(matches!(
            reporter.region_metrics(local.id).await.unwrap_err(),
            SyncError::StorageUnavailable { .. }
        ));
    }
}
