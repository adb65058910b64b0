//! Control-plane storage port and in-memory reference implementation.
//!
//! The engine treats the relational store as a durable table/record store
//! behind [`SyncStore`]; every query the replication loop needs is a method
//! here. [`MemStore`] backs tests and single-node deployments.

use crate::conflict::ConflictRecord;
use crate::error::SyncError;
use crate::log::{rollup_entry_status, EntryStatus, ReplicationEntry, SyncTable, TargetState};
use crate::region::{Region, RegionStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Durable store for regions, replication entries, per-target states, and
/// conflict records.
///
/// A relational implementation needs indices on `(table, record_id)` for the
/// log and conflict tables, and on `(sequence)`, `(timestamp)`, and
/// `(source_region, region_id, status)` for the log and target-state tables,
/// or the conflict check and dispatch polls degrade to full scans.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Persist a new region row.
    async fn insert_region(&self, region: Region) -> Result<(), SyncError>;
    /// Fetch a region by id.
    async fn region(&self, id: Uuid) -> Result<Option<Region>, SyncError>;
    /// Fetch a region by its unique name.
    async fn region_by_name(&self, name: &str) -> Result<Option<Region>, SyncError>;
    /// All known regions.
    async fn regions(&self) -> Result<Vec<Region>, SyncError>;
    /// Regions eligible as fan-out targets: ACTIVE and not the source.
    async fn active_targets(&self, source: Uuid) -> Result<Vec<Region>, SyncError>;
    /// Write health-derived fields back onto a region row.
    async fn update_region_health(
        &self,
        id: Uuid,
        status: RegionStatus,
        latency: f64,
        replication_lag: f64,
    ) -> Result<(), SyncError>;

    /// Persist a new replication entry.
    async fn insert_entry(&self, entry: ReplicationEntry) -> Result<(), SyncError>;
    /// Fetch an entry by id.
    async fn entry(&self, id: Uuid) -> Result<Option<ReplicationEntry>, SyncError>;
    /// Pending entries from a source region, ordered by sequence ascending.
    async fn pending_entries(
        &self,
        source: Uuid,
        limit: usize,
    ) -> Result<Vec<ReplicationEntry>, SyncError>;
    /// Overwrite an entry's rollup status.
    async fn set_entry_status(&self, id: Uuid, status: EntryStatus) -> Result<(), SyncError>;
    /// Most recently created entries, newest first.
    async fn recent_entries(&self, limit: usize) -> Result<Vec<ReplicationEntry>, SyncError>;
    /// Count entries, optionally filtered by rollup status.
    async fn count_entries(&self, status: Option<EntryStatus>) -> Result<u64, SyncError>;
    /// Recompute an entry's rollup status fields from its target states.
    async fn refresh_entry_rollup(&self, log_id: Uuid) -> Result<EntryStatus, SyncError>;

    /// Insert or replace the state for one `(entry, target)` pair.
    async fn upsert_target_state(&self, state: TargetState) -> Result<(), SyncError>;
    /// Fetch the state for one `(entry, target)` pair.
    async fn target_state(
        &self,
        log_id: Uuid,
        region_id: Uuid,
    ) -> Result<Option<TargetState>, SyncError>;
    /// All target states for an entry.
    async fn target_states_for_entry(&self, log_id: Uuid) -> Result<Vec<TargetState>, SyncError>;
    /// Count target states for a region, optionally filtered by status.
    async fn count_target_states(
        &self,
        region_id: Uuid,
        status: Option<EntryStatus>,
    ) -> Result<u64, SyncError>;
    /// The newest entry for `(table, record_id)` that completed on the given
    /// target, excluding one entry id.
    async fn latest_completed_entry(
        &self,
        table: SyncTable,
        record_id: &str,
        region_id: Uuid,
        exclude: Uuid,
    ) -> Result<Option<ReplicationEntry>, SyncError>;
    /// Mean seconds between entry creation and target completion.
    async fn avg_lag_seconds(&self, region_id: Uuid) -> Result<f64, SyncError>;
    /// Mean seconds between a worker picking a task up and completing it.
    async fn avg_processing_seconds(&self, region_id: Uuid) -> Result<f64, SyncError>;

    /// Persist a new conflict record.
    async fn insert_conflict(&self, conflict: ConflictRecord) -> Result<(), SyncError>;
    /// Fetch a conflict by id.
    async fn conflict(&self, id: Uuid) -> Result<Option<ConflictRecord>, SyncError>;
    /// Overwrite a conflict record.
    async fn update_conflict(&self, conflict: ConflictRecord) -> Result<(), SyncError>;
}

#[derive(Default)]
struct Inner {
    regions: HashMap<Uuid, Region>,
    entries: HashMap<Uuid, ReplicationEntry>,
    targets: HashMap<(Uuid, Uuid), TargetState>,
    conflicts: HashMap<Uuid, ConflictRecord>,
}

/// In-memory [`SyncStore`] with an outage switch for tests.
#[derive(Default)]
pub struct MemStore {
    inner: RwLock<Inner>,
    unavailable: AtomicBool,
}

impl MemStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store being unreachable; every call fails until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), SyncError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SyncError::StorageUnavailable {
                msg: "store offline".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SyncStore for MemStore {
    async fn insert_region(&self, region: Region) -> Result<(), SyncError> {
        self.check()?;
        let mut inner = self.inner.write().await;
        inner.regions.insert(region.id, region);
        Ok(())
    }

    async fn region(&self, id: Uuid) -> Result<Option<Region>, SyncError> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner.regions.get(&id).cloned())
    }

    async fn region_by_name(&self, name: &str) -> Result<Option<Region>, SyncError> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner.regions.values().find(|r| r.name == name).cloned())
    }

    async fn regions(&self) -> Result<Vec<Region>, SyncError> {
        self.check()?;
        let inner = self.inner.read().await;
        let mut regions: Vec<Region> = inner.regions.values().cloned().collect();
        regions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(regions)
    }

    async fn active_targets(&self, source: Uuid) -> Result<Vec<Region>, SyncError> {
        self.check()?;
        let inner = self.inner.read().await;
        let mut targets: Vec<Region> = inner
            .regions
            .values()
            .filter(|r| r.id != source && r.status == RegionStatus::Active)
            .cloned()
            .collect();
        targets.sort_by_key(|r| (r.priority, r.name.clone()));
        Ok(targets)
    }

    async fn update_region_health(
        &self,
        id: Uuid,
        status: RegionStatus,
        latency: f64,
        replication_lag: f64,
    ) -> Result<(), SyncError> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let region = inner
            .regions
            .get_mut(&id)
            .ok_or(SyncError::RegionNotFound { region_id: id })?;
        region.status = status;
        region.latency = latency;
        region.replication_lag = replication_lag;
        region.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn insert_entry(&self, entry: ReplicationEntry) -> Result<(), SyncError> {
        self.check()?;
        let mut inner = self.inner.write().await;
        inner.entries.insert(entry.id, entry);
        Ok(())
    }

    async fn entry(&self, id: Uuid) -> Result<Option<ReplicationEntry>, SyncError> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner.entries.get(&id).cloned())
    }

    async fn pending_entries(
        &self,
        source: Uuid,
        limit: usize,
    ) -> Result<Vec<ReplicationEntry>, SyncError> {
        self.check()?;
        let inner = self.inner.read().await;
        let mut pending: Vec<ReplicationEntry> = inner
            .entries
            .values()
            .filter(|e| e.source_region == source && e.status == EntryStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.sequence);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn set_entry_status(&self, id: Uuid, status: EntryStatus) -> Result<(), SyncError> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let entry = inner
            .entries
            .get_mut(&id)
            .ok_or(SyncError::EntryNotFound { log_id: id })?;
        entry.status = status;
        Ok(())
    }

    async fn recent_entries(&self, limit: usize) -> Result<Vec<ReplicationEntry>, SyncError> {
        self.check()?;
        let inner = self.inner.read().await;
        let mut entries: Vec<ReplicationEntry> = inner.entries.values().cloned().collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.sequence.cmp(&a.sequence)));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn count_entries(&self, status: Option<EntryStatus>) -> Result<u64, SyncError> {
        self.check()?;
        let inner = self.inner.read().await;
        let count = inner
            .entries
            .values()
            .filter(|e| status.is_none_or(|s| e.status == s))
            .count();
        Ok(count as u64)
    }

    async fn refresh_entry_rollup(&self, log_id: Uuid) -> Result<EntryStatus, SyncError> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let states: Vec<TargetState> = inner
            .targets
            .values()
            .filter(|s| s.log_id == log_id)
            .cloned()
            .collect();
        let entry = inner
            .entries
            .get_mut(&log_id)
            .ok_or(SyncError::EntryNotFound { log_id })?;
        let status = rollup_entry_status(&states);
        entry.status = status;
        entry.retry_count = states.iter().map(|s| s.retry_count).max().unwrap_or(0);
        entry.error_message = states.iter().find_map(|s| s.error_message.clone());
        Ok(status)
    }

    async fn upsert_target_state(&self, state: TargetState) -> Result<(), SyncError> {
        self.check()?;
        let mut inner = self.inner.write().await;
        inner.targets.insert((state.log_id, state.region_id), state);
        Ok(())
    }

    async fn target_state(
        &self,
        log_id: Uuid,
        region_id: Uuid,
    ) -> Result<Option<TargetState>, SyncError> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner.targets.get(&(log_id, region_id)).cloned())
    }

    async fn target_states_for_entry(&self, log_id: Uuid) -> Result<Vec<TargetState>, SyncError> {
        self.check()?;
        let inner = self.inner.read().await;
        let mut states: Vec<TargetState> = inner
            .targets
            .values()
            .filter(|s| s.log_id == log_id)
            .cloned()
            .collect();
        states.sort_by_key(|s| s.region_id);
        Ok(states)
    }

    async fn count_target_states(
        &self,
        region_id: Uuid,
        status: Option<EntryStatus>,
    ) -> Result<u64, SyncError> {
        self.check()?;
        let inner = self.inner.read().await;
        let count = inner
            .targets
            .values()
            .filter(|s| s.region_id == region_id && status.is_none_or(|st| s.status == st))
            .count();
        Ok(count as u64)
    }

    async fn latest_completed_entry(
        &self,
        table: SyncTable,
        record_id: &str,
        region_id: Uuid,
        exclude: Uuid,
    ) -> Result<Option<ReplicationEntry>, SyncError> {
        self.check()?;
        let inner = self.inner.read().await;
        let latest = inner
            .targets
            .values()
            .filter(|s| {
                s.region_id == region_id
                    && s.status == EntryStatus::Completed
                    && s.log_id != exclude
            })
            .filter_map(|s| inner.entries.get(&s.log_id))
            .filter(|e| e.table == table && e.record_id == record_id)
            .max_by_key(|e| (e.timestamp, e.sequence))
            .cloned();
        Ok(latest)
    }

    async fn avg_lag_seconds(&self, region_id: Uuid) -> Result<f64, SyncError> {
        self.check()?;
        let inner = self.inner.read().await;
        let lags: Vec<f64> = inner
            .targets
            .values()
            .filter(|s| s.region_id == region_id && s.status == EntryStatus::Completed)
            .filter_map(|s| {
                let entry = inner.entries.get(&s.log_id)?;
                let completed = s.completed_at?;
                Some((completed - entry.created_at).num_milliseconds() as f64 / 1000.0)
            })
            .collect();
        if lags.is_empty() {
            return Ok(0.0);
        }
        Ok(lags.iter().sum::<f64>() / lags.len() as f64)
    }

    async fn avg_processing_seconds(&self, region_id: Uuid) -> Result<f64, SyncError> {
        self.check()?;
        let inner = self.inner.read().await;
        let times: Vec<f64> = inner
            .targets
            .values()
            .filter(|s| s.region_id == region_id && s.status == EntryStatus::Completed)
            .filter_map(|s| {
                let started = s.started_at?;
                let completed = s.completed_at?;
                Some((completed - started).num_milliseconds() as f64 / 1000.0)
            })
            .collect();
        if times.is_empty() {
            return Ok(0.0);
        }
        Ok(times.iter().sum::<f64>() / times.len() as f64)
    }

    async fn insert_conflict(&self, conflict: ConflictRecord) -> Result<(), SyncError> {
        self.check()?;
        let mut inner = self.inner.write().await;
        inner.conflicts.insert(conflict.id, conflict);
        Ok(())
    }

    async fn conflict(&self, id: Uuid) -> Result<Option<ConflictRecord>, SyncError> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner.conflicts.get(&id).cloned())
    }

    async fn update_conflict(&self, conflict: ConflictRecord) -> Result<(), SyncError> {
        self.check()?;
        let mut inner = self.inner.write().await;
        inner.conflicts.insert(conflict.id, conflict);
        Ok(())
    }
}
