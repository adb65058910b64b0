// File: crates/geosync-repl/src/worker.rs

//! Replication worker: applies one `(entry, target region)` task at a time.
//!
//! The worker owns the per-target state for the task it is processing. A
//! missing entry or an inactive target region is fatal for the task; apply
//! failures are transient and surface to the queue's retry policy. Applies
//! are idempotent (upsert / delete by id), so a redelivered task converges to
//! the same target store state.

use crate::conflict::ConflictRecord;
use crate::error::SyncError;
use crate::link::RegionRouter;
use crate::log::{EntryStatus, Operation, TargetState};
use crate::region::RegionStatus;
use crate::store::SyncStore;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Result of a successful worker pass over a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The operation was applied to the target store.
    Applied,
    /// A newer completed write exists; a conflict was recorded instead.
    Conflicted {
        /// The recorded conflict.
        conflict_id: Uuid,
    },
}

/// Applies replication tasks against target regions.
pub struct Worker {
    store: Arc<dyn SyncStore>,
    router: Arc<dyn RegionRouter>,
}

impl Worker {
    /// Create a worker over the given store and region router.
    pub fn new(store: Arc<dyn SyncStore>, router: Arc<dyn RegionRouter>) -> Self {
        Self { store, router }
    }

    /// Apply one log entry to one target region.
    ///
    /// Loads the entry and target, marks the per-target state IN_PROGRESS,
    /// checks for a newer completed write on the same record, and either
    /// records a conflict or applies the operation. On apply failure the
    /// per-target state is marked FAILED with an incremented retry count and
    /// the error is returned for the queue to retry.
    pub async fn apply(
        &self,
        log_id: Uuid,
        target_region_id: Uuid,
    ) -> Result<ApplyOutcome, SyncError> {
        let entry = self
            .store
            .entry(log_id)
            .await?
            .ok_or(SyncError::EntryNotFound { log_id })?;

        let region = self
            .store
            .region(target_region_id)
            .await?
            .ok_or(SyncError::RegionNotFound {
                region_id: target_region_id,
            })?;
        if region.status != RegionStatus::Active {
            // The region may have gone unhealthy between enqueue and pickup.
            return Err(SyncError::RegionNotActive {
                region_id: target_region_id,
            });
        }

        let mut state = self
            .store
            .target_state(log_id, target_region_id)
            .await?
            .unwrap_or_else(|| TargetState::pending(log_id, target_region_id));
        state.status = EntryStatus::InProgress;
        state.started_at = Some(Utc::now());
        self.store.upsert_target_state(state.clone()).await?;

        if let Some(newer) = self
            .store
            .latest_completed_entry(entry.table, &entry.record_id, target_region_id, entry.id)
            .await?
        {
            if newer.timestamp > entry.timestamp {
                let conflict = ConflictRecord::detected(&entry, &newer, target_region_id);
                self.store.insert_conflict(conflict.clone()).await?;
                state.status = EntryStatus::Conflict;
                self.store.upsert_target_state(state).await?;
                self.store.refresh_entry_rollup(log_id).await?;
                tracing::warn!(
                    log_id = %log_id,
                    conflict_id = %conflict.id,
                    table = %entry.table,
                    record_id = %entry.record_id,
                    target = %region.name,
                    "conflict detected, apply skipped"
                );
                return Ok(ApplyOutcome::Conflicted {
                    conflict_id: conflict.id,
                });
            }
        }

        let link = self
            .router
            .link(&region)
            .ok_or_else(|| SyncError::RegionUnreachable {
                name: region.name.clone(),
                msg: "no link configured".to_string(),
            });
        let result = match link {
            Ok(link) => match entry.operation {
                Operation::Insert | Operation::Update => {
                    link.upsert(entry.table, &entry.record_id, &entry.data).await
                }
                Operation::Delete => link.delete(entry.table, &entry.record_id).await,
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                state.status = EntryStatus::Completed;
                state.completed_at = Some(Utc::now());
                state.error_message = None;
                self.store.upsert_target_state(state).await?;
                self.store.refresh_entry_rollup(log_id).await?;
                tracing::debug!(
                    log_id = %log_id,
                    target = %region.name,
                    operation = entry.operation.as_str(),
                    "replication applied"
                );
                Ok(ApplyOutcome::Applied)
            }
            Err(e) => {
                self.record_failure(log_id, target_region_id, &e.to_string())
                    .await?;
                Err(e)
            }
        }
    }

    /// Mark a task's per-target state FAILED with the given message.
    ///
    /// Also used by the engine when an attempt exceeds its execution ceiling.
    pub async fn record_failure(
        &self,
        log_id: Uuid,
        target_region_id: Uuid,
        msg: &str,
    ) -> Result<(), SyncError> {
        let mut state = self
            .store
            .target_state(log_id, target_region_id)
            .await?
            .unwrap_or_else(|| TargetState::pending(log_id, target_region_id));
        state.status = EntryStatus::Failed;
        state.retry_count += 1;
        state.error_message = Some(msg.to_string());
        self.store.upsert_target_state(state).await?;
        self.store.refresh_entry_rollup(log_id).await?;
        tracing::warn!(
            log_id = %log_id,
            target = %target_region_id,
            error = msg,
            "replication apply failed"
        );
        Ok(())
    }
}
