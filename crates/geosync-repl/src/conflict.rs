//! Conflict records and resolution.
//!
//! A conflict is recorded when a target-region apply finds a newer completed
//! write for the same record. Resolution is last-write-wins by wall-clock
//! timestamp unless an operator routes the conflict to manual handling.

use crate::error::SyncError;
use crate::log::{JsonMap, ReplicationEntry, SyncTable};
use crate::store::SyncStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// How a conflict should be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// The write with the greater wall-clock timestamp wins; ties favor the
    /// source log.
    LastWriteWins,
    /// An operator supplies the resolved data.
    Manual,
    /// Extension point; not implemented.
    Custom,
}

impl ResolutionStrategy {
    /// Parse a strategy from its wire representation.
    pub fn parse(value: &str) -> Result<Self, SyncError> {
        match value {
            "last_write_wins" => Ok(ResolutionStrategy::LastWriteWins),
            "manual" => Ok(ResolutionStrategy::Manual),
            "custom" => Ok(ResolutionStrategy::Custom),
            other => Err(SyncError::UnknownStrategy {
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle of a conflict record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    /// Recorded by the worker, not yet resolved.
    Detected,
    /// Resolution has been applied.
    Resolved,
    /// Waiting for an operator.
    ManualInterventionRequired,
}

/// Record of one detected conflict between two log entries on one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Unique conflict identifier.
    pub id: Uuid,
    /// Table of the conflicting record.
    pub table: SyncTable,
    /// Identifier of the conflicting record.
    pub record_id: String,
    /// The entry whose apply detected the conflict.
    pub source_log: Uuid,
    /// The newer completed entry it lost against.
    pub conflicting_log: Uuid,
    /// The target region the apply was headed for.
    pub target_region: Uuid,
    /// Payload of the source entry.
    pub source_data: JsonMap,
    /// Payload of the conflicting entry.
    pub conflicting_data: JsonMap,
    /// Strategy the conflict is (to be) resolved under.
    pub strategy: ResolutionStrategy,
    /// Lifecycle state.
    pub status: ConflictStatus,
    /// Winning payload once resolved.
    pub resolved_data: Option<JsonMap>,
    /// Who resolved the conflict, for manual resolutions.
    pub resolved_by: Option<String>,
    /// When the conflict was resolved.
    pub resolved_at: Option<DateTime<Utc>>,
    /// When the worker detected the conflict.
    pub detected_at: DateTime<Utc>,
    /// Free-form operator notes.
    pub resolution_notes: Option<String>,
    /// When the record was persisted.
    pub created_at: DateTime<Utc>,
}

impl ConflictRecord {
    /// Record a freshly detected conflict with the default strategy.
    pub fn detected(
        source: &ReplicationEntry,
        conflicting: &ReplicationEntry,
        target_region: Uuid,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            table: source.table,
            record_id: source.record_id.clone(),
            source_log: source.id,
            conflicting_log: conflicting.id,
            target_region,
            source_data: source.data.clone(),
            conflicting_data: conflicting.data.clone(),
            strategy: ResolutionStrategy::LastWriteWins,
            status: ConflictStatus::Detected,
            resolved_data: None,
            resolved_by: None,
            resolved_at: None,
            detected_at: now,
            resolution_notes: None,
            created_at: now,
        }
    }
}

/// Applies a resolution strategy to recorded conflicts.
pub struct ConflictResolver {
    store: Arc<dyn SyncStore>,
}

impl ConflictResolver {
    /// Create a resolver over the given store.
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self { store }
    }

    /// Resolve a conflict under the given strategy.
    ///
    /// `LastWriteWins` picks the payload of whichever entry has the greater
    /// timestamp, source winning ties. `Manual` parks the conflict for an
    /// operator, to be completed later via [`ConflictResolver::resolve_manual`].
    pub async fn resolve(
        &self,
        conflict_id: Uuid,
        strategy: ResolutionStrategy,
    ) -> Result<ConflictRecord, SyncError> {
        let mut conflict = self
            .store
            .conflict(conflict_id)
            .await?
            .ok_or(SyncError::ConflictNotFound { conflict_id })?;

        match strategy {
            ResolutionStrategy::LastWriteWins => {
                let source = self
                    .store
                    .entry(conflict.source_log)
                    .await?
                    .ok_or(SyncError::EntryNotFound {
                        log_id: conflict.source_log,
                    })?;
                let conflicting = self
                    .store
                    .entry(conflict.conflicting_log)
                    .await?
                    .ok_or(SyncError::EntryNotFound {
                        log_id: conflict.conflicting_log,
                    })?;

                let resolved = if source.timestamp >= conflicting.timestamp {
                    conflict.source_data.clone()
                } else {
                    conflict.conflicting_data.clone()
                };

                conflict.strategy = ResolutionStrategy::LastWriteWins;
                conflict.status = ConflictStatus::Resolved;
                conflict.resolved_data = Some(resolved);
                conflict.resolved_at = Some(Utc::now());
                self.store.update_conflict(conflict.clone()).await?;
                tracing::info!(
                    conflict_id = %conflict.id,
                    table = %conflict.table,
                    record_id = %conflict.record_id,
                    "conflict resolved by last-write-wins"
                );
                Ok(conflict)
            }
            ResolutionStrategy::Manual => {
                conflict.strategy = ResolutionStrategy::Manual;
                conflict.status = ConflictStatus::ManualInterventionRequired;
                self.store.update_conflict(conflict.clone()).await?;
                tracing::warn!(
                    conflict_id = %conflict.id,
                    table = %conflict.table,
                    record_id = %conflict.record_id,
                    "conflict requires manual resolution"
                );
                Ok(conflict)
            }
            ResolutionStrategy::Custom => Err(SyncError::NotImplemented),
        }
    }

    /// Complete a manual resolution with operator-supplied data.
    pub async fn resolve_manual(
        &self,
        conflict_id: Uuid,
        resolved_data: JsonMap,
        resolved_by: &str,
        notes: Option<String>,
    ) -> Result<ConflictRecord, SyncError> {
        let mut conflict = self
            .store
            .conflict(conflict_id)
            .await?
            .ok_or(SyncError::ConflictNotFound { conflict_id })?;

        conflict.strategy = ResolutionStrategy::Manual;
        conflict.status = ConflictStatus::Resolved;
        conflict.resolved_data = Some(resolved_data);
        conflict.resolved_by = Some(resolved_by.to_string());
        conflict.resolved_at = Some(Utc::now());
        conflict.resolution_notes = notes;
        self.store.update_conflict(conflict.clone()).await?;
        tracing::info!(
            conflict_id = %conflict.id,
            resolved_by,
            "conflict resolved manually"
        );
        Ok(conflict)
    }
}
