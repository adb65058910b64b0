//! The replication log: durable records of logical writes destined for
//! propagation to other regions.
//!
//! A log entry is an immutable fact once created; per-target progress is
//! tracked in a separate [`TargetState`] record keyed by
//! `(log_id, region_id)` so that concurrent fan-out workers never overwrite
//! each other's status.

use crate::error::SyncError;
use crate::store::SyncStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// JSON object payload carried by replication entries and conflicts.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Kind of logical write being replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Insert a new record.
    Insert,
    /// Update an existing record.
    Update,
    /// Delete a record by id.
    Delete,
}

impl Operation {
    /// Parse an operation from its wire representation.
    pub fn parse(value: &str) -> Result<Self, SyncError> {
        match value {
            "insert" => Ok(Operation::Insert),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(SyncError::UnsupportedOperation {
                op: other.to_string(),
            }),
        }
    }

    /// Wire representation of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

/// Closed set of tables eligible for cross-region replication.
///
/// Apply statements are parameterized by this enum rather than a raw string,
/// so a table name that is not in this set is rejected before it reaches any
/// target store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTable {
    /// User accounts.
    Users,
    /// User profiles.
    Profiles,
    /// Chat messages.
    Messages,
    /// Conversations.
    Conversations,
    /// Notifications.
    Notifications,
    /// Message read receipts.
    ReadReceipts,
}

impl SyncTable {
    /// Parse a table name against the closed set.
    pub fn parse(name: &str) -> Result<Self, SyncError> {
        match name {
            "users" => Ok(SyncTable::Users),
            "profiles" => Ok(SyncTable::Profiles),
            "messages" => Ok(SyncTable::Messages),
            "conversations" => Ok(SyncTable::Conversations),
            "notifications" => Ok(SyncTable::Notifications),
            "read_receipts" => Ok(SyncTable::ReadReceipts),
            other => Err(SyncError::UnknownTable {
                name: other.to_string(),
            }),
        }
    }

    /// Canonical table name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTable::Users => "users",
            SyncTable::Profiles => "profiles",
            SyncTable::Messages => "messages",
            SyncTable::Conversations => "conversations",
            SyncTable::Notifications => "notifications",
            SyncTable::ReadReceipts => "read_receipts",
        }
    }
}

impl std::fmt::Display for SyncTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replication progress of an entry, per target or rolled up per entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Waiting for dispatch.
    Pending,
    /// Dispatched, at least one target still applying.
    InProgress,
    /// Applied successfully.
    Completed,
    /// Apply failed (dead-lettered once retries are exhausted).
    Failed,
    /// A newer completed write was found for the same record.
    Conflict,
}

/// One logical write recorded for propagation.
///
/// `table`, `record_id`, `operation`, `data`, `old_data`, `source_region`,
/// `sequence`, and `timestamp` are immutable after creation; only the rollup
/// status fields change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationEntry {
    /// Unique entry identifier.
    pub id: Uuid,
    /// Table the write belongs to.
    pub table: SyncTable,
    /// Identifier of the written record.
    pub record_id: String,
    /// Kind of write.
    pub operation: Operation,
    /// New record payload.
    pub data: JsonMap,
    /// Prior record payload, when known.
    pub old_data: Option<JsonMap>,
    /// Region the write originated in.
    pub source_region: Uuid,
    /// Process-local strictly increasing counter; orders dispatch batches.
    pub sequence: u64,
    /// Wall-clock time of the write; the last-write-wins comparison basis.
    pub timestamp: DateTime<Utc>,
    /// Coarse rollup of per-target progress.
    pub status: EntryStatus,
    /// Highest retry count across targets.
    pub retry_count: u32,
    /// Most recent apply error across targets.
    pub error_message: Option<String>,
    /// When the entry was persisted.
    pub created_at: DateTime<Utc>,
}

impl ReplicationEntry {
    /// Create a pending entry with the given sequence, stamped now.
    pub fn new(
        table: SyncTable,
        record_id: &str,
        operation: Operation,
        data: JsonMap,
        old_data: Option<JsonMap>,
        source_region: Uuid,
        sequence: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            table,
            record_id: record_id.to_string(),
            operation,
            data,
            old_data,
            source_region,
            sequence,
            timestamp: now,
            status: EntryStatus::Pending,
            retry_count: 0,
            error_message: None,
            created_at: now,
        }
    }
}

/// Per-(entry, target region) replication progress.
///
/// Each fan-out target gets its own record; a worker owns exactly one
/// `(log_id, region_id)` pair at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    /// The entry being replicated.
    pub log_id: Uuid,
    /// The target region.
    pub region_id: Uuid,
    /// Progress of this target's apply.
    pub status: EntryStatus,
    /// Number of failed apply attempts for this target.
    pub retry_count: u32,
    /// Most recent apply error for this target.
    pub error_message: Option<String>,
    /// When a worker picked the task up.
    pub started_at: Option<DateTime<Utc>>,
    /// When the apply completed.
    pub completed_at: Option<DateTime<Utc>>,
}

impl TargetState {
    /// Create a pending target state for a fan-out task.
    pub fn pending(log_id: Uuid, region_id: Uuid) -> Self {
        Self {
            log_id,
            region_id,
            status: EntryStatus::Pending,
            retry_count: 0,
            error_message: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Roll per-target states up into a single entry-level status.
///
/// Any conflict wins, then any failure, then all-completed; anything else is
/// still in progress. No targets at all means the entry has not been
/// dispatched.
pub fn rollup_entry_status(states: &[TargetState]) -> EntryStatus {
    if states.is_empty() {
        return EntryStatus::Pending;
    }
    if states.iter().any(|s| s.status == EntryStatus::Conflict) {
        return EntryStatus::Conflict;
    }
    if states.iter().any(|s| s.status == EntryStatus::Failed) {
        return EntryStatus::Failed;
    }
    if states.iter().all(|s| s.status == EntryStatus::Completed) {
        return EntryStatus::Completed;
    }
    EntryStatus::InProgress
}

/// Process-local strictly increasing sequence counter.
#[derive(Debug, Default)]
pub struct SequenceCounter(AtomicU64);

impl SequenceCounter {
    /// Create a counter starting at zero.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Return the next sequence value, starting from 1.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Appends logical writes to the replication log.
pub struct ReplicationLog {
    store: Arc<dyn SyncStore>,
    source_region: Uuid,
    sequence: SequenceCounter,
}

impl ReplicationLog {
    /// Create a log writer for the given source region.
    pub fn new(store: Arc<dyn SyncStore>, source_region: Uuid) -> Self {
        Self {
            store,
            source_region,
            sequence: SequenceCounter::new(),
        }
    }

    /// Record one logical write for propagation.
    ///
    /// Assigns the next sequence and a wall-clock timestamp, persists the
    /// entry as PENDING, and leaves fan-out to the dispatcher's next poll.
    /// The only failure here is the store being unavailable.
    pub async fn log_operation(
        &self,
        table: SyncTable,
        record_id: &str,
        operation: Operation,
        data: JsonMap,
        old_data: Option<JsonMap>,
    ) -> Result<ReplicationEntry, SyncError> {
        let entry = ReplicationEntry::new(
            table,
            record_id,
            operation,
            data,
            old_data,
            self.source_region,
            self.sequence.next(),
        );
        self.store.insert_entry(entry.clone()).await?;
        tracing::debug!(
            log_id = %entry.id,
            table = %entry.table,
            record_id = %entry.record_id,
            sequence = entry.sequence,
            "logged operation"
        );
        Ok(entry)
    }

    /// The region this log writes on behalf of.
    pub fn source_region(&self) -> Uuid {
        self.source_region
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    fn data(id: &str) -> JsonMap {
        let mut m = JsonMap::new();
        m.insert("id".to_string(), serde_json::Value::String(id.to_string()));
        m
    }

    #[test]
    fn test_operation_parse_known_values() {
        assert_eq!(Operation::parse("insert").unwrap(), Operation::Insert);
        assert_eq!(Operation::parse("update").unwrap(), Operation::Update);
        assert_eq!(Operation::parse("delete").unwrap(), Operation::Delete);
    }

    #[test]
    fn test_operation_parse_unknown_value() {
        let err = Operation::parse("merge").unwrap_err();
        assert!(matches!(err, SyncError::UnsupportedOperation { op } if op == "merge"));
    }

    #[test]
    fn test_table_parse_round_trip() {
        for name in [
            "users",
            "profiles",
            "messages",
            "conversations",
            "notifications",
            "read_receipts",
        ] {
            let table = SyncTable::parse(name).unwrap();
            assert_eq!(table.as_str(), name);
        }
    }

    #[test]
    fn test_table_parse_unknown_is_rejected() {
        let err = SyncTable::parse("wallets").unwrap_err();
        assert!(matches!(err, SyncError::UnknownTable { name } if name == "wallets"));
    }

    #[test]
    fn test_sequence_counter_is_strictly_increasing() {
        let counter = SequenceCounter::new();
        let mut last = 0;
        for _ in 0..100 {
            let next = counter.next();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn test_new_entry_is_pending() {
        let entry = ReplicationEntry::new(
            SyncTable::Messages,
            "m1",
            Operation::Insert,
            data("m1"),
            None,
            Uuid::new_v4(),
            1,
        );
        assert_eq!(entry.status, EntryStatus::Pending);
        assert_eq!(entry.retry_count, 0);
        assert!(entry.error_message.is_none());
        assert_eq!(entry.timestamp, entry.created_at);
    }

    #[test]
    fn test_rollup_no_targets_is_pending() {
        assert_eq!(rollup_entry_status(&[]), EntryStatus::Pending);
    }

    #[test]
    fn test_rollup_all_completed() {
        let log_id = Uuid::new_v4();
        let mut a = TargetState::pending(log_id, Uuid::new_v4());
        let mut b = TargetState::pending(log_id, Uuid::new_v4());
        a.status = EntryStatus::Completed;
        b.status = EntryStatus::Completed;
        assert_eq!(rollup_entry_status(&[a, b]), EntryStatus::Completed);
    }

    #[test]
    fn test_rollup_failure_wins_over_completed() {
        let log_id = Uuid::new_v4();
        let mut a = TargetState::pending(log_id, Uuid::new_v4());
        let mut b = TargetState::pending(log_id, Uuid::new_v4());
        a.status = EntryStatus::Failed;
        b.status = EntryStatus::Completed;
        assert_eq!(rollup_entry_status(&[a, b]), EntryStatus::Failed);
    }

    #[test]
    fn test_rollup_conflict_wins_over_failure() {
        let log_id = Uuid::new_v4();
        let mut a = TargetState::pending(log_id, Uuid::new_v4());
        let mut b = TargetState::pending(log_id, Uuid::new_v4());
        a.status = EntryStatus::Conflict;
        b.status = EntryStatus::Failed;
        assert_eq!(rollup_entry_status(&[a, b]), EntryStatus::Conflict);
    }

    #[test]
    fn test_rollup_in_progress_otherwise() {
        let log_id = Uuid::new_v4();
        let mut a = TargetState::pending(log_id, Uuid::new_v4());
        let b = TargetState::pending(log_id, Uuid::new_v4());
        a.status = EntryStatus::Completed;
        assert_eq!(rollup_entry_status(&[a, b]), EntryStatus::InProgress);
    }

    #[tokio::test]
    async fn test_log_operation_persists_pending_entry() {
        let store = Arc::new(MemStore::new());
        let source = Uuid::new_v4();
        let log = ReplicationLog::new(store.clone(), source);

        let entry = log
            .log_operation(SyncTable::Messages, "m1", Operation::Insert, data("m1"), None)
            .await
            .unwrap();

        assert_eq!(entry.sequence, 1);
        assert_eq!(entry.source_region, source);

        let stored = store.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EntryStatus::Pending);
        assert_eq!(stored.record_id, "m1");
    }

    #[tokio::test]
    async fn test_log_operation_assigns_increasing_sequences() {
        let store = Arc::new(MemStore::new());
        let log = ReplicationLog::new(store, Uuid::new_v4());

        let first = log
            .log_operation(SyncTable::Users, "u1", Operation::Update, data("u1"), None)
            .await
            .unwrap();
        let second = log
            .log_operation(SyncTable::Users, "u2", Operation::Update, data("u2"), None)
            .await
            .unwrap();

        assert!(second.sequence > first.sequence);
    }

    #[tokio::test]
    async fn test_log_operation_propagates_storage_outage() {
        let store = Arc::new(MemStore::new());
        store.set_unavailable(true);
        let log = ReplicationLog::new(store, Uuid::new_v4());

        let err = log
            .log_operation(SyncTable::Users, "u1", Operation::Insert, data("u1"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::StorageUnavailable { .. }));
    }
}
