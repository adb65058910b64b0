//! Error types for the replication subsystem.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in the replication subsystem.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The durable store could not be reached.
    #[error("storage unavailable: {msg}")]
    StorageUnavailable {
        /// Error message describing the outage.
        msg: String,
    },

    /// A replication log entry does not exist.
    #[error("replication entry {log_id} not found")]
    EntryNotFound {
        /// The missing entry identifier.
        log_id: Uuid,
    },

    /// A region does not exist in the registry.
    #[error("region {region_id} not found")]
    RegionNotFound {
        /// The missing region identifier.
        region_id: Uuid,
    },

    /// A replication task targeted a region that is not ACTIVE.
    #[error("region {region_id} is not active")]
    RegionNotActive {
        /// The region that cannot accept applies.
        region_id: Uuid,
    },

    /// A conflict record does not exist.
    #[error("conflict {conflict_id} not found")]
    ConflictNotFound {
        /// The missing conflict identifier.
        conflict_id: Uuid,
    },

    /// Applying an operation to a target region's store failed.
    #[error("apply to region {region_id} failed: {msg}")]
    ApplyFailed {
        /// The target region of the failed apply.
        region_id: Uuid,
        /// Error message from the target store.
        msg: String,
    },

    /// A region's store did not answer a ping.
    #[error("region {name} unreachable: {msg}")]
    RegionUnreachable {
        /// The unreachable region's name.
        name: String,
        /// Error message from the ping attempt.
        msg: String,
    },

    /// An operation kind outside the known set.
    #[error("unsupported operation: {op}")]
    UnsupportedOperation {
        /// The rejected operation value.
        op: String,
    },

    /// A table name outside the closed set of replicable tables.
    #[error("unknown table: {name}")]
    UnknownTable {
        /// The rejected table name.
        name: String,
    },

    /// A conflict resolution strategy value outside the known set.
    #[error("unknown resolution strategy: {value}")]
    UnknownStrategy {
        /// The rejected strategy value.
        value: String,
    },

    /// The CUSTOM resolution strategy is an extension point only.
    #[error("custom resolution strategy is not implemented")]
    NotImplemented,

    /// Required configuration was absent at startup.
    #[error("missing configuration: {key}")]
    MissingConfiguration {
        /// The configuration key that was not provided.
        key: String,
    },

    /// The engine or queue was shut down.
    #[error("replication engine shut down")]
    Shutdown,
}

impl SyncError {
    /// Whether the queue's retry policy should re-attempt the failed task.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::StorageUnavailable { .. }
                | SyncError::ApplyFailed { .. }
                | SyncError::RegionUnreachable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_retried() {
        assert!(SyncError::StorageUnavailable {
            msg: "down".to_string()
        }
        .is_transient());
        assert!(SyncError::ApplyFailed {
            region_id: Uuid::new_v4(),
            msg: "timeout".to_string()
        }
        .is_transient());
        assert!(SyncError::RegionUnreachable {
            name: "eu-west".to_string(),
            msg: "refused".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_fatal_errors_are_not_retried() {
        assert!(!SyncError::EntryNotFound {
            log_id: Uuid::new_v4()
        }
        .is_transient());
        assert!(!SyncError::RegionNotActive {
            region_id: Uuid::new_v4()
        }
        .is_transient());
        assert!(!SyncError::UnsupportedOperation {
            op: "merge".to_string()
        }
        .is_transient());
        assert!(!SyncError::NotImplemented.is_transient());
        assert!(!SyncError::Shutdown.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::UnknownTable {
            name: "wallets".to_string(),
        };
        assert_eq!(format!("{}", err), "unknown table: wallets");

        let err = SyncError::MissingConfiguration {
            key: "REGION_NAME".to_string(),
        };
        assert_eq!(format!("{}", err), "missing configuration: REGION_NAME");
    }
}
