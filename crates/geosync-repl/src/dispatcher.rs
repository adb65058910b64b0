//! Fan-out dispatch of pending log entries.
//!
//! Each poll loads a batch of PENDING entries in sequence order and enqueues
//! one replication task per active target region. Sequence order is a
//! fairness measure for the poll only; applies are unordered and correctness
//! rests on the timestamp comparison at apply time.

use crate::error::SyncError;
use crate::log::{EntryStatus, TargetState};
use crate::queue::{ReplicationTask, TaskQueue};
use crate::store::SyncStore;
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of one dispatch poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Pending entries loaded this poll.
    pub entries_polled: usize,
    /// Tasks enqueued across all entries.
    pub tasks_enqueued: usize,
    /// Entries left PENDING because no target region was active.
    pub entries_without_targets: usize,
}

/// Polls the replication log and fans pending entries out to the task queue.
pub struct Dispatcher {
    store: Arc<dyn SyncStore>,
    queue: Arc<dyn TaskQueue>,
    source_region: Uuid,
    batch_size: usize,
}

impl Dispatcher {
    /// Create a dispatcher for the given source region.
    pub fn new(
        store: Arc<dyn SyncStore>,
        queue: Arc<dyn TaskQueue>,
        source_region: Uuid,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            queue,
            source_region,
            batch_size,
        }
    }

    /// Run one dispatch poll.
    ///
    /// For every pending entry, creates a PENDING target state and one queue
    /// task per active region other than the source, then marks the entry
    /// IN_PROGRESS. Entries stay PENDING while no other region is active, so
    /// a later poll picks them up once a region recovers.
    pub async fn dispatch_pending(&self) -> Result<DispatchSummary, SyncError> {
        let pending = self
            .store
            .pending_entries(self.source_region, self.batch_size)
            .await?;
        let targets = self.store.active_targets(self.source_region).await?;

        let mut summary = DispatchSummary {
            entries_polled: pending.len(),
            ..DispatchSummary::default()
        };

        for entry in pending {
            if targets.is_empty() {
                summary.entries_without_targets += 1;
                continue;
            }

            for region in &targets {
                self.store
                    .upsert_target_state(TargetState::pending(entry.id, region.id))
                    .await?;
                self.queue
                    .push(ReplicationTask::new(entry.id, region.id))
                    .await?;
                summary.tasks_enqueued += 1;
            }
            self.store
                .set_entry_status(entry.id, EntryStatus::InProgress)
                .await?;
        }

        if summary.tasks_enqueued > 0 {
            tracing::debug!(
                entries = summary.entries_polled,
                tasks = summary.tasks_enqueued,
                "dispatched replication batch"
            );
        }
        Ok(summary)
    }
}
