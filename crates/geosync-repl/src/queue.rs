//! Replication task queue port.
//!
//! The broker itself is an external collaborator; this module defines the
//! work-queue boundary the engine needs: at-least-once delivery of
//! `(log entry, target region)` tasks with exponential-backoff redelivery and
//! a dead-letter terminal state. [`MemQueue`] is the in-process
//! implementation used by tests and single-node deployments.

use crate::error::SyncError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// One unit of replication work: apply one log entry to one target region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationTask {
    /// The entry to apply.
    pub log_id: Uuid,
    /// The region to apply it to.
    pub target_region_id: Uuid,
    /// 1-based delivery attempt.
    pub attempt: u32,
}

impl ReplicationTask {
    /// First-attempt task for an `(entry, target)` pair.
    pub fn new(log_id: Uuid, target_region_id: Uuid) -> Self {
        Self {
            log_id,
            target_region_id,
            attempt: 1,
        }
    }

    /// The same task, one attempt later.
    pub fn next_attempt(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self
        }
    }
}

/// Redelivery policy: exponential backoff from a base delay, up to a fixed
/// number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total delivery attempts before dead-lettering.
    pub max_attempts: u32,
    /// Backoff after the first failed attempt, in milliseconds.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Backoff after the given failed attempt: `base * 2^(attempt-1)`,
    /// i.e. 1000ms, 2000ms, 4000ms for the default policy.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << shift))
    }
}

/// What the queue did with a failed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Task will be redelivered after the backoff delay.
    Requeued {
        /// How long the task waits before redelivery.
        delay: Duration,
    },
    /// Attempts are exhausted; the task is parked in the dead-letter set.
    DeadLettered,
}

/// Durable work-queue boundary for replication tasks.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a task for delivery.
    async fn push(&self, task: ReplicationTask) -> Result<(), SyncError>;

    /// Wait for the next task. Returns `None` once the queue is closed and
    /// drained.
    async fn pop(&self) -> Option<ReplicationTask>;

    /// Report a failed attempt; the queue either schedules a redelivery or
    /// dead-letters the task.
    async fn nack(&self, task: ReplicationTask) -> RetryOutcome;

    /// The redelivery policy tasks are enqueued under.
    fn policy(&self) -> RetryPolicy;
}

/// In-process [`TaskQueue`] over an unbounded channel, with delayed
/// redelivery driven by timers.
pub struct MemQueue {
    policy: RetryPolicy,
    tx: Mutex<Option<mpsc::UnboundedSender<ReplicationTask>>>,
    rx: Mutex<mpsc::UnboundedReceiver<ReplicationTask>>,
    dead: Mutex<Vec<ReplicationTask>>,
}

impl MemQueue {
    /// Create a queue with the given redelivery policy.
    pub fn new(policy: RetryPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            policy,
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
            dead: Mutex::new(Vec::new()),
        }
    }

    /// Stop accepting pushes; `pop` returns `None` once drained.
    pub async fn close(&self) {
        self.tx.lock().await.take();
    }

    /// Tasks that exhausted their attempts.
    pub async fn dead_letters(&self) -> Vec<ReplicationTask> {
        self.dead.lock().await.clone()
    }
}

impl Default for MemQueue {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[async_trait]
impl TaskQueue for MemQueue {
    async fn push(&self, task: ReplicationTask) -> Result<(), SyncError> {
        let tx = self.tx.lock().await;
        match tx.as_ref() {
            Some(tx) => tx.send(task).map_err(|_| SyncError::Shutdown),
            None => Err(SyncError::Shutdown),
        }
    }

    async fn pop(&self) -> Option<ReplicationTask> {
        self.rx.lock().await.recv().await
    }

    async fn nack(&self, task: ReplicationTask) -> RetryOutcome {
        if task.attempt >= self.policy.max_attempts {
            tracing::warn!(
                log_id = %task.log_id,
                target = %task.target_region_id,
                attempts = task.attempt,
                "replication task dead-lettered"
            );
            self.dead.lock().await.push(task);
            return RetryOutcome::DeadLettered;
        }

        let delay = self.policy.delay_for(task.attempt);
        let tx = self.tx.lock().await.clone();
        if let Some(tx) = tx {
            let requeued = task.next_attempt();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(requeued);
            });
        }
        RetryOutcome::Requeued { delay }
    }

    fn policy(&self) -> RetryPolicy {
        self.policy
    }
}
