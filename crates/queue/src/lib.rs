//! Durable work queue with consumer-group semantics.
//!
//! The queue is an append-only stream of [`QueueCommand`]s read by a named
//! group of competing consumers. Each delivered entry is owned by exactly
//! one consumer until it is acknowledged; entries whose owner stops
//! renewing them become reclaimable by the [`RecoverySweeper`] once their
//! idle time passes a threshold.

pub mod entry;
pub mod error;
pub mod memory;
pub mod redis_stream;
pub mod sweeper;

use std::time::Duration;

use async_trait::async_trait;

pub use entry::{EntryId, QueueCommand, QueueEntry};
pub use error::{MalformedEntry, QueueError, QueueResult};
pub use memory::MemoryQueue;
pub use redis_stream::RedisStreamQueue;
pub use sweeper::{RecoverySweeper, Sweep};

/// Stream key holding pending job commands.
pub const DEFAULT_STREAM_KEY: &str = "jobs:pending";

/// Consumer group shared by all worker processes.
pub const DEFAULT_GROUP: &str = "orchestrators";

/// Connection and naming settings for a queue backend.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub url: String,
    pub stream_key: String,
    pub group: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            stream_key: DEFAULT_STREAM_KEY.to_string(),
            group: DEFAULT_GROUP.to_string(),
        }
    }
}

impl QueueConfig {
    pub fn with_url(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }
}

/// Outcome of [`WorkQueue::enqueue_exclusive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued(EntryId),
    /// The job already has an unacknowledged entry; nothing was appended.
    AlreadyOutstanding,
}

/// One page of a recovery scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimBatch {
    /// Where the next scan call should start; [`EntryId::ZERO`] once the
    /// scan has wrapped.
    pub next_cursor: EntryId,
    pub entries: Vec<QueueEntry>,
}

/// Ownership view of a delivered but unacknowledged entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: EntryId,
    pub consumer: String,
    pub idle: Duration,
    pub deliveries: u64,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Create the consumer group (and stream). Existing group is a no-op.
    async fn ensure_group(&self) -> QueueResult<()>;

    /// Append a command unconditionally.
    async fn enqueue(&self, command: &QueueCommand) -> QueueResult<EntryId>;

    /// Append a command unless the job already has an outstanding entry.
    ///
    /// The outstanding marker is written atomically with the append and
    /// stays until [`WorkQueue::release_outstanding`] is called.
    async fn enqueue_exclusive(&self, command: &QueueCommand) -> QueueResult<EnqueueOutcome>;

    /// Clear the outstanding marker for a job after its entry is acknowledged.
    async fn release_outstanding(&self, external_id: &str) -> QueueResult<()>;

    /// Whether the job currently has an outstanding entry.
    async fn is_outstanding(&self, external_id: &str) -> QueueResult<bool>;

    /// Deliver up to `count` never-delivered entries to `consumer`, waiting up
    /// to `block` for one to arrive. Returns empty on timeout.
    async fn dequeue(
        &self,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<QueueEntry>>;

    /// Remove an entry from the pending-ownership set.
    async fn acknowledge(&self, id: &EntryId) -> QueueResult<()>;

    /// Transfer to `consumer` up to `count` pending entries idle for at least
    /// `min_idle`, scanning from `cursor`.
    async fn claim_idle(
        &self,
        consumer: &str,
        min_idle: Duration,
        cursor: &EntryId,
        count: usize,
    ) -> QueueResult<ClaimBatch>;

    /// Reset the idle clock of entries still owned by `consumer`. Entries
    /// now owned by someone else are left alone. Returns how many were
    /// renewed.
    async fn renew(&self, consumer: &str, ids: &[EntryId]) -> QueueResult<usize>;

    /// Pending entries with their owners, oldest first.
    async fn pending(&self, limit: usize) -> QueueResult<Vec<PendingEntry>>;
}
