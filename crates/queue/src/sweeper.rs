//! Reclaims queue entries abandoned by crashed consumers.

use std::sync::Arc;
use std::time::Duration;

use crate::entry::{EntryId, QueueEntry};
use crate::WorkQueue;

/// Default idle time after which an owned entry is presumed abandoned.
pub const DEFAULT_MIN_IDLE: Duration = Duration::from_secs(60);

/// Default number of entries claimed per scan call.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Scans the pending set and transfers entries idle for at least
/// `min_idle` to the calling consumer.
#[derive(Clone)]
pub struct RecoverySweeper {
    queue: Arc<dyn WorkQueue>,
    min_idle: Duration,
    batch_size: usize,
}

impl RecoverySweeper {
    pub fn new(queue: Arc<dyn WorkQueue>, min_idle: Duration, batch_size: usize) -> Self {
        Self {
            queue,
            min_idle,
            batch_size: batch_size.max(1),
        }
    }

    pub fn with_defaults(queue: Arc<dyn WorkQueue>) -> Self {
        Self::new(queue, DEFAULT_MIN_IDLE, DEFAULT_BATCH_SIZE)
    }

    pub fn min_idle(&self) -> Duration {
        self.min_idle
    }

    /// Begin a scan for `consumer`. Each [`Sweep::next_batch`] call claims
    /// one page, so the caller can take ownership of a page's entries
    /// before the next page is transferred to it.
    pub fn start(&self, consumer: &str) -> Sweep<'_> {
        Sweep {
            sweeper: self,
            consumer: consumer.to_string(),
            cursor: EntryId::ZERO,
            done: false,
            reclaimed: 0,
        }
    }

    /// Run one full scan for `consumer`, returning every reclaimed entry.
    ///
    /// Entries claimed early in the scan are not renewed while later pages
    /// are fetched; callers that process what they claim should page with
    /// [`RecoverySweeper::start`] instead.
    pub async fn sweep(&self, consumer: &str) -> Vec<QueueEntry> {
        let mut sweep = self.start(consumer);
        let mut reclaimed = Vec::new();
        while let Some(batch) = sweep.next_batch().await {
            reclaimed.extend(batch);
        }
        reclaimed
    }
}

/// An in-progress scan; see [`RecoverySweeper::start`].
pub struct Sweep<'a> {
    sweeper: &'a RecoverySweeper,
    consumer: String,
    cursor: EntryId,
    done: bool,
    reclaimed: usize,
}

impl Sweep<'_> {
    /// Claim the next page of idle entries. `None` once the cursor has
    /// wrapped back to the start or the backend failed; a failure abandons
    /// the rest of this cycle.
    pub async fn next_batch(&mut self) -> Option<Vec<QueueEntry>> {
        if self.done {
            return None;
        }

        let consumer = self.consumer.as_str();
        match self
            .sweeper
            .queue
            .claim_idle(
                consumer,
                self.sweeper.min_idle,
                &self.cursor,
                self.sweeper.batch_size,
            )
            .await
        {
            Ok(batch) => {
                if batch.next_cursor == EntryId::ZERO {
                    self.done = true;
                } else {
                    self.cursor = batch.next_cursor;
                }
                if !batch.entries.is_empty() {
                    self.reclaimed += batch.entries.len();
                    tracing::info!(
                        consumer,
                        count = batch.entries.len(),
                        total = self.reclaimed,
                        "Reclaimed idle queue entries",
                    );
                }
                Some(batch.entries)
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    consumer,
                    cursor = %self.cursor,
                    "Recovery sweep failed, abandoning this cycle",
                );
                self.done = true;
                None
            }
        }
    }

    /// Entries claimed so far in this scan.
    pub fn reclaimed(&self) -> usize {
        self.reclaimed
    }
}
