//! Consumer loop: dequeue, process, acknowledge.
//!
//! Delivery is at-least-once. An entry is acknowledged only after its job
//! run returns; infrastructure errors leave it pending so the recovery
//! sweeper (here or in another worker) picks it up again.
//!
//! Every entry in a delivered or reclaimed batch is leased as soon as the
//! batch arrives, so entries waiting behind a long job are not mistaken
//! for abandoned ones. An entry whose ownership moved to another consumer
//! is left to that consumer and never acknowledged here.

use std::sync::Arc;
use std::time::Duration;

use scribe_pipeline::{JobProcessor, ProcessError};
use scribe_queue::sweeper::{DEFAULT_BATCH_SIZE, DEFAULT_MIN_IDLE};
use scribe_queue::{QueueCommand, QueueEntry, QueueError, QueueResult, RecoverySweeper, WorkQueue};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::lease::{Lease, LeaseKeeper};

/// Tuning for one [`JobService`].
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub consumer: String,
    /// Longest a single dequeue waits for new work.
    pub block: Duration,
    pub batch_size: usize,
    pub recovery_min_idle: Duration,
    pub recovery_batch_size: usize,
    /// Time between periodic recovery sweeps.
    pub recovery_interval: Duration,
    /// Pause after a failed dequeue.
    pub error_backoff: Duration,
}

impl ServiceSettings {
    pub fn new(consumer: &str) -> Self {
        Self {
            consumer: consumer.to_string(),
            block: Duration::from_secs(5),
            batch_size: 1,
            recovery_min_idle: DEFAULT_MIN_IDLE,
            recovery_batch_size: DEFAULT_BATCH_SIZE,
            recovery_interval: Duration::from_secs(60),
            error_backoff: Duration::from_secs(2),
        }
    }
}

/// What happened to a delivered entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Processed and acknowledged.
    Processed,
    /// Malformed; acknowledged without processing.
    Dropped,
    /// Processing failed; left pending for recovery.
    Deferred,
    /// Ownership moved to another consumer; left to it.
    Abandoned,
}

#[derive(Clone)]
pub struct JobService {
    queue: Arc<dyn WorkQueue>,
    processor: JobProcessor,
    sweeper: RecoverySweeper,
    lease: LeaseKeeper,
    settings: ServiceSettings,
}

impl JobService {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        processor: JobProcessor,
        settings: ServiceSettings,
    ) -> Self {
        let sweeper = RecoverySweeper::new(
            Arc::clone(&queue),
            settings.recovery_min_idle,
            settings.recovery_batch_size,
        );
        let lease = LeaseKeeper::new(
            Arc::clone(&queue),
            &settings.consumer,
            settings.recovery_min_idle,
        );
        Self {
            queue,
            processor,
            sweeper,
            lease,
            settings,
        }
    }

    pub fn consumer(&self) -> &str {
        &self.settings.consumer
    }

    /// Create the consumer group and recover abandoned entries.
    ///
    /// Returns how many entries were reclaimed.
    pub async fn init(&self) -> QueueResult<usize> {
        self.queue.ensure_group().await?;
        Ok(self.recover().await)
    }

    /// Sweep for idle entries and process whatever was reclaimed.
    ///
    /// Each claimed page is processed before the next one is claimed.
    pub async fn recover(&self) -> usize {
        let mut sweep = self.sweeper.start(self.consumer());
        while let Some(entries) = sweep.next_batch().await {
            self.process_batch(entries).await;
        }
        sweep.reclaimed()
    }

    /// Consume until `cancel` fires.
    ///
    /// An entry interrupted by shutdown is left unacknowledged and will be
    /// reclaimed after the idle threshold.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            consumer = %self.consumer(),
            block_ms = self.settings.block.as_millis() as u64,
            "Job service started",
        );
        let mut last_sweep = Instant::now();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            if last_sweep.elapsed() >= self.settings.recovery_interval {
                self.recover().await;
                last_sweep = Instant::now();
            }

            let delivered = tokio::select! {
                _ = cancel.cancelled() => break,
                delivered = self.queue.dequeue(
                    self.consumer(),
                    self.settings.block,
                    self.settings.batch_size,
                ) => delivered,
            };

            match delivered {
                Ok(entries) if entries.is_empty() => {}
                Ok(entries) => {
                    let count = entries.len();
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            tracing::warn!(count, "Shutdown interrupted queue batch");
                            break;
                        }
                        _ = self.process_batch(entries) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, consumer = %self.consumer(), "Dequeue failed");
                    if matches!(e, QueueError::NoGroup(_)) {
                        if let Err(e) = self.queue.ensure_group().await {
                            tracing::error!(error = %e, "Failed to recreate consumer group");
                        }
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.error_backoff) => {}
                    }
                }
            }
        }

        tracing::info!(consumer = %self.consumer(), "Job service stopped");
    }

    /// Lease every entry of a batch, then handle them in order.
    pub async fn process_batch(&self, entries: Vec<QueueEntry>) -> Vec<EntryOutcome> {
        let leased: Vec<(QueueEntry, Lease)> = entries
            .into_iter()
            .map(|entry| {
                let lease = self.lease.hold(entry.id);
                (entry, lease)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(leased.len());
        for (entry, lease) in leased {
            outcomes.push(self.settle(entry, &lease).await);
        }
        outcomes
    }

    /// Process one delivered entry and settle it on the queue.
    pub async fn handle_entry(&self, entry: QueueEntry) -> EntryOutcome {
        let lease = self.lease.hold(entry.id);
        self.settle(entry, &lease).await
    }

    async fn settle(&self, entry: QueueEntry, lease: &Lease) -> EntryOutcome {
        let command = match entry.command() {
            Ok(command) => command,
            Err(reason) => {
                tracing::warn!(
                    entry_id = %entry.id,
                    reason = %reason,
                    "Dropping malformed queue entry",
                );
                if let Err(e) = self.queue.acknowledge(&entry.id).await {
                    tracing::error!(entry_id = %entry.id, error = %e, "Failed to acknowledge entry");
                }
                return EntryOutcome::Dropped;
            }
        };

        // Entries that waited behind others are re-confirmed before work
        // starts; a zero count means another consumer reclaimed them.
        if lease.is_lost() || !self.still_owned(&entry).await {
            tracing::warn!(
                entry_id = %entry.id,
                job_id = %command.external_id(),
                consumer = %self.consumer(),
                "Queue entry now owned by another consumer, skipping",
            );
            return EntryOutcome::Abandoned;
        }

        tracing::debug!(entry_id = %entry.id, action = command.action(), job_id = %command.external_id(), "Handling queue entry");

        let result = tokio::select! {
            biased;
            _ = lease.lost() => {
                tracing::warn!(
                    entry_id = %entry.id,
                    job_id = %command.external_id(),
                    "Stopped processing queue entry after losing ownership",
                );
                return EntryOutcome::Abandoned;
            }
            result = self.execute(&command) => result,
        };

        if let Err(e) = result {
            tracing::error!(
                entry_id = %entry.id,
                job_id = %command.external_id(),
                error = %e,
                "Failed to process queue entry, leaving it for recovery",
            );
            return EntryOutcome::Deferred;
        }

        if lease.is_lost() {
            tracing::warn!(entry_id = %entry.id, "Ownership lost before acknowledge, leaving entry");
            return EntryOutcome::Abandoned;
        }
        if let Err(e) = self.queue.acknowledge(&entry.id).await {
            tracing::error!(entry_id = %entry.id, error = %e, "Failed to acknowledge entry");
            return EntryOutcome::Deferred;
        }
        if let Err(e) = self.queue.release_outstanding(command.external_id()).await {
            tracing::warn!(job_id = %command.external_id(), error = %e, "Failed to clear outstanding marker");
        }
        EntryOutcome::Processed
    }

    /// Renew `entry` for this consumer. A backend error is not proof of
    /// lost ownership, so processing goes ahead.
    async fn still_owned(&self, entry: &QueueEntry) -> bool {
        match self.queue.renew(self.consumer(), &[entry.id]).await {
            Ok(renewed) => renewed > 0,
            Err(e) => {
                tracing::warn!(entry_id = %entry.id, error = %e, "Ownership check failed");
                true
            }
        }
    }

    async fn execute(&self, command: &QueueCommand) -> Result<(), ProcessError> {
        match command {
            QueueCommand::Start { external_id } => self
                .processor
                .process_start(external_id)
                .await
                .map(|outcome| tracing::debug!(job_id = %external_id, ?outcome, "Start processed")),
            QueueCommand::Retry {
                external_id,
                section_id,
            } => self
                .processor
                .retry_section(external_id, section_id)
                .await
                .map(|outcome| {
                    tracing::debug!(job_id = %external_id, section_id, ?outcome, "Retry processed")
                }),
        }
    }
}
