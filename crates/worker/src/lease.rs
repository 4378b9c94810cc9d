//! Keeps queue entries owned while they are being processed.
//!
//! A provider call can run longer than the recovery idle threshold. Without
//! renewal another worker's sweeper would reclaim the entry from a live
//! worker and run the job twice. Renewing every `min_idle / 3` keeps the
//! idle clock well below the threshold; a crashed worker stops renewing
//! and its entries age out normally.
//!
//! Renewal only counts entries the consumer still owns. When it comes back
//! empty the entry has moved to another worker; the lease reports that so
//! the holder stops working on it.

use std::sync::Arc;
use std::time::Duration;

use scribe_queue::{EntryId, WorkQueue};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone)]
pub struct LeaseKeeper {
    queue: Arc<dyn WorkQueue>,
    consumer: String,
    interval: Duration,
}

impl LeaseKeeper {
    pub fn new(queue: Arc<dyn WorkQueue>, consumer: &str, min_idle: Duration) -> Self {
        Self {
            queue,
            consumer: consumer.to_string(),
            interval: (min_idle / 3).max(MIN_RENEW_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start renewing `id` until the returned [`Lease`] drops.
    pub fn hold(&self, id: EntryId) -> Lease {
        let queue = Arc::clone(&self.queue);
        let consumer = self.consumer.clone();
        let period = self.interval;
        let lost = CancellationToken::new();
        let signal = lost.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match queue.renew(&consumer, &[id]).await {
                    Ok(0) => {
                        tracing::warn!(
                            entry_id = %id,
                            consumer = %consumer,
                            "Lost ownership of queue entry",
                        );
                        signal.cancel();
                        break;
                    }
                    Ok(_) => tracing::trace!(entry_id = %id, "Lease renewed"),
                    Err(e) => {
                        tracing::warn!(entry_id = %id, error = %e, "Lease renewal failed");
                    }
                }
            }
        });

        Lease { handle, lost }
    }
}

/// Renewal task for one entry; stops on drop.
pub struct Lease {
    handle: JoinHandle<()>,
    lost: CancellationToken,
}

impl Lease {
    /// Whether a renewal found the entry owned by another consumer.
    pub fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }

    /// Resolves once ownership is lost.
    pub fn lost(&self) -> WaitForCancellationFuture<'_> {
        self.lost.cancelled()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
