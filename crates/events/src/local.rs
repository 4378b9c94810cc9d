//! In-process broker backed by one `tokio::sync::broadcast` channel per
//! topic.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;

use crate::broker::{Broker, Subscription};
use crate::error::EventResult;

/// Default buffer capacity for each channel.
const DEFAULT_CAPACITY: usize = 1024;

/// Single-process [`Broker`].
///
/// Channels are created on first subscribe and dropped once a publish finds
/// no receivers left, so idle jobs do not accumulate senders.
pub struct LocalBroker {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl LocalBroker {
    /// Create a broker whose channels buffer `capacity` messages.
    ///
    /// When a buffer is full the oldest unconsumed messages are dropped and
    /// slow subscribers skip ahead.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<String>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels()
            .get(channel)
            .map(broadcast::Sender::receiver_count)
            .unwrap_or(0)
    }

    /// Number of channels currently tracked.
    pub fn channel_count(&self) -> usize {
        self.channels().len()
    }
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl Broker for LocalBroker {
    async fn publish(&self, channel: &str, payload: &str) -> EventResult<()> {
        let mut channels = self.channels();
        let Some(sender) = channels.get(channel) else {
            return Ok(());
        };
        if sender.send(payload.to_string()).is_err() {
            // Zero receivers: nobody is listening any more.
            channels.remove(channel);
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> EventResult<Subscription> {
        let mut receiver = self
            .channels()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        let name = channel.to_string();
        let messages = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(message) => yield message,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(channel = %name, skipped, "Subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Ok(Subscription::new(channel, messages.boxed()))
    }
}
