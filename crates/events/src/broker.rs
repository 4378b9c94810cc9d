use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

use crate::error::EventResult;

/// Fan-out message transport keyed by channel name.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Deliver `payload` to every current subscriber of `channel`.
    /// Subscribers that are not connected receive nothing.
    async fn publish(&self, channel: &str, payload: &str) -> EventResult<()>;

    /// Open a dedicated subscription to `channel`.
    async fn subscribe(&self, channel: &str) -> EventResult<Subscription>;
}

/// A live subscription yielding raw message payloads in publish order.
///
/// The underlying broker resources are released when this value is
/// dropped.
pub struct Subscription {
    channel: String,
    messages: BoxStream<'static, String>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, messages: BoxStream<'static, String>) -> Self {
        Self {
            channel: channel.into(),
            messages,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl Stream for Subscription {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.messages.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}
