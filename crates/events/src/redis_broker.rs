//! Redis pub/sub backend.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};

use crate::broker::{Broker, Subscription};
use crate::error::{EventError, EventResult};

/// Cross-process [`Broker`] built on Redis `PUBLISH`/`SUBSCRIBE`.
///
/// Publishing shares one multiplexed connection. Every subscription opens
/// its own pub/sub connection, which closes when the subscription drops.
pub struct RedisBroker {
    client: Client,
    connection: MultiplexedConnection,
}

impl RedisBroker {
    pub async fn connect(url: &str) -> EventResult<Self> {
        let client = Client::open(url)
            .map_err(|e| EventError::Broker(format!("invalid redis url {url}: {e}")))?;
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self { client, connection })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, channel: &str, payload: &str) -> EventResult<()> {
        let mut conn = self.connection.clone();
        let _receivers: i64 = conn.publish(channel, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> EventResult<Subscription> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let name = channel.to_string();
        let messages = pubsub.into_on_message().filter_map(move |msg| {
            let payload = match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    tracing::warn!(channel = %name, error = %e, "Dropping non-text pub/sub payload");
                    None
                }
            };
            futures::future::ready(payload)
        });

        Ok(Subscription::new(channel, messages.boxed()))
    }
}
