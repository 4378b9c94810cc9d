//! Typed publishing on top of a [`Broker`].

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use scribe_core::naming::{control_channel, job_channel};

use crate::broker::{Broker, Subscription};
use crate::error::EventResult;
use crate::event::{ControlMessage, JobEvent};

/// Serializes [`JobEvent`]s and [`ControlMessage`]s onto a job's channels.
///
/// Cloning is cheap; all clones share the same broker.
#[derive(Clone)]
pub struct EventPublisher {
    broker: Arc<dyn Broker>,
}

impl EventPublisher {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Publish `event` on the job's event channel.
    pub async fn publish(&self, external_id: &str, event: &JobEvent) -> EventResult<()> {
        let payload = serde_json::to_string(event)?;
        self.broker.publish(&job_channel(external_id), &payload).await
    }

    /// Publish and log on failure.
    ///
    /// Events are best effort: the Job Store is already up to date when
    /// this is called, so a lost event only delays observers until their
    /// next snapshot.
    pub async fn emit(&self, external_id: &str, event: &JobEvent) {
        if let Err(e) = self.publish(external_id, event).await {
            tracing::warn!(
                external_id,
                event = event.kind(),
                error = %e,
                "Failed to publish job event",
            );
        }
    }

    /// Subscribe to the job's event channel as raw JSON payloads.
    pub async fn subscribe_raw(&self, external_id: &str) -> EventResult<Subscription> {
        self.broker.subscribe(&job_channel(external_id)).await
    }

    /// Subscribe to the job's event channel, decoding each payload.
    /// Payloads that are not valid events are skipped.
    pub async fn subscribe(&self, external_id: &str) -> EventResult<BoxStream<'static, JobEvent>> {
        let subscription = self.subscribe_raw(external_id).await?;
        Ok(subscription
            .filter_map(|payload| futures::future::ready(decode::<JobEvent>(&payload)))
            .boxed())
    }

    pub async fn send_control(&self, external_id: &str, message: ControlMessage) -> EventResult<()> {
        let payload = serde_json::to_string(&message)?;
        self.broker.publish(&control_channel(external_id), &payload).await
    }

    pub async fn subscribe_control(
        &self,
        external_id: &str,
    ) -> EventResult<BoxStream<'static, ControlMessage>> {
        let subscription = self.broker.subscribe(&control_channel(external_id)).await?;
        Ok(subscription
            .filter_map(|payload| futures::future::ready(decode::<ControlMessage>(&payload)))
            .boxed())
    }
}

fn decode<T: serde::de::DeserializeOwned>(payload: &str) -> Option<T> {
    match serde_json::from_str(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping undecodable message");
            None
        }
    }
}
