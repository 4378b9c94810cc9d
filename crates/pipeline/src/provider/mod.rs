//! The content-generation seam.
//!
//! A [`Provider`] turns a prompt into section text. It reports progress
//! through a bounded channel and must return [`ProviderError::Cancelled`]
//! promptly once its cancellation token fires.

mod openai;
mod simulated;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;

pub use openai::{OpenAiConfig, OpenAiProvider};
pub use simulated::SimulatedProvider;

/// Capacity of the progress channel between a provider and the processor.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRequest {
    pub section_id: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderOutput {
    pub content: String,
    pub token_count: i64,
}

/// Sending half of a section's progress channel.
///
/// Values are raw percentages; the processor clamps them and keeps them
/// monotonic. Sending waits for capacity, so no update is dropped.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::Sender<f64>,
}

impl ProgressReporter {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<f64>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub async fn report(&self, percent: f64) {
        // The receiver only goes away once the section is settled.
        let _ = self.tx.send(percent).await;
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    async fn generate_section(
        &self,
        request: &ProviderRequest,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<ProviderOutput, ProviderError>;
}

/// Token estimate used when a provider does not report usage.
pub fn estimate_tokens(content: &str) -> i64 {
    content.len().div_ceil(4) as i64
}
