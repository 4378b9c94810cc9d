use std::time::Duration;

use async_trait::async_trait;
use scribe_core::catalog::find_section;
use tokio_util::sync::CancellationToken;

use super::{estimate_tokens, ProgressReporter, Provider, ProviderOutput, ProviderRequest};
use crate::error::ProviderError;

const DEFAULT_STEPS: u32 = 10;
const DEFAULT_STEP_DELAY: Duration = Duration::from_millis(300);

/// Credential-free provider producing canned Markdown at a fixed pace.
#[derive(Debug, Clone)]
pub struct SimulatedProvider {
    steps: u32,
    step_delay: Duration,
}

impl SimulatedProvider {
    pub fn new(steps: u32, step_delay: Duration) -> Self {
        Self {
            steps: steps.max(1),
            step_delay,
        }
    }
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new(DEFAULT_STEPS, DEFAULT_STEP_DELAY)
    }
}

#[async_trait]
impl Provider for SimulatedProvider {
    async fn generate_section(
        &self,
        request: &ProviderRequest,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<ProviderOutput, ProviderError> {
        for step in 1..=self.steps {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                _ = tokio::time::sleep(self.step_delay) => {}
            }
            progress
                .report(f64::from(step) * 100.0 / f64::from(self.steps))
                .await;
        }

        let title = find_section(&request.section_id)
            .map(|s| s.name)
            .unwrap_or(request.section_id.as_str());
        let content = format!(
            "## {title}\n\nSimulated draft of the {title} section.\n\n\
             This text was produced without contacting a model.\n"
        );
        let token_count = estimate_tokens(&content);
        Ok(ProviderOutput {
            content,
            token_count,
        })
    }
}
