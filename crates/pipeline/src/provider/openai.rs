//! Streaming client for OpenAI-compatible chat completion endpoints.

use async_trait::async_trait;
use futures::StreamExt;
use scribe_core::prompt::SYSTEM_PROMPT;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{estimate_tokens, ProgressReporter, Provider, ProviderOutput, ProviderRequest};
use crate::error::ProviderError;

/// Section length treated as "done" for progress estimation.
const EXPECTED_CHARS: usize = 5000;

/// Progress is capped below 100 until the stream actually finishes.
const MAX_STREAMING_PROGRESS: usize = 99;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    /// Base URL without trailing slash, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: OpenAiConfig) -> Self {
        Self { client, config }
    }

    async fn stream_completion(
        &self,
        request: &ProviderRequest,
        progress: &ProgressReporter,
    ) -> Result<ProviderOutput, ProviderError> {
        if self.config.api_key.is_empty() {
            return Err(ProviderError::Configuration(
                "OPENAI_API_KEY is not set".to_string(),
            ));
        }

        let body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": request.prompt },
            ],
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        let response = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.config.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let mut stream = response.bytes_stream();
        let mut accumulator = StreamAccumulator::default();
        while let Some(chunk) = stream.next().await {
            if accumulator.push(&chunk?) {
                progress.report(accumulator.progress()).await;
            }
        }
        accumulator.flush();

        Ok(accumulator.finish())
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn generate_section(
        &self,
        request: &ProviderRequest,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<ProviderOutput, ProviderError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            result = self.stream_completion(request, &progress) => result,
        }
    }
}

// ---------------------------------------------------------------------------
// Server-sent event parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    delta: ChatDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChatDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    completion_tokens: i64,
}

/// Incremental parser for a chat completion SSE body.
///
/// Bytes are buffered until a full line is available so multi-byte
/// characters split across chunks decode correctly.
#[derive(Debug, Default)]
struct StreamAccumulator {
    pending: Vec<u8>,
    content: String,
    completion_tokens: Option<i64>,
}

impl StreamAccumulator {
    /// Feed raw bytes. Returns whether any content was appended.
    fn push(&mut self, bytes: &[u8]) -> bool {
        self.pending.extend_from_slice(bytes);
        let mut grew = false;
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            grew |= self.apply_line(&String::from_utf8_lossy(&line));
        }
        grew
    }

    /// Process a trailing line that was not newline-terminated.
    fn flush(&mut self) {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.apply_line(&String::from_utf8_lossy(&line));
        }
    }

    fn apply_line(&mut self, line: &str) -> bool {
        let Some(data) = line.trim().strip_prefix("data:") else {
            return false;
        };
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            return false;
        }

        let chunk: ChatChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unparseable completion chunk");
                return false;
            }
        };

        if let Some(usage) = chunk.usage {
            self.completion_tokens = Some(usage.completion_tokens);
        }

        match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
            Some(delta) if !delta.is_empty() => {
                self.content.push_str(&delta);
                true
            }
            _ => false,
        }
    }

    fn progress(&self) -> f64 {
        let percent = self.content.len() * 100 / EXPECTED_CHARS;
        percent.min(MAX_STREAMING_PROGRESS) as f64
    }

    fn finish(self) -> ProviderOutput {
        let token_count = match self.completion_tokens {
            Some(tokens) if tokens > 0 => tokens,
            _ => estimate_tokens(&self.content),
        };
        ProviderOutput {
            content: self.content,
            token_count,
        }
    }
}
