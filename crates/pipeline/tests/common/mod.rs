#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use scribe_core::generation::GenerationConfig;
use scribe_db::{JobStore, MemoryJobStore};
use scribe_events::{EventPublisher, JobEvent, LocalBroker};
use scribe_pipeline::{
    JobProcessor, ProgressReporter, Provider, ProviderError, ProviderOutput, ProviderRequest,
};
use tokio_util::sync::CancellationToken;

/// What the scripted provider does for one section.
#[derive(Debug, Clone)]
pub enum Script {
    /// Report the given progress values, then return the content.
    Succeed {
        progress: Vec<f64>,
        content: String,
        tokens: i64,
    },
    /// Report progress, then fail with a provider API error.
    Fail { progress: Vec<f64> },
    /// Report progress, then wait until cancelled.
    Hang { progress: Vec<f64> },
    /// Report progress, then fail as if cancelled mid-flight.
    CancelledMidFlight { progress: Vec<f64> },
}

impl Script {
    pub fn ok(content: &str, tokens: i64) -> Self {
        Script::Succeed {
            progress: vec![10.0, 40.0, 80.0],
            content: content.to_string(),
            tokens,
        }
    }

    fn progress(&self) -> &[f64] {
        match self {
            Script::Succeed { progress, .. }
            | Script::Fail { progress }
            | Script::Hang { progress }
            | Script::CancelledMidFlight { progress } => progress,
        }
    }
}

/// Provider driven by per-section scripts; records call order.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, section_id: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(section_id.to_string(), script);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn generate_section(
        &self,
        request: &ProviderRequest,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<ProviderOutput, ProviderError> {
        self.calls.lock().unwrap().push(request.section_id.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&request.section_id)
            .cloned()
            .unwrap_or_else(|| Script::ok(&format!("# {}", request.section_id), 5));

        for p in script.progress() {
            progress.report(*p).await;
        }

        match script {
            Script::Succeed {
                content, tokens, ..
            } => Ok(ProviderOutput {
                content,
                token_count: tokens,
            }),
            Script::Fail { .. } => Err(ProviderError::Api {
                status: 500,
                body: "upstream exploded".into(),
            }),
            Script::Hang { .. } => {
                cancel.cancelled().await;
                Err(ProviderError::Cancelled)
            }
            Script::CancelledMidFlight { .. } => Err(ProviderError::Cancelled),
        }
    }
}

pub struct Harness {
    pub store: Arc<MemoryJobStore>,
    pub broker: Arc<LocalBroker>,
    pub publisher: EventPublisher,
    pub provider: Arc<ScriptedProvider>,
    pub processor: JobProcessor,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryJobStore::new());
        let broker = Arc::new(LocalBroker::default());
        let publisher = EventPublisher::new(broker.clone());
        let provider = Arc::new(ScriptedProvider::new());
        let processor = JobProcessor::new(store.clone(), publisher.clone(), provider.clone())
            .with_persist_every(2);
        Self {
            store,
            broker,
            publisher,
            provider,
            processor,
        }
    }

    /// Create a job selecting exactly `sections`, in that order.
    pub async fn job(&self, external_id: &str, sections: &[&str]) -> scribe_db::models::job::Job {
        let config = GenerationConfig {
            selected_sections: Some(sections.iter().map(|s| (s.to_string(), true)).collect()),
            generation_order: Some(sections.iter().map(|s| s.to_string()).collect()),
            ..GenerationConfig::default()
        };
        self.store.create_job(external_id, &config).await.unwrap()
    }

    pub async fn events(&self, external_id: &str) -> BoxStream<'static, JobEvent> {
        self.publisher.subscribe(external_id).await.unwrap()
    }
}

/// Everything already buffered on the stream, without waiting.
pub fn drain(events: &mut BoxStream<'static, JobEvent>) -> Vec<JobEvent> {
    let mut out = Vec::new();
    while let Some(Some(event)) = events.next().now_or_never() {
        out.push(event);
    }
    out
}

/// Event kinds, for order assertions.
pub fn kinds(events: &[JobEvent]) -> Vec<&'static str> {
    events.iter().map(JobEvent::kind).collect()
}
