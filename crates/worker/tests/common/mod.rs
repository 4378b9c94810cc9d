#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use scribe_core::error::CoreError;
use scribe_core::generation::GenerationConfig;
use scribe_core::status::{JobStatus, SectionStatus};
use scribe_core::types::DbId;
use scribe_db::models::job::Job;
use scribe_db::models::section::Section;
use scribe_db::{JobSnapshot, JobStore, MemoryJobStore, SectionCompletion, StoreResult};
use scribe_events::{EventPublisher, LocalBroker};
use scribe_pipeline::{
    JobProcessor, ProgressReporter, Provider, ProviderError, ProviderOutput, ProviderRequest,
};
use scribe_queue::{MemoryQueue, WorkQueue};
use scribe_worker::{JobService, ServiceSettings};
use tokio_util::sync::CancellationToken;

pub const MIN_IDLE: Duration = Duration::from_secs(60);

/// Succeeds for every section except the ones told to hang until cancelled.
#[derive(Default)]
pub struct TestProvider {
    hang: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl TestProvider {
    pub fn hang_on(&self, section_id: &str) {
        self.hang.lock().unwrap().insert(section_id.to_string());
    }

    pub fn release(&self, section_id: &str) {
        self.hang.lock().unwrap().remove(section_id);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for TestProvider {
    async fn generate_section(
        &self,
        request: &ProviderRequest,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<ProviderOutput, ProviderError> {
        self.calls.lock().unwrap().push(request.section_id.clone());
        progress.report(50.0).await;
        let hang = self.hang.lock().unwrap().contains(&request.section_id);
        if hang {
            cancel.cancelled().await;
            return Err(ProviderError::Cancelled);
        }
        Ok(ProviderOutput {
            content: format!("# {}", request.section_id),
            token_count: 10,
        })
    }
}

pub struct Harness {
    pub store: Arc<MemoryJobStore>,
    pub queue: Arc<MemoryQueue>,
    pub publisher: EventPublisher,
    pub provider: Arc<TestProvider>,
}

impl Harness {
    pub async fn new() -> Self {
        let queue = Arc::new(MemoryQueue::new());
        queue.ensure_group().await.unwrap();
        Self {
            store: Arc::new(MemoryJobStore::new()),
            queue,
            publisher: EventPublisher::new(Arc::new(LocalBroker::default())),
            provider: Arc::new(TestProvider::default()),
        }
    }

    pub fn service(&self, consumer: &str) -> JobService {
        self.service_with_store(consumer, self.store.clone())
    }

    pub fn service_with_store(&self, consumer: &str, store: Arc<dyn JobStore>) -> JobService {
        let processor = JobProcessor::new(store, self.publisher.clone(), self.provider.clone());
        let mut settings = ServiceSettings::new(consumer);
        settings.block = Duration::from_millis(20);
        settings.recovery_min_idle = MIN_IDLE;
        settings.error_backoff = Duration::from_millis(10);
        JobService::new(self.queue.clone(), processor, settings)
    }

    pub async fn job(&self, external_id: &str, sections: &[&str]) -> Job {
        let config = GenerationConfig {
            selected_sections: Some(sections.iter().map(|s| (s.to_string(), true)).collect()),
            generation_order: Some(sections.iter().map(|s| s.to_string()).collect()),
            ..GenerationConfig::default()
        };
        self.store.create_job(external_id, &config).await.unwrap()
    }
}

/// A store whose every call fails, standing in for an unreachable database.
pub struct UnreachableStore;

fn down<T>() -> StoreResult<T> {
    Err(CoreError::Internal("connection refused".into()).into())
}

#[async_trait]
impl JobStore for UnreachableStore {
    async fn create_job(&self, _: &str, _: &GenerationConfig) -> StoreResult<Job> {
        down()
    }
    async fn find_job(&self, _: &str) -> StoreResult<Option<Job>> {
        down()
    }
    async fn snapshot(&self, _: &str) -> StoreResult<Option<JobSnapshot>> {
        down()
    }
    async fn mark_job_running(&self, _: DbId) -> StoreResult<Option<Job>> {
        down()
    }
    async fn finish_job(&self, _: DbId, _: JobStatus) -> StoreResult<Option<Job>> {
        down()
    }
    async fn reset_job(&self, _: DbId) -> StoreResult<Job> {
        down()
    }
    async fn list_sections(&self, _: DbId) -> StoreResult<Vec<Section>> {
        down()
    }
    async fn find_section(&self, _: DbId, _: &str) -> StoreResult<Option<Section>> {
        down()
    }
    async fn queue_section(&self, _: DbId, _: &str) -> StoreResult<Section> {
        down()
    }
    async fn activate_section(&self, _: DbId, _: SectionStatus) -> StoreResult<Section> {
        down()
    }
    async fn update_section_progress(&self, _: DbId, _: u8) -> StoreResult<()> {
        down()
    }
    async fn complete_section(&self, _: DbId, _: &SectionCompletion) -> StoreResult<Section> {
        down()
    }
    async fn fail_section(&self, _: DbId, _: &str) -> StoreResult<Section> {
        down()
    }
    async fn ping(&self) -> StoreResult<()> {
        down()
    }
}

