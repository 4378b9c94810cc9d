#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use scribe_api::config::ServerConfig;
use scribe_api::routes;
use scribe_api::state::AppState;
use scribe_db::{JobStore, MemoryJobStore};
use scribe_events::{EventPublisher, LocalBroker};
use scribe_queue::{
    ClaimBatch, EnqueueOutcome, EntryId, MemoryQueue, PendingEntry, QueueCommand, QueueEntry,
    QueueError, QueueResult, WorkQueue,
};

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        sse_keepalive_secs: 15,
        database_url: String::new(),
        redis_url: String::new(),
    }
}

/// Everything a test needs to drive the router and inspect the backends.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryJobStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub broker: Arc<LocalBroker>,
    pub publisher: EventPublisher,
    pub tasks: TaskTracker,
    pub shutdown: CancellationToken,
}

impl TestApp {
    /// In-memory store, queue (with its group) and broker.
    pub async fn new() -> Self {
        let queue = Arc::new(MemoryQueue::new());
        queue.ensure_group().await.unwrap();
        Self::with_queue(queue)
    }

    pub fn with_queue(queue: Arc<dyn WorkQueue>) -> Self {
        let store = Arc::new(MemoryJobStore::new());
        let broker = Arc::new(LocalBroker::default());
        let publisher = EventPublisher::new(broker.clone());
        let tasks = TaskTracker::new();
        let shutdown = CancellationToken::new();

        let state = AppState {
            store: store.clone(),
            queue: queue.clone(),
            publisher: publisher.clone(),
            config: Arc::new(test_config()),
            tasks: tasks.clone(),
            shutdown: shutdown.clone(),
        };

        Self {
            router: build_test_app(state),
            store,
            queue,
            broker,
            publisher,
            tasks,
            shutdown,
        }
    }

    /// Create a job directly in the store, bypassing ingress.
    pub async fn job(&self, external_id: &str, sections: &[&str]) -> scribe_db::models::job::Job {
        let mut config = scribe_core::generation::GenerationConfig::default();
        config.selected_sections = Some(sections.iter().map(|s| (s.to_string(), true)).collect());
        config.generation_order = Some(sections.iter().map(|s| s.to_string()).collect());
        self.store.create_job(external_id, &config).await.unwrap()
    }
}

/// Build the full application router with all middleware layers.
///
/// This mirrors the router construction in `main.rs` so integration tests
/// exercise the same middleware stack (CORS, request ID, timeout, tracing,
/// panic recovery) that production uses.
pub fn build_test_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(["http://localhost:5173".parse().unwrap()])
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600));

    let request_id_header = HeaderName::from_static("x-request-id");

    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes())
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: &Router, path: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(path)
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn post_json(app: &Router, path: &str, body: Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn post_empty(app: &Router, path: &str) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(path)
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

/// Collect a finite response body and parse it as JSON.
pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ---------------------------------------------------------------------------
// Server-sent events
// ---------------------------------------------------------------------------

/// One parsed SSE message.
#[derive(Debug, Clone, PartialEq)]
pub struct SseMessage {
    pub event: Option<String>,
    pub data: Value,
}

/// Incremental reader over a streaming response body.
pub struct SseReader {
    body: Body,
    buffer: String,
}

impl SseReader {
    pub fn new(response: Response) -> Self {
        Self {
            body: response.into_body(),
            buffer: String::new(),
        }
    }

    /// The next message carrying data, or `None` once the stream ends.
    /// Keep-alive comments are skipped.
    pub async fn next(&mut self) -> Option<SseMessage> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let block: String = self.buffer.drain(..end + 2).collect();
                if let Some(message) = parse_block(&block) {
                    return Some(message);
                }
                continue;
            }

            let frame = tokio::time::timeout(Duration::from_secs(5), self.body.frame())
                .await
                .expect("timed out waiting for an SSE message")?
                .unwrap();
            if let Ok(data) = frame.into_data() {
                self.buffer.push_str(std::str::from_utf8(&data).unwrap());
            }
        }
    }
}

fn parse_block(block: &str) -> Option<SseMessage> {
    let mut event = None;
    let mut data = String::new();
    for line in block.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push_str(value.trim_start());
        }
    }
    if data.is_empty() {
        return None;
    }
    Some(SseMessage {
        event,
        data: serde_json::from_str(&data).unwrap(),
    })
}

// ---------------------------------------------------------------------------
// Failing queue
// ---------------------------------------------------------------------------

/// A queue whose backend is down.
pub struct UnavailableQueue;

fn down<T>() -> QueueResult<T> {
    Err(QueueError::OperationFailed("connection refused".into()))
}

#[async_trait]
impl WorkQueue for UnavailableQueue {
    async fn ensure_group(&self) -> QueueResult<()> {
        down()
    }
    async fn enqueue(&self, _command: &QueueCommand) -> QueueResult<EntryId> {
        down()
    }
    async fn enqueue_exclusive(&self, _command: &QueueCommand) -> QueueResult<EnqueueOutcome> {
        down()
    }
    async fn release_outstanding(&self, _external_id: &str) -> QueueResult<()> {
        down()
    }
    async fn is_outstanding(&self, _external_id: &str) -> QueueResult<bool> {
        Ok(false)
    }
    async fn dequeue(
        &self,
        _consumer: &str,
        _block: Duration,
        _count: usize,
    ) -> QueueResult<Vec<QueueEntry>> {
        down()
    }
    async fn acknowledge(&self, _id: &EntryId) -> QueueResult<()> {
        down()
    }
    async fn claim_idle(
        &self,
        _consumer: &str,
        _min_idle: Duration,
        _cursor: &EntryId,
        _count: usize,
    ) -> QueueResult<ClaimBatch> {
        down()
    }
    async fn renew(&self, _consumer: &str, _ids: &[EntryId]) -> QueueResult<usize> {
        down()
    }
    async fn pending(&self, _limit: usize) -> QueueResult<Vec<PendingEntry>> {
        down()
    }
}
