use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scribe_db::{JobStore, PgJobStore};
use scribe_events::{EventPublisher, RedisBroker};
use scribe_pipeline::provider::{OpenAiProvider, SimulatedProvider};
use scribe_pipeline::{JobProcessor, Provider};
use scribe_queue::{QueueConfig, RedisStreamQueue, WorkQueue};
use scribe_worker::{JobService, ProviderKind, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    init_tracing();

    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    tracing::info!(
        consumer = %config.consumer_name,
        provider = ?config.provider,
        "Loaded worker configuration",
    );

    // --- Database ---
    let pool = scribe_db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    scribe_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    scribe_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database ready");
    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool));

    // --- Queue and broker ---
    let queue: Arc<dyn WorkQueue> =
        Arc::new(RedisStreamQueue::connect(QueueConfig::with_url(&config.redis_url)).await?);
    let broker = Arc::new(RedisBroker::connect(&config.redis_url).await?);
    let publisher = EventPublisher::new(broker);
    tracing::info!("Redis connections established");

    // --- Provider ---
    let provider: Arc<dyn Provider> = match (config.provider, config.openai.clone()) {
        (ProviderKind::OpenAi, Some(openai)) => {
            tracing::info!(model = %openai.model, "Using OpenAI provider");
            Arc::new(OpenAiProvider::new(openai))
        }
        _ => {
            tracing::info!("Using simulated provider");
            Arc::new(SimulatedProvider::default())
        }
    };

    let processor = JobProcessor::new(store, publisher, provider)
        .with_persist_every(config.progress_persist_every);
    let service = JobService::new(queue, processor, config.service_settings());

    // --- Startup recovery ---
    let recovered = service.init().await.context("Failed to initialise consumer group")?;
    tracing::info!(recovered, "Startup recovery finished");

    // --- Run until signalled ---
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    service.run(cancel).await;
    tracing::info!("Worker shut down");
    Ok(())
}

/// Install the global subscriber. `LOG_FORMAT=json` selects JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "scribe_worker=debug,scribe_pipeline=debug,scribe_queue=info,scribe_events=info".into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
