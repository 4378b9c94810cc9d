use std::str::FromStr;
use std::time::Duration;

use scribe_pipeline::provider::OpenAiConfig;

use crate::service::ServiceSettings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Which content provider the worker drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Simulated,
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "simulated" => Ok(Self::Simulated),
            other => Err(ConfigError::Invalid {
                name: "PROVIDER",
                reason: format!("unknown provider '{other}'"),
            }),
        }
    }
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub redis_url: String,
    /// Unique name of this process within the consumer group.
    pub consumer_name: String,
    pub queue_block: Duration,
    pub queue_batch_size: usize,
    pub recovery_min_idle: Duration,
    pub recovery_batch_size: usize,
    pub recovery_interval: Duration,
    pub error_backoff: Duration,
    /// Persist every Nth progress update.
    pub progress_persist_every: u32,
    pub provider: ProviderKind,
    /// Present when `provider` is [`ProviderKind::OpenAi`].
    pub openai: Option<OpenAiConfig>,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                          |
    /// |--------------------------|----------------------------------|
    /// | `DATABASE_URL`           | required                         |
    /// | `REDIS_URL`              | `redis://127.0.0.1:6379`         |
    /// | `CONSUMER_NAME`          | `orchestrator-<random>`          |
    /// | `QUEUE_BLOCK_MS`         | `5000`                           |
    /// | `QUEUE_BATCH_SIZE`       | `1`                              |
    /// | `RECOVERY_MIN_IDLE_MS`   | `60000`                          |
    /// | `RECOVERY_BATCH_SIZE`    | `10`                             |
    /// | `RECOVERY_INTERVAL_SECS` | `60`                             |
    /// | `ERROR_BACKOFF_MS`       | `2000`                           |
    /// | `PROGRESS_PERSIST_EVERY` | `5`                              |
    /// | `PROVIDER`               | `openai` if a key is set, else `simulated` |
    /// | `OPENAI_API_KEY`         | unset                            |
    /// | `OPENAI_BASE_URL`        | `https://api.openai.com/v1`      |
    /// | `OPENAI_MODEL`           | `gpt-4o`                         |
    /// | `OPENAI_MAX_TOKENS`      | `4096`                           |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let database_url = var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let redis_url = var("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".into());
        let consumer_name = var("CONSUMER_NAME").unwrap_or_else(default_consumer_name);

        let queue_block = Duration::from_millis(parse(&var, "QUEUE_BLOCK_MS", 5000)?);
        let queue_batch_size = parse(&var, "QUEUE_BATCH_SIZE", 1)?;
        let recovery_min_idle = Duration::from_millis(parse(&var, "RECOVERY_MIN_IDLE_MS", 60_000)?);
        let recovery_batch_size = parse(&var, "RECOVERY_BATCH_SIZE", 10)?;
        let recovery_interval = Duration::from_secs(parse(&var, "RECOVERY_INTERVAL_SECS", 60)?);
        let error_backoff = Duration::from_millis(parse(&var, "ERROR_BACKOFF_MS", 2000)?);
        let progress_persist_every = parse(&var, "PROGRESS_PERSIST_EVERY", 5)?;

        let api_key = var("OPENAI_API_KEY");
        let provider = match var("PROVIDER") {
            Some(kind) => kind.parse()?,
            None if api_key.is_some() => ProviderKind::OpenAi,
            None => ProviderKind::Simulated,
        };

        let openai = match provider {
            ProviderKind::Simulated => None,
            ProviderKind::OpenAi => Some(OpenAiConfig {
                api_key: api_key.ok_or(ConfigError::Missing("OPENAI_API_KEY"))?,
                base_url: var("OPENAI_BASE_URL")
                    .unwrap_or_else(|| "https://api.openai.com/v1".into()),
                model: var("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o".into()),
                max_tokens: parse(&var, "OPENAI_MAX_TOKENS", 4096)?,
            }),
        };

        Ok(Self {
            database_url,
            redis_url,
            consumer_name,
            queue_block,
            queue_batch_size,
            recovery_min_idle,
            recovery_batch_size,
            recovery_interval,
            error_backoff,
            progress_persist_every,
            provider,
            openai,
        })
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            consumer: self.consumer_name.clone(),
            block: self.queue_block,
            batch_size: self.queue_batch_size,
            recovery_min_idle: self.recovery_min_idle,
            recovery_batch_size: self.recovery_batch_size,
            recovery_interval: self.recovery_interval,
            error_backoff: self.error_backoff,
        }
    }
}

fn default_consumer_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("orchestrator-{}", &id[..8])
}

fn parse<T>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
