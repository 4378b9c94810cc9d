#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for EventError {
    fn from(err: redis::RedisError) -> Self {
        EventError::Broker(err.to_string())
    }
}

pub type EventResult<T> = Result<T, EventError>;
