use thiserror::Error;

/// Errors from the durable queue backend.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to connect to queue backend at '{url}': {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Consumer group '{0}' does not exist")]
    NoGroup(String),

    #[error("Queue operation failed: {0}")]
    OperationFailed(String),

    #[error("Unexpected reply from queue backend: {0}")]
    Protocol(String),
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        if err.code() == Some("NOGROUP") {
            return QueueError::NoGroup(err.to_string());
        }
        QueueError::OperationFailed(err.to_string())
    }
}

/// Why a queue entry could not be turned into a command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedEntry {
    #[error("missing or empty field '{0}'")]
    MissingField(&'static str),

    #[error("unknown action '{0}'")]
    UnknownAction(String),
}

pub type QueueResult<T> = Result<T, QueueError>;
