use scribe_db::StoreError;

/// Errors from a content provider. All of them fail the section; none are
/// retried inline.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The section's cancellation token fired.
    #[error("Generation cancelled")]
    Cancelled,

    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider answered with a non-2xx status.
    #[error("Provider API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Provider misconfigured: {0}")]
    Configuration(String),
}

/// Infrastructure failure while processing a job. The queue entry stays
/// unacknowledged so it can be recovered.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Store(#[from] StoreError),
}
