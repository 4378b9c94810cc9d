//! Section generation: the provider seam and the per-job state machine
//! that drives sections through it.

pub mod error;
pub mod processor;
pub mod provider;

pub use error::{ProcessError, ProviderError};
pub use processor::{JobProcessor, RetryOutcome, RunOutcome};
pub use provider::{ProgressReporter, Provider, ProviderOutput, ProviderRequest};
