//! The orchestrator worker: reads job commands from the durable queue and
//! hands them to the section state machine.

pub mod config;
pub mod lease;
pub mod service;

pub use config::{ConfigError, ProviderKind, WorkerConfig};
pub use lease::{Lease, LeaseKeeper};
pub use service::{EntryOutcome, JobService, ServiceSettings};
