//! Per-job event channels.
//!
//! Events are ephemeral: they are broadcast to whoever is subscribed at
//! publish time and are never stored. Observers that connect late rebuild
//! state from a Job Store snapshot.

pub mod broker;
pub mod error;
pub mod event;
pub mod local;
pub mod publisher;
pub mod redis_broker;

pub use broker::{Broker, Subscription};
pub use error::{EventError, EventResult};
pub use event::{ControlMessage, JobEvent};
pub use local::LocalBroker;
pub use publisher::EventPublisher;
pub use redis_broker::RedisBroker;
