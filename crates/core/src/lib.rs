pub mod catalog;
pub mod diff;
pub mod error;
pub mod generation;
pub mod naming;
pub mod progress;
pub mod prompt;
pub mod status;
pub mod types;
