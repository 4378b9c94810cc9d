//! Scribe API server library.
//!
//! Exposes the building blocks (config, state, error handling, routes, the
//! streaming gateway) so integration tests and the binary entrypoint can
//! both access them.

pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod response;
pub mod routes;
pub mod simulate;
pub mod state;
