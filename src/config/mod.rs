//! Configuration module for the dispatch engine.

mod dispatcher_config;
mod helpers;

pub use dispatcher_config::DispatcherConfig;
pub use helpers::{deserialize_duration_from_seconds, deserialize_opt_duration_from_seconds};
