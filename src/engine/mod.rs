//! The core dispatch engine: the dispatcher and its aggregation groups.

pub mod dispatcher;
pub mod group;

pub use dispatcher::{Dispatcher, Limits, StaticLimits};
pub use group::{AggregationGroup, TimeoutFn};
