//! Routing tree and label matchers.

pub mod matcher;
pub mod route;

pub use matcher::{MatchOperator, Matcher, MatcherError};
pub use route::{Route, RouteConfig, RouteError, RouteOpts};
