//! The alert source boundary feeding the dispatcher.

pub mod traits;

pub use traits::{AlertSender, AlertSource, AlertStream, SourceError};
