//! A set of helpers for testing

mod alert;
mod pipeline;
mod source;

pub use alert::AlertBuilder;
pub use pipeline::RecordingPipeline;
pub use source::StreamAlertSource;
