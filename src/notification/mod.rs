//! The boundary to the external notification pipeline.

pub mod error;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

pub use error::NotifyError;

use crate::models::{Alert, FlushContext};

/// The downstream pipeline that delivers flushed batches.
///
/// `Ok` means every alert in the batch was delivered, permitting the
/// group to drop resolved alerts from its buffer. On `Err` the dispatcher
/// does not retry; the still-buffered alerts are resent on the next tick.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NotificationPipeline: Send + Sync {
    /// Delivers one flushed batch with its group metadata.
    async fn notify(&self, ctx: &FlushContext, alerts: &[Alert]) -> Result<(), NotifyError>;
}
