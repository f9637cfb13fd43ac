//! Error types for the notification boundary.

use thiserror::Error;

/// Errors a notification pipeline can report for a flushed batch.
///
/// Any error leaves the batch buffered; the group resends it on its next
/// scheduled tick.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The pipeline failed to deliver the batch.
    #[error("Notification delivery failed: {0}")]
    DeliveryFailed(String),

    /// The flush was canceled, typically during shutdown or reload.
    #[error("Notification canceled: {0}")]
    Canceled(String),
}

impl NotifyError {
    /// Returns true if the error was caused by cancellation, which is an
    /// expected condition during shutdown rather than a delivery fault.
    pub fn is_canceled(&self) -> bool {
        matches!(self, NotifyError::Canceled(_))
    }
}
