//! A recording notification pipeline double.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    models::{Alert, FlushContext},
    notification::{NotificationPipeline, NotifyError},
};

/// A [`NotificationPipeline`] that records every flushed batch and either
/// accepts or rejects all of them.
#[derive(Debug, Default)]
pub struct RecordingPipeline {
    batches: Mutex<Vec<(FlushContext, Vec<Alert>)>>,
    fail: bool,
}

impl RecordingPipeline {
    /// Creates a pipeline that accepts every batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pipeline that rejects every batch.
    pub fn failing() -> Self {
        Self { batches: Mutex::new(Vec::new()), fail: true }
    }

    /// The batches recorded so far, in delivery order.
    pub fn batches(&self) -> Vec<(FlushContext, Vec<Alert>)> {
        self.batches.lock().map(|guard| guard.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationPipeline for RecordingPipeline {
    async fn notify(&self, ctx: &FlushContext, alerts: &[Alert]) -> Result<(), NotifyError> {
        if let Ok(mut batches) = self.batches.lock() {
            batches.push((ctx.clone(), alerts.to_vec()));
        }
        if self.fail {
            Err(NotifyError::DeliveryFailed("recording pipeline set to fail".to_string()))
        } else {
            Ok(())
        }
    }
}
