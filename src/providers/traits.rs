//! Contracts of the external alert store feeding the dispatcher.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::Alert;

/// A terminal failure of the alert source.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The source failed and the stream will produce no further alerts.
    #[error("Alert source failed: {0}")]
    Source(String),
}

/// A pull-based stream of alerts with an explicit terminal error signal.
///
/// The stream ends when `next` returns `None`; `err` then reports whether
/// it ended cleanly or because the source failed.
#[derive(Debug)]
pub struct AlertStream {
    alerts: mpsc::Receiver<Alert>,
    error: Arc<Mutex<Option<SourceError>>>,
}

impl AlertStream {
    /// Creates a connected sender/stream pair with the given buffer
    /// capacity.
    pub fn channel(capacity: usize) -> (AlertSender, AlertStream) {
        let (tx, rx) = mpsc::channel(capacity);
        let error = Arc::new(Mutex::new(None));
        (
            AlertSender { alerts: tx, error: Arc::clone(&error) },
            AlertStream { alerts: rx, error },
        )
    }

    /// Receives the next alert; `None` once the stream has terminated.
    ///
    /// Cancel-safe: losing a race in a `select!` never loses an alert.
    pub async fn next(&mut self) -> Option<Alert> {
        self.alerts.recv().await
    }

    /// The terminal error of the stream, if it failed.
    pub fn err(&self) -> Option<SourceError> {
        self.error.lock().map(|guard| guard.clone()).unwrap_or(None)
    }

    /// Closes the consuming side; pending alerts are dropped.
    pub fn close(&mut self) {
        self.alerts.close();
    }
}

/// The producing half of an [`AlertStream`].
#[derive(Debug, Clone)]
pub struct AlertSender {
    alerts: mpsc::Sender<Alert>,
    error: Arc<Mutex<Option<SourceError>>>,
}

impl AlertSender {
    /// Sends one alert, waiting for buffer capacity.
    ///
    /// Returns an error when the stream side has been closed.
    pub async fn send(&self, alert: Alert) -> Result<(), SourceError> {
        self.alerts
            .send(alert)
            .await
            .map_err(|_| SourceError::Source("alert stream closed".to_string()))
    }

    /// Terminates the stream with an error; consumers observe the end of
    /// the stream and then read the error via [`AlertStream::err`].
    pub fn fail(self, error: SourceError) {
        if let Ok(mut slot) = self.error.lock() {
            *slot = Some(error);
        }
    }
}

/// The external alert store the dispatcher subscribes to.
#[async_trait]
pub trait AlertSource: Send + Sync {
    /// Opens a fresh alert stream.
    async fn subscribe(&self) -> AlertStream;
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::LabelSet;

    fn alert() -> Alert {
        let mut labels = LabelSet::new();
        labels.insert("alertname", "foo");
        Alert { labels, annotations: LabelSet::new(), starts_at: Utc::now(), ends_at: None }
    }

    #[tokio::test]
    async fn alerts_flow_sender_to_stream() {
        let (tx, mut stream) = AlertStream::channel(4);

        tx.send(alert()).await.unwrap();
        drop(tx);

        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
        assert!(stream.err().is_none());
    }

    #[tokio::test]
    async fn failing_the_sender_surfaces_a_terminal_error() {
        let (tx, mut stream) = AlertStream::channel(4);

        tx.fail(SourceError::Source("store went away".to_string()));

        assert!(stream.next().await.is_none());
        assert!(stream.err().is_some());
    }
}
