//! A single-use alert source over a pre-built stream.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::providers::{AlertSource, AlertStream};

/// An [`AlertSource`] handing out one pre-built stream.
///
/// A second subscription receives an immediately-ended stream.
#[derive(Debug)]
pub struct StreamAlertSource {
    stream: Mutex<Option<AlertStream>>,
}

impl StreamAlertSource {
    /// Wraps the given stream.
    pub fn new(stream: AlertStream) -> Self {
        Self { stream: Mutex::new(Some(stream)) }
    }
}

#[async_trait]
impl AlertSource for StreamAlertSource {
    async fn subscribe(&self) -> AlertStream {
        match self.stream.lock().await.take() {
            Some(stream) => stream,
            None => {
                let (_, stream) = AlertStream::channel(1);
                stream
            }
        }
    }
}
