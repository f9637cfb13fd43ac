//! Shared dispatcher metrics.

use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

/// A cheaply-cloneable handle over the dispatcher's shared metrics.
///
/// Exposes read accessors for every series so an external scrape surface
/// can export them; registration with a metrics backend is the embedding
/// application's concern.
#[derive(Debug, Clone, Default)]
pub struct DispatcherMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    /// Number of currently active aggregation groups.
    aggregation_groups: AtomicUsize,
    /// Alerts dropped because the aggregation-group limit was reached.
    limit_rejections: AtomicU64,
    /// Alerts that went through route matching.
    processed_alerts: AtomicU64,
    /// Total time spent matching and inserting alerts, in nanoseconds.
    processing_nanos: AtomicU64,
    /// Batches handed to the notification pipeline.
    flushed_batches: AtomicU64,
}

impl DispatcherMetrics {
    /// Creates a zeroed metrics handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the active aggregation-group gauge.
    pub fn set_aggregation_groups(&self, count: usize) {
        self.inner.aggregation_groups.store(count, Ordering::Relaxed);
    }

    /// The active aggregation-group gauge.
    pub fn aggregation_groups(&self) -> usize {
        self.inner.aggregation_groups.load(Ordering::Relaxed)
    }

    /// Counts one alert dropped at the aggregation-group limit.
    pub fn inc_limit_rejections(&self) {
        self.inner.limit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Alerts dropped because the aggregation-group limit was reached.
    pub fn limit_rejections(&self) -> u64 {
        self.inner.limit_rejections.load(Ordering::Relaxed)
    }

    /// Observes the processing latency of one consumed alert.
    pub fn observe_processing(&self, elapsed: Duration) {
        self.inner.processed_alerts.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.inner.processing_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Alerts that went through route matching.
    pub fn processed_alerts(&self) -> u64 {
        self.inner.processed_alerts.load(Ordering::Relaxed)
    }

    /// Total time spent matching and inserting alerts.
    pub fn processing_total(&self) -> Duration {
        Duration::from_nanos(self.inner.processing_nanos.load(Ordering::Relaxed))
    }

    /// Counts one batch handed to the notification pipeline.
    pub fn inc_flushed_batches(&self) {
        self.inner.flushed_batches.fetch_add(1, Ordering::Relaxed);
    }

    /// Batches handed to the notification pipeline.
    pub fn flushed_batches(&self) -> u64 {
        self.inner.flushed_batches.load(Ordering::Relaxed)
    }
}
