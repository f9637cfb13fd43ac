//! The per-group aggregation state machine.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    metrics::DispatcherMetrics,
    models::{Alert, Fingerprint, FlushContext, LabelSet},
    notification::{NotificationPipeline, NotifyError},
    routing::{Route, RouteOpts},
    store::AlertStore,
    timer::FlushTimer,
};

/// Transforms the group interval into the deadline of one notify call.
pub type TimeoutFn = Arc<dyn Fn(Duration) -> Duration + Send + Sync>;

/// One running aggregation group: the alerts sharing identical group-label
/// values under one matched route, plus the timer-driven task that flushes
/// them.
///
/// Created lazily by the dispatcher on the first matching alert and reaped
/// once observed empty during a cleanup sweep.
pub struct AggregationGroup {
    labels: LabelSet,
    fingerprint: Fingerprint,
    opts: RouteOpts,
    route_key: String,
    store: AlertStore,
    timer: Box<dyn FlushTimer>,
    cancel: CancellationToken,
    has_flushed: AtomicBool,
    timeout_fn: TimeoutFn,
    metrics: DispatcherMetrics,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AggregationGroup {
    pub(crate) fn new(
        labels: LabelSet,
        route: &Route,
        timer: Box<dyn FlushTimer>,
        cancel: CancellationToken,
        timeout_fn: TimeoutFn,
        metrics: DispatcherMetrics,
    ) -> Self {
        let fingerprint = labels.fingerprint();
        Self {
            labels,
            fingerprint,
            opts: route.opts().clone(),
            route_key: route.key().to_string(),
            store: AlertStore::new(),
            timer,
            cancel,
            has_flushed: AtomicBool::new(false),
            timeout_fn,
            metrics,
            handle: Mutex::new(None),
        }
    }

    /// The stable key of this group: route key plus group labels.
    pub fn group_key(&self) -> String {
        format!("{}:{}", self.route_key, self.labels)
    }

    /// The group-label values keying this group.
    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// The fingerprint of the group-label values.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// The resolved options of the route that owns this group.
    pub fn opts(&self) -> &RouteOpts {
        &self.opts
    }

    /// Returns true if no alerts are buffered.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// A sorted snapshot of the buffered alerts.
    pub fn alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> =
            self.store.list().into_iter().map(|(alert, _)| alert).collect();
        alerts.sort_by(Self::flush_order);
        alerts
    }

    /// Buffers an alert into the group.
    ///
    /// If the group has never flushed and the alert's intended first
    /// notification time (`starts_at + group_wait`) is already in the
    /// past, the timer is fired immediately so slow-arriving first alerts
    /// do not wait a full group wait again.
    pub(crate) fn insert(&self, alert: Alert) {
        let starts_at = alert.starts_at;
        self.store.set(alert);

        if !self.has_flushed.load(Ordering::SeqCst) {
            let wait = TimeDelta::from_std(self.opts.group_wait).unwrap_or(TimeDelta::MAX);
            let due = starts_at.checked_add_signed(wait).map(|t| t <= Utc::now());
            if due.unwrap_or(false) {
                self.timer.fire_now();
            }
        }
    }

    /// The group's flush loop: waits on the timer, flushes, repeats until
    /// the group context is canceled.
    pub(crate) async fn run(self: Arc<Self>, pipeline: Arc<dyn NotificationPipeline>) {
        tracing::debug!(group = %self.group_key(), "Aggregation group started.");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                now = self.timer.wait() => {
                    // Re-arm and mark the group flushed before flushing so a
                    // concurrent insert during the notify call cannot force
                    // a spurious extra flush.
                    self.timer.reset(now).await;
                    self.has_flushed.store(true, Ordering::SeqCst);
                    self.flush(now, pipeline.as_ref()).await;
                }
            }
        }
        tracing::debug!(group = %self.group_key(), "Aggregation group stopped.");
    }

    async fn flush(&self, now: DateTime<Utc>, pipeline: &dyn NotificationPipeline) {
        if self.store.is_empty() {
            return;
        }

        let mut snapshot = self.store.list();
        snapshot.sort_by(|(a, _), (b, _)| Self::flush_order(a, b));

        let mut resolved = Vec::new();
        let mut batch = Vec::with_capacity(snapshot.len());
        for (alert, seq) in &snapshot {
            if alert.is_resolved_at(now) {
                resolved.push((alert.fingerprint(), *seq));
                batch.push(alert.clone());
            } else {
                // A still-firing alert must not carry a stale resolution
                // time downstream.
                let mut firing = alert.clone();
                firing.ends_at = None;
                batch.push(firing);
            }
        }

        let ctx = FlushContext {
            group_key: self.group_key(),
            group_labels: self.labels.clone(),
            receiver: self.opts.receiver.clone(),
            repeat_interval: self.opts.repeat_interval,
            mute_time_intervals: self.opts.mute_time_intervals.clone(),
            active_time_intervals: self.opts.active_time_intervals.clone(),
            now,
        };

        let deadline = (self.timeout_fn)(self.opts.group_interval);
        tracing::debug!(
            group = %ctx.group_key,
            alerts = batch.len(),
            receiver = %ctx.receiver,
            "Flushing aggregation group."
        );

        let result = tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(NotifyError::Canceled("group context canceled".to_string()))
            }
            outcome = tokio::time::timeout(deadline, pipeline.notify(&ctx, &batch)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(NotifyError::DeliveryFailed(format!(
                        "notify exceeded the flush deadline of {:?}",
                        deadline
                    ))),
                }
            }
        };

        match result {
            Ok(()) => {
                self.metrics.inc_flushed_batches();
                for (fingerprint, seq) in resolved {
                    if !self.store.delete_if_unmodified(fingerprint, seq) {
                        tracing::debug!(
                            group = %ctx.group_key,
                            %fingerprint,
                            "Alert re-fired during flush; keeping it buffered."
                        );
                    }
                }
            }
            Err(e) if e.is_canceled() => {
                tracing::debug!(group = %ctx.group_key, error = %e, "Flush canceled.");
            }
            Err(e) => {
                tracing::error!(
                    group = %ctx.group_key,
                    error = %e,
                    "Failed to notify for aggregation group; alerts stay buffered."
                );
            }
        }
    }

    fn flush_order(a: &Alert, b: &Alert) -> std::cmp::Ordering {
        a.starts_at.cmp(&b.starts_at).then_with(|| a.fingerprint().cmp(&b.fingerprint()))
    }

    pub(crate) fn set_handle(&self, handle: JoinHandle<()>) {
        if let Ok(mut slot) = self.handle.lock() {
            *slot = Some(handle);
        }
    }

    /// Cancels the group, waits for its flush loop to exit, then stops the
    /// timer discarding persisted schedule state.
    pub(crate) async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.timer.stop(true).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::{sync::Notify, time::sleep};

    use super::*;
    use crate::{
        notification::MockNotificationPipeline,
        routing::RouteConfig,
        test_helpers::{AlertBuilder, RecordingPipeline},
        timer::{StandardTimerFactory, TimerFactory},
    };

    fn test_route(group_wait_secs: u64) -> Route {
        let config: RouteConfig = serde_json::from_value(json!({
            "receiver": "default",
            "group_by": ["alertname"],
            "group_wait": group_wait_secs,
            "group_interval": 60
        }))
        .unwrap();
        Route::new(&config).unwrap()
    }

    fn spawn_group(
        route: &Route,
        pipeline: Arc<dyn NotificationPipeline>,
    ) -> Arc<AggregationGroup> {
        let labels: LabelSet =
            [("alertname".to_string(), "foo".to_string())].into_iter().collect();
        let timer = StandardTimerFactory.build(labels.fingerprint(), route.opts());
        let group = Arc::new(AggregationGroup::new(
            labels,
            route,
            timer,
            CancellationToken::new(),
            Arc::new(|interval| interval),
            DispatcherMetrics::new(),
        ));
        let handle = tokio::spawn(Arc::clone(&group).run(pipeline));
        group.set_handle(handle);
        group
    }

    #[tokio::test]
    async fn fresh_group_waits_for_group_wait_before_flushing() {
        let route = test_route(1);
        let pipeline = Arc::new(RecordingPipeline::new());
        let group = spawn_group(&route, Arc::clone(&pipeline) as Arc<dyn NotificationPipeline>);

        group.insert(AlertBuilder::new("foo").build());

        sleep(Duration::from_millis(200)).await;
        assert!(pipeline.batches().is_empty(), "flushed before group wait elapsed");

        sleep(Duration::from_millis(1200)).await;
        let batches = pipeline.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1.len(), 1);

        group.stop().await;
    }

    #[tokio::test]
    async fn elapsed_group_wait_forces_an_immediate_flush() {
        let route = test_route(3600);
        let pipeline = Arc::new(RecordingPipeline::new());
        let group = spawn_group(&route, Arc::clone(&pipeline) as Arc<dyn NotificationPipeline>);

        let stale = AlertBuilder::new("foo")
            .starts_at(Utc::now() - TimeDelta::hours(2))
            .build();
        group.insert(stale);

        sleep(Duration::from_millis(500)).await;
        assert_eq!(pipeline.batches().len(), 1);

        group.stop().await;
    }

    #[tokio::test]
    async fn resolved_alerts_are_removed_after_a_successful_flush() {
        let route = test_route(0);
        let pipeline = Arc::new(RecordingPipeline::new());
        let group = spawn_group(&route, Arc::clone(&pipeline) as Arc<dyn NotificationPipeline>);

        group.insert(AlertBuilder::new("foo").resolved().build());

        sleep(Duration::from_millis(500)).await;
        assert_eq!(pipeline.batches().len(), 1);
        assert!(group.is_empty());

        group.stop().await;
    }

    #[tokio::test]
    async fn failed_notify_keeps_resolved_alerts_buffered() {
        let route = test_route(0);
        let mut pipeline = MockNotificationPipeline::new();
        pipeline
            .expect_notify()
            .times(1..)
            .returning(|_, _| Err(NotifyError::DeliveryFailed("downstream unavailable".into())));
        let group = spawn_group(&route, Arc::new(pipeline));

        group.insert(AlertBuilder::new("foo").resolved().build());

        sleep(Duration::from_millis(500)).await;
        assert!(!group.is_empty(), "failed delivery must keep the buffer for redelivery");

        group.stop().await;
    }

    /// A pipeline that parks inside notify until released, so a test can
    /// interleave inserts with an in-flight flush.
    struct GatedPipeline {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl NotificationPipeline for GatedPipeline {
        async fn notify(&self, _ctx: &FlushContext, _alerts: &[Alert]) -> Result<(), NotifyError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn alert_refired_during_flush_survives_the_cleanup() {
        let route = test_route(0);
        let pipeline = Arc::new(GatedPipeline { entered: Notify::new(), release: Notify::new() });
        let group = spawn_group(&route, Arc::clone(&pipeline) as Arc<dyn NotificationPipeline>);

        group.insert(AlertBuilder::new("foo").resolved().build());

        // Wait for the flush to reach the pipeline, then re-fire the alert
        // while the notify call is still in flight.
        tokio::time::timeout(Duration::from_secs(5), pipeline.entered.notified())
            .await
            .expect("flush should reach the pipeline");
        group.insert(AlertBuilder::new("foo").build());
        pipeline.release.notify_one();

        sleep(Duration::from_millis(300)).await;
        assert!(!group.is_empty(), "re-fired alert must survive the post-flush cleanup");

        group.stop().await;
    }

    #[tokio::test]
    async fn firing_alerts_are_sent_without_an_end_time() {
        let route = test_route(0);
        let pipeline = Arc::new(RecordingPipeline::new());
        let group = spawn_group(&route, Arc::clone(&pipeline) as Arc<dyn NotificationPipeline>);

        // A firing alert that still carries a stale resolution time in the
        // future.
        let alert = AlertBuilder::new("foo")
            .ends_at(Utc::now() + TimeDelta::hours(1))
            .build();
        group.insert(alert);

        sleep(Duration::from_millis(500)).await;
        let batches = pipeline.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1[0].ends_at, None);

        group.stop().await;
    }

    #[tokio::test]
    async fn flush_context_carries_route_metadata() {
        let config: RouteConfig = serde_json::from_value(json!({
            "receiver": "db-pager",
            "group_by": ["alertname"],
            "group_wait": 0,
            "repeat_interval": 7200,
            "mute_time_intervals": ["weekends"]
        }))
        .unwrap();
        let route = Route::new(&config).unwrap();
        let pipeline = Arc::new(RecordingPipeline::new());
        let group = spawn_group(&route, Arc::clone(&pipeline) as Arc<dyn NotificationPipeline>);

        group.insert(AlertBuilder::new("foo").build());

        sleep(Duration::from_millis(500)).await;
        let batches = pipeline.batches();
        let ctx = &batches[0].0;
        assert_eq!(ctx.receiver, "db-pager");
        assert_eq!(ctx.repeat_interval, Duration::from_secs(7200));
        assert_eq!(ctx.mute_time_intervals, vec!["weekends".to_string()]);
        assert!(ctx.group_key.contains("alertname=\"foo\""));

        group.stop().await;
    }
}
