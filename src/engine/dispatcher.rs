//! The top-level coordinator consuming the alert stream.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use tokio::{
    sync::RwLock,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::group::{AggregationGroup, TimeoutFn};
use crate::{
    config::DispatcherConfig,
    metrics::DispatcherMetrics,
    models::{Alert, AlertGroup, Fingerprint},
    notification::NotificationPipeline,
    providers::{AlertSource, AlertStream},
    routing::Route,
    timer::TimerFactory,
};

/// Caps the number of live aggregation groups across all routes.
#[cfg_attr(test, automock)]
pub trait Limits: Send + Sync {
    /// The maximum number of aggregation groups; zero means unlimited.
    fn max_aggregation_groups(&self) -> usize;
}

/// A fixed aggregation-group limit.
#[derive(Debug, Clone, Copy)]
pub struct StaticLimits(pub usize);

impl Limits for StaticLimits {
    fn max_aggregation_groups(&self) -> usize {
        self.0
    }
}

#[derive(Default)]
struct GroupRegistry {
    /// Live groups per route id, keyed by their group-label fingerprint.
    by_route: HashMap<String, HashMap<Fingerprint, Arc<AggregationGroup>>>,
    /// Running count across all routes, kept alongside the maps so the
    /// limit check never has to walk them.
    count: usize,
}

/// Routes incoming alerts into aggregation groups and supervises their
/// flush tasks.
///
/// One task drives the consuming loop; every group runs its own. All
/// registry mutations happen under one write lock, while the per-group hot
/// path (insert, flush) only touches the group's internally synchronized
/// buffer.
pub struct Dispatcher {
    route: Arc<Route>,
    pipeline: Arc<dyn NotificationPipeline>,
    timer_factory: Arc<dyn TimerFactory>,
    limits: Arc<dyn Limits>,
    metrics: DispatcherMetrics,
    cleanup_interval: Duration,
    timeout_fn: TimeoutFn,
    groups: RwLock<GroupRegistry>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Creates a dispatcher over the given routing tree and collaborators.
    pub fn new(
        route: Arc<Route>,
        pipeline: Arc<dyn NotificationPipeline>,
        timer_factory: Arc<dyn TimerFactory>,
        limits: Arc<dyn Limits>,
        metrics: DispatcherMetrics,
        config: &DispatcherConfig,
    ) -> Self {
        Self {
            route,
            pipeline,
            timer_factory,
            limits,
            metrics,
            cleanup_interval: config.cleanup_interval_secs,
            timeout_fn: Arc::new(|interval| interval),
            groups: RwLock::new(GroupRegistry::default()),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Overrides how the group interval is turned into a per-flush
    /// deadline.
    pub fn with_timeout_fn(mut self, timeout_fn: TimeoutFn) -> Self {
        self.timeout_fn = timeout_fn;
        self
    }

    /// Subscribes to the alert source and spawns the consuming loop.
    pub async fn start(self: Arc<Self>, source: Arc<dyn AlertSource>) {
        let stream = source.subscribe().await;
        let dispatcher = Arc::clone(&self);
        let handle = tokio::spawn(async move { dispatcher.run(stream).await });
        if let Ok(mut slot) = self.handle.lock() {
            *slot = Some(handle);
        }
    }

    /// The single consuming loop: next alert, periodic cleanup, or
    /// shutdown.
    async fn run(self: Arc<Self>, mut stream: AlertStream) {
        let mut cleanup =
            interval_at(Instant::now() + self.cleanup_interval, self.cleanup_interval);
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("Dispatcher started.");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Dispatcher received shutdown signal.");
                    break;
                }
                _ = cleanup.tick() => {
                    self.remove_empty_groups().await;
                }
                maybe_alert = stream.next() => {
                    match maybe_alert {
                        Some(alert) => {
                            let started = Instant::now();
                            let matched = self.route.match_labels(&alert.labels);
                            for route in matched {
                                self.process_alert(&alert, route).await;
                            }
                            self.metrics.observe_processing(started.elapsed());
                        }
                        None => {
                            // The stream ending is terminal for this
                            // dispatcher instance; restarting is the
                            // embedding application's concern.
                            match stream.err() {
                                Some(e) => tracing::error!(error = %e, "Alert stream failed."),
                                None => tracing::info!("Alert stream ended."),
                            }
                            break;
                        }
                    }
                }
            }
        }
        tracing::info!("Dispatcher stopped.");
    }

    /// Buffers the alert into the group it belongs to under the given
    /// route, creating the group unless the global limit is reached.
    async fn process_alert(&self, alert: &Alert, route: &Route) {
        let group_labels = route.group_labels(&alert.labels);
        let fingerprint = group_labels.fingerprint();

        let mut registry = self.groups.write().await;

        if let Some(group) =
            registry.by_route.get(route.id()).and_then(|groups| groups.get(&fingerprint))
        {
            let group = Arc::clone(group);
            drop(registry);
            group.insert(alert.clone());
            return;
        }

        let limit = self.limits.max_aggregation_groups();
        if limit > 0 && registry.count >= limit {
            self.metrics.inc_limit_rejections();
            tracing::error!(
                alert = %alert.labels,
                route = route.id(),
                limit,
                "Too many aggregation groups; dropping alert for this route."
            );
            return;
        }

        let timer = self.timer_factory.build(fingerprint, route.opts());
        let group = Arc::new(AggregationGroup::new(
            group_labels,
            route,
            timer,
            self.cancel.child_token(),
            Arc::clone(&self.timeout_fn),
            self.metrics.clone(),
        ));

        registry
            .by_route
            .entry(route.id().to_string())
            .or_default()
            .insert(fingerprint, Arc::clone(&group));
        registry.count += 1;
        self.metrics.set_aggregation_groups(registry.count);
        tracing::debug!(group = %group.group_key(), total = registry.count, "Aggregation group created.");

        // Seed the triggering alert before the flush task starts, so the
        // first tick is guaranteed to see it.
        group.insert(alert.clone());
        let handle = tokio::spawn(Arc::clone(&group).run(Arc::clone(&self.pipeline)));
        group.set_handle(handle);
    }

    /// Stops and unregisters every group whose buffer is empty.
    async fn remove_empty_groups(&self) {
        let mut registry = self.groups.write().await;

        let mut stopped = Vec::new();
        for groups in registry.by_route.values_mut() {
            groups.retain(|_, group| {
                if group.is_empty() {
                    stopped.push(Arc::clone(group));
                    false
                } else {
                    true
                }
            });
        }
        if stopped.is_empty() {
            return;
        }

        registry.by_route.retain(|_, groups| !groups.is_empty());
        registry.count -= stopped.len();
        self.metrics.set_aggregation_groups(registry.count);

        // Termination happens while the registry lock is still held, so no
        // group is ever observable in the map without a live task.
        for group in &stopped {
            group.stop().await;
        }
        tracing::debug!(
            reaped = stopped.len(),
            remaining = registry.count,
            "Reaped empty aggregation groups."
        );
    }

    /// A point-in-time snapshot of all groups plus, per alert fingerprint,
    /// the receivers it is routed to. A read path for introspection, not
    /// part of the hot path.
    pub async fn groups(
        &self,
        route_filter: &dyn Fn(&str) -> bool,
        alert_filter: &dyn Fn(&Alert, DateTime<Utc>) -> bool,
    ) -> (Vec<AlertGroup>, HashMap<Fingerprint, Vec<String>>) {
        let now = Utc::now();
        let registry = self.groups.read().await;

        let mut snapshot = Vec::new();
        let mut receivers: HashMap<Fingerprint, Vec<String>> = HashMap::new();

        for (route_id, groups) in registry.by_route.iter() {
            if !route_filter(route_id) {
                continue;
            }
            for group in groups.values() {
                let alerts: Vec<Alert> = group
                    .alerts()
                    .into_iter()
                    .filter(|alert| alert_filter(alert, now))
                    .collect();
                for alert in &alerts {
                    receivers
                        .entry(alert.fingerprint())
                        .or_default()
                        .push(group.opts().receiver.clone());
                }
                snapshot.push(AlertGroup {
                    labels: group.labels().clone(),
                    receiver: group.opts().receiver.clone(),
                    route_id: route_id.clone(),
                    alerts,
                });
            }
        }

        snapshot.sort_by(|a, b| {
            a.labels.cmp(&b.labels).then_with(|| a.route_id.cmp(&b.route_id))
        });
        (snapshot, receivers)
    }

    /// Cancels the consuming loop and waits for it to exit. Idempotent.
    ///
    /// Group flush tasks are not awaited here: they observe the canceled
    /// child tokens and exit on their own, bounded by their per-flush
    /// deadline, and their persisted schedule state survives the restart.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
