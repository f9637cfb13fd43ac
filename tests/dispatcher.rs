//! Integration tests for the dispatcher service

use std::{sync::Arc, time::Duration};

use herald::{
    config::DispatcherConfig,
    engine::{Dispatcher, StaticLimits},
    metrics::DispatcherMetrics,
    providers::{AlertSender, AlertStream, SourceError},
    routing::{Route, RouteConfig},
    test_helpers::{AlertBuilder, RecordingPipeline, StreamAlertSource},
    timer::{StandardTimerFactory, TimerFactory},
};
use serde_json::json;
use tokio::time::sleep;

fn test_route(value: serde_json::Value) -> Arc<Route> {
    let config: RouteConfig = serde_json::from_value(value).unwrap();
    Arc::new(Route::new(&config).unwrap())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn start_dispatcher(
    route: Arc<Route>,
    timer_factory: Arc<dyn TimerFactory>,
    pipeline: Arc<RecordingPipeline>,
    max_groups: usize,
    cleanup_interval: Duration,
) -> (Arc<Dispatcher>, AlertSender, DispatcherMetrics) {
    init_tracing();
    let metrics = DispatcherMetrics::new();
    let config = DispatcherConfig {
        cleanup_interval_secs: cleanup_interval,
        max_aggregation_groups: max_groups,
        replica_position: 0,
        route: RouteConfig::default(),
    };

    let dispatcher = Arc::new(Dispatcher::new(
        route,
        pipeline,
        timer_factory,
        Arc::new(StaticLimits(max_groups)),
        metrics.clone(),
        &config,
    ));

    let (sender, stream) = AlertStream::channel(64);
    Arc::clone(&dispatcher).start(Arc::new(StreamAlertSource::new(stream))).await;
    (dispatcher, sender, metrics)
}

#[tokio::test]
async fn alerts_with_shared_group_labels_flush_in_one_batch() {
    let route = test_route(json!({
        "receiver": "default",
        "group_by": ["alertname"],
        "group_wait": 1,
        "group_interval": 60
    }));
    let pipeline = Arc::new(RecordingPipeline::new());
    let (dispatcher, sender, _metrics) = start_dispatcher(
        Arc::clone(&route),
        Arc::new(StandardTimerFactory),
        Arc::clone(&pipeline),
        0,
        Duration::from_secs(30),
    )
    .await;

    sender.send(AlertBuilder::new("foo").label("instance", "1").build()).await.unwrap();
    sender.send(AlertBuilder::new("foo").label("instance", "2").build()).await.unwrap();

    sleep(Duration::from_millis(2500)).await;

    let batches = pipeline.batches();
    assert_eq!(batches.len(), 1, "both alerts must land in one group and one flush");
    assert_eq!(batches[0].1.len(), 2);
    assert_eq!(batches[0].0.receiver, "default");

    // A different alertname opens a second, independent group.
    sender.send(AlertBuilder::new("bar").build()).await.unwrap();
    sleep(Duration::from_millis(2000)).await;

    let batches = pipeline.batches();
    assert!(batches.iter().any(|(_, alerts)| alerts.len() == 1), "bar must flush on its own");

    let (groups, receivers) = dispatcher.groups(&|_| true, &|_, _| true).await;
    assert_eq!(groups.len(), 2);
    assert!(receivers.values().all(|r| r == &vec!["default".to_string()]));

    dispatcher.stop().await;
}

#[tokio::test]
async fn group_limit_drops_alerts_for_new_groups() {
    let route = test_route(json!({
        "receiver": "default",
        "group_by": ["alertname"],
        "group_wait": 1,
        "group_interval": 60
    }));
    let pipeline = Arc::new(RecordingPipeline::new());
    let (dispatcher, sender, metrics) = start_dispatcher(
        route,
        Arc::new(StandardTimerFactory),
        Arc::clone(&pipeline),
        1,
        Duration::from_secs(30),
    )
    .await;

    sender.send(AlertBuilder::new("foo").build()).await.unwrap();
    sender.send(AlertBuilder::new("bar").build()).await.unwrap();
    // An alert for the existing group is still accepted at the limit.
    sender.send(AlertBuilder::new("foo").label("instance", "2").build()).await.unwrap();

    sleep(Duration::from_millis(2000)).await;

    let (groups, _) = dispatcher.groups(&|_| true, &|_, _| true).await;
    assert_eq!(groups.len(), 1, "the limit must prevent a second group");
    assert_eq!(groups[0].alerts.len(), 2);
    assert_eq!(metrics.limit_rejections(), 1);
    assert_eq!(metrics.aggregation_groups(), 1);

    let batches = pipeline.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].1.len(), 2);

    dispatcher.stop().await;
}

#[tokio::test]
async fn empty_groups_are_reaped_within_a_cleanup_cycle() {
    let route = test_route(json!({
        "receiver": "default",
        "group_by": ["alertname"],
        "group_wait": 1,
        "group_interval": 60
    }));
    let pipeline = Arc::new(RecordingPipeline::new());
    let (dispatcher, sender, metrics) = start_dispatcher(
        route,
        Arc::new(StandardTimerFactory),
        Arc::clone(&pipeline),
        0,
        Duration::from_secs(1),
    )
    .await;

    // A resolved alert is delivered once and then dropped from the buffer,
    // leaving the group empty.
    sender.send(AlertBuilder::new("foo").resolved().build()).await.unwrap();

    sleep(Duration::from_millis(3500)).await;

    assert_eq!(pipeline.batches().len(), 1);
    let (groups, _) = dispatcher.groups(&|_| true, &|_, _| true).await;
    assert!(groups.is_empty(), "the emptied group must be reaped");
    assert_eq!(metrics.aggregation_groups(), 0);

    dispatcher.stop().await;
}

#[tokio::test]
async fn groups_snapshot_honors_filters() {
    let route = test_route(json!({
        "receiver": "default",
        "group_by": ["alertname"],
        "group_wait": 60,
        "group_interval": 60
    }));
    let pipeline = Arc::new(RecordingPipeline::new());
    let (dispatcher, sender, _metrics) = start_dispatcher(
        route,
        Arc::new(StandardTimerFactory),
        pipeline,
        0,
        Duration::from_secs(30),
    )
    .await;

    sender.send(AlertBuilder::new("foo").build()).await.unwrap();
    sender.send(AlertBuilder::new("bar").build()).await.unwrap();
    sleep(Duration::from_millis(500)).await;

    let (all, _) = dispatcher.groups(&|_| true, &|_, _| true).await;
    assert_eq!(all.len(), 2);

    let (none, receivers) = dispatcher.groups(&|_| false, &|_, _| true).await;
    assert!(none.is_empty());
    assert!(receivers.is_empty());

    let (foo_only, _) = dispatcher
        .groups(&|_| true, &|alert, _| alert.labels.get("alertname") == Some("foo"))
        .await;
    let non_empty: Vec<_> = foo_only.iter().filter(|g| !g.alerts.is_empty()).collect();
    assert_eq!(non_empty.len(), 1);

    dispatcher.stop().await;
}

#[tokio::test]
async fn source_failure_terminates_the_consuming_loop() {
    let route = test_route(json!({
        "receiver": "default",
        "group_by": ["alertname"]
    }));
    let pipeline = Arc::new(RecordingPipeline::new());
    let (dispatcher, sender, _metrics) = start_dispatcher(
        route,
        Arc::new(StandardTimerFactory),
        pipeline,
        0,
        Duration::from_secs(30),
    )
    .await;

    sender.fail(SourceError::Source("store connection lost".to_string()));

    // The loop observes the terminated stream and exits; stop() only has
    // to join an already-finished task.
    tokio::time::timeout(Duration::from_secs(5), dispatcher.stop())
        .await
        .expect("dispatcher must shut down after a source failure");
}

#[tokio::test]
async fn stop_is_idempotent() {
    let route = test_route(json!({
        "receiver": "default",
        "group_by": ["alertname"]
    }));
    let pipeline = Arc::new(RecordingPipeline::new());
    let (dispatcher, _sender, _metrics) = start_dispatcher(
        route,
        Arc::new(StandardTimerFactory),
        pipeline,
        0,
        Duration::from_secs(30),
    )
    .await;

    dispatcher.stop().await;
    dispatcher.stop().await;
}
