//! Telemetry process lifecycle: export order, credentials, bounded shutdown
//! and span release.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
use opentelemetry_sdk::trace::TracerProvider;
use proptest::prelude::*;
use serde_json::json;
use std::time::{Duration, Instant};

mod common;

use common::MockCollector;
use observe_relay::observability::{ProcessState, SpanTracker, TelemetryError};
use observe_relay::pipeline::settle;

#[tokio::test]
async fn test_shutdown_exports_traces_then_metrics_then_logs() {
    let collector = MockCollector::start_with(Some(Duration::from_millis(300))).await;
    let mut settings = common::settings("observe-relay", &collector.endpoint());
    settings.trace_flush_interval = Duration::from_secs(60);
    let telemetry = common::telemetry(settings);

    let tracker = telemetry.tracker().unwrap();
    let counter = telemetry.meter("observe-relay").unwrap().counter("jobs_total", "Jobs");
    let logger = telemetry.logger("observe-relay").unwrap();

    tracker.start_span("job", None).end();
    counter.add(1.0, &[]).unwrap();
    assert!(logger.info("first"));
    assert!(logger.info("second"));

    // The first record is in flight and held by the collector; the second
    // is still queued when shutdown begins.
    assert!(collector.wait_until(Duration::from_secs(2), |c| c.count("/v1/logs") == 1).await);
    let before = collector.exports().len();

    telemetry.shutdown().await;

    let during: Vec<String> = collector.paths().split_off(before);
    assert_eq!(during, vec!["/v1/traces", "/v1/metrics", "/v1/logs"]);
    assert_eq!(collector.log_bodies(), vec!["first", "second"]);
    assert_eq!(telemetry.state(), ProcessState::ShutDown);
}

#[tokio::test]
async fn test_bearer_header_only_with_token() {
    let collector = MockCollector::start().await;

    let mut with_token = common::settings("with-token", &collector.endpoint());
    with_token.token = Some("secret".into());
    let a = common::telemetry(with_token);
    a.tracker().unwrap().start_span("a", None).end();
    a.shutdown().await;

    let b = common::telemetry(common::settings("without-token", &collector.endpoint()));
    b.tracker().unwrap().start_span("b", None).end();
    b.shutdown().await;

    let exports = collector.exports();
    let auth_for = |service: &str| {
        exports
            .iter()
            .find(|e| e.path == "/v1/traces" && e.body.to_string().contains(service))
            .map(|e| e.authorization.clone())
            .unwrap()
    };
    assert_eq!(auth_for("with-token").as_deref(), Some("Bearer secret"));
    assert_eq!(auth_for("without-token"), None);
}

#[tokio::test]
async fn test_shutdown_bounded_when_collector_hangs() {
    let (addr, _listener) = common::start_black_hole().await;
    let mut settings = common::settings("observe-relay", &format!("http://{addr}"));
    settings.trace_flush_interval = Duration::from_secs(60);
    settings.export_timeout = Duration::from_millis(200);
    let telemetry = common::telemetry(settings);

    telemetry.tracker().unwrap().start_span("stuck", None).end();
    telemetry
        .meter("observe-relay")
        .unwrap()
        .counter("stuck_total", "Stuck")
        .add(1.0, &[])
        .unwrap();
    telemetry.logger("observe-relay").unwrap().info("stuck");

    let started = Instant::now();
    telemetry.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(telemetry.state(), ProcessState::ShutDown);
}

#[tokio::test]
async fn test_log_queue_bounded_when_collector_hangs() {
    let (addr, _listener) = common::start_black_hole().await;
    let mut settings = common::settings("observe-relay", &format!("http://{addr}"));
    settings.export_timeout = Duration::from_millis(200);
    settings.log_queue_capacity = 4;
    let telemetry = common::telemetry(settings);
    let logger = telemetry.logger("observe-relay").unwrap();
    let sink = telemetry.log_sink();

    // The exporter holds at most one record in flight; the rest must fit
    // in the queue or be dropped without blocking the caller.
    let started = Instant::now();
    let accepted = (0..50).filter(|i| logger.info(format!("record {i}"))).count();
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(accepted <= 5, "accepted {accepted}");
    assert_eq!(sink.dropped(), (50 - accepted) as u64);

    let started = Instant::now();
    telemetry.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(telemetry.state(), ProcessState::ShutDown);
    assert!(!logger.info("after shutdown"));
    assert!(sink.dropped() >= (50 - accepted) as u64);
}

#[tokio::test]
async fn test_handles_rejected_after_shutdown() {
    let collector = MockCollector::start().await;
    let telemetry = common::telemetry(common::settings("observe-relay", &collector.endpoint()));
    telemetry.shutdown().await;
    telemetry.shutdown().await;

    assert!(matches!(telemetry.initialize(), Err(TelemetryError::ShutDown)));
    assert_eq!(telemetry.exporter_sets_built(), 1);
}

#[tokio::test]
async fn test_front_service_releases_every_span() {
    let collector = MockCollector::start().await;
    let users = common::start_programmable_backend(|_| async { (500, json!({})) }).await;
    let telemetry = common::telemetry(common::settings("observe-relay", &collector.endpoint()));
    let config = common::front_config(&collector, &format!("http://{users}/users"), "http://127.0.0.1:9");
    let (base, _shutdown) = common::spawn_front(config, &telemetry).await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        let _ = client.get(format!("{base}/api/users")).send().await.unwrap();
        let _ = client.get(format!("{base}/api/metrics-demo")).send().await.unwrap();
        let _ = client
            .post(format!("{base}/api/process"))
            .body("[")
            .send()
            .await
            .unwrap();
        let _ = client
            .post(format!("{base}/api/logs-to-lambda"))
            .json(&json!({ "message": "m" }))
            .send()
            .await
            .unwrap();
    }

    let stats = telemetry.tracker().unwrap().stats();
    assert!(stats.started > 0);
    assert_eq!(stats.started, stats.ended);

    telemetry.shutdown().await;
}

#[derive(Debug, thiserror::Error)]
#[error("injected failure")]
struct Injected;

proptest! {
    #[test]
    fn prop_every_span_released(plan in prop::collection::vec((any::<bool>(), any::<bool>(), any::<bool>()), 0..40)) {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let tracker = SpanTracker::new(provider.tracer("prop"));

        for (child_fails, root_fails, drop_child) in &plan {
            let root = tracker.start_span("root", None);
            let ctx = root.context();
            let child = tracker.start_span("child", Some(&ctx));

            let child_result = if *drop_child {
                drop(child);
                Ok(())
            } else if *child_fails {
                settle(child, Err(Injected))
            } else {
                settle(child, Ok(()))
            };

            let root_result = child_result.and(if *root_fails { Err(Injected) } else { Ok(()) });
            let _ = settle(root, root_result);
        }

        let stats = tracker.stats();
        prop_assert_eq!(stats.started, stats.ended);
        prop_assert_eq!(stats.started, 2 * plan.len() as u64);
        prop_assert_eq!(exporter.get_finished_spans().unwrap().len(), 2 * plan.len());
    }
}
