#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! Loop control: ticking, shutdown and panic isolation

mod common;

use certpulse::{
    checker::ticker::{IntervalTicker, Ticker},
    cluster::ResourceKind,
};
use common::{
    Event, FakeCluster, RecordingExporter, Resource, StopAfter, config, metrics, recording_checker,
};
use std::time::Duration;
use tokio::{sync::watch, time::timeout};

#[tokio::test]
async fn test_run_ticks_until_stopped() {
    let cluster = FakeCluster::new(vec![
        Resource::secret("default", "s").entry("tls.crt", "x").build(),
    ]);
    let exporter = RecordingExporter::new();
    let metrics = metrics();
    let checker = recording_checker(
        ResourceKind::Secret,
        config(&["*.crt"]),
        &cluster,
        &exporter,
        &metrics,
    );

    let (mut ticker, shutdown) = StopAfter::new(3);
    timeout(Duration::from_secs(5), checker.run(&mut ticker, shutdown))
        .await
        .expect("checker did not stop");

    let resets = exporter
        .events()
        .iter()
        .filter(|e| **e == Event::Reset)
        .count();
    assert_eq!(resets, 3);
    assert_eq!(exporter.exports().len(), 3);
    assert_eq!(metrics.ticks.with_label_values(&["secret"]).get(), 3);
}

#[tokio::test]
async fn test_run_recovers_from_panicking_tick() {
    let cluster = FakeCluster::new(vec![
        Resource::config_map("default", "c").entry("ca.crt", "x").build(),
    ]);
    let exporter = RecordingExporter::new();
    exporter.panic_on_reset(1);
    let metrics = metrics();
    let checker = recording_checker(
        ResourceKind::ConfigMap,
        config(&["*.crt"]),
        &cluster,
        &exporter,
        &metrics,
    );

    let (mut ticker, shutdown) = StopAfter::new(2);
    timeout(Duration::from_secs(5), checker.run(&mut ticker, shutdown))
        .await
        .expect("checker did not stop");

    assert_eq!(metrics.panics_recovered.get(), 1);
    // only the second tick got through
    assert_eq!(exporter.events().len(), 2);
    assert_eq!(metrics.ticks.with_label_values(&["configmap"]).get(), 1);
}

#[tokio::test]
async fn test_run_stops_when_sender_dropped() {
    let cluster = FakeCluster::new(Vec::new());
    let exporter = RecordingExporter::new();
    let metrics = metrics();
    let checker = recording_checker(
        ResourceKind::Secret,
        config(&["*"]),
        &cluster,
        &exporter,
        &metrics,
    );

    let (tx, rx) = watch::channel(false);
    drop(tx);

    // long period: the loop must not wait for a second tick
    let mut ticker = IntervalTicker::new(Duration::from_secs(3600));
    timeout(Duration::from_secs(5), checker.run(&mut ticker, rx))
        .await
        .expect("checker did not stop");

    assert!(exporter.events().len() <= 1);
}

#[tokio::test]
async fn test_run_with_interval_ticker_and_shutdown() {
    let cluster = FakeCluster::new(Vec::new());
    let exporter = RecordingExporter::new();
    let metrics = metrics();
    let checker = recording_checker(
        ResourceKind::Secret,
        config(&["*"]),
        &cluster,
        &exporter,
        &metrics,
    );

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let mut ticker = IntervalTicker::new(Duration::from_millis(10));
        checker.run(&mut ticker, rx).await;
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    tx.send(true).unwrap();

    timeout(Duration::from_secs(5), handle)
        .await
        .expect("checker did not stop")
        .unwrap();

    let ticks = metrics.ticks.with_label_values(&["secret"]).get();
    assert!(ticks >= 2, "expected several ticks, got {ticks}");
}

#[tokio::test]
async fn test_stop_after_ticker_is_pending_once_exhausted() {
    let (mut ticker, mut shutdown) = StopAfter::new(1);
    ticker.tick().await;

    let exhausted = timeout(Duration::from_millis(50), ticker.tick()).await;
    assert!(exhausted.is_err());
    assert!(*shutdown.borrow_and_update());
}
