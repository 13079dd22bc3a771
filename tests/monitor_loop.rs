//! Integration tests for the monitor loop and the background worker.

use futures::StreamExt;
use scpi_verify::command_set::{catalog, ChannelConfig};
use scpi_verify::engine::ConfigureOptions;
use scpi_verify::monitor::{monitor, CancelSignal, Monitor, MonitorOptions, MonitorWorker, WorkerEvent};
use scpi_verify::session::Session;
use scpi_verify::transport::SimulatedInstrument;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn psu_config() -> ChannelConfig {
    ChannelConfig::new()
        .with("voltage_v", 3.3)
        .with("current_a", 0.5)
}

/// A configured E3631A session on a simulated device.
async fn configured_psu(device: &SimulatedInstrument) -> Session<SimulatedInstrument> {
    let mut session = Session::open(device.clone(), Arc::new(catalog::e3631a()));
    session
        .configure(
            &psu_config(),
            &ConfigureOptions::default().with_settle(Duration::ZERO),
        )
        .await
        .expect("configure");
    device.clear_commands();
    session
}

#[tokio::test]
async fn test_n_ticks_have_increasing_timestamps() {
    let device = SimulatedInstrument::new();
    let mut session = configured_psu(&device).await;
    let config = psu_config();

    let reports: Vec<_> = monitor(
        &mut session,
        &config,
        MonitorOptions::every(Duration::from_millis(5)),
        CancelSignal::new(),
    )
    .take(5)
    .collect()
    .await;

    assert_eq!(reports.len(), 5);
    let reports: Vec<_> = reports.into_iter().map(|r| r.expect("tick")).collect();
    for (i, tick) in reports.iter().enumerate() {
        assert_eq!(tick.tick, i as u64 + 1);
        assert!(tick.report.overall_passed());
    }
    for pair in reports.windows(2) {
        assert!(pair[0].timestamp < pair[1].timestamp);
    }
    session.close().await;
}

#[tokio::test]
async fn test_cancel_during_sleep_yields_no_report() {
    let device = SimulatedInstrument::new();
    let mut session = configured_psu(&device).await;
    let config = psu_config();
    let cancel = CancelSignal::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };

    let started = Instant::now();
    let mut ticker = Monitor::new(
        &mut session,
        &config,
        MonitorOptions::every(Duration::from_secs(30)),
        cancel,
    );
    let next = tokio::time::timeout(Duration::from_secs(5), ticker.next_report())
        .await
        .expect("cancellation should wake the monitor");
    assert!(next.is_none());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(ticker.next_report().await.is_none());
    assert_eq!(ticker.ticks(), 0);
    drop(ticker);

    canceller.await.unwrap();
    assert!(device.commands().is_empty(), "no verification after cancel");
    session.close().await;
}

#[tokio::test]
async fn test_pre_cancelled_monitor_is_empty() {
    let device = SimulatedInstrument::new();
    let mut session = configured_psu(&device).await;
    let config = psu_config();
    let cancel = CancelSignal::new();
    cancel.cancel();

    let reports: Vec<_> = monitor(
        &mut session,
        &config,
        MonitorOptions::every(Duration::from_millis(1)),
        cancel,
    )
    .collect()
    .await;
    assert!(reports.is_empty());
    session.close().await;
}

#[tokio::test]
async fn test_monitor_restarts_on_same_session() {
    let device = SimulatedInstrument::new();
    let mut session = configured_psu(&device).await;
    let config = psu_config();

    for _ in 0..2 {
        let mut ticker = Monitor::new(
            &mut session,
            &config,
            MonitorOptions::every(Duration::from_millis(1)),
            CancelSignal::new(),
        );
        let tick = ticker.next_report().await.expect("report").expect("verify");
        assert_eq!(tick.tick, 1);
        assert!(tick.report.overall_passed());
    }
    assert!(session.is_open());
    session.close().await;
}

#[tokio::test]
async fn test_monitor_surfaces_drift() {
    let device = SimulatedInstrument::new();
    let mut session = configured_psu(&device).await;
    let config = psu_config();
    let mut ticker = Monitor::new(
        &mut session,
        &config,
        MonitorOptions::every(Duration::from_millis(1)),
        CancelSignal::new(),
    );

    let first = ticker.next_report().await.unwrap().unwrap();
    assert!(first.report.overall_passed());

    device.set_register("VOLT", "3.0");
    let second = ticker.next_report().await.unwrap().unwrap();
    assert!(!second.report.overall_passed());
    assert!(!second.report.line("voltage_v").unwrap().passed);
    drop(ticker);
    session.close().await;
}

#[tokio::test]
async fn test_worker_delivers_reports_and_returns_session() {
    let device = SimulatedInstrument::new();
    let session = configured_psu(&device).await;
    let mut worker = MonitorWorker::spawn(
        session,
        psu_config(),
        MonitorOptions::every(Duration::from_millis(10)),
        4,
    );

    let mut reports = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while reports.len() < 2 && Instant::now() < deadline {
        match worker.try_next() {
            Some(WorkerEvent::Report(tick)) => reports.push(tick),
            Some(WorkerEvent::Failed(reason)) => panic!("worker failed: {reason}"),
            None => tokio::time::sleep(Duration::from_millis(5)).await,
        }
    }
    assert_eq!(reports.len(), 2);
    assert!(reports[0].timestamp < reports[1].timestamp);

    let mut session = worker.stop().await.expect("session back");
    assert!(session.is_open());
    session.close().await;
    assert_eq!(device.close_count(), 1);
}

#[tokio::test]
async fn test_worker_stops_when_consumer_is_idle() {
    let device = SimulatedInstrument::new();
    let session = configured_psu(&device).await;
    let worker = MonitorWorker::spawn(
        session,
        psu_config(),
        MonitorOptions::every(Duration::from_millis(1)),
        1,
    );

    // Queue fills up; the worker must still notice cancellation.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut session = tokio::time::timeout(Duration::from_secs(2), worker.stop())
        .await
        .expect("stop should not hang")
        .expect("session back");
    session.close().await;
}

#[tokio::test]
async fn test_worker_finishes_in_flight_verify_before_stopping() {
    let device = SimulatedInstrument::new();
    let session = configured_psu(&device).await;
    let device = device.with_latency(Duration::from_millis(40));
    let worker = MonitorWorker::spawn(
        session,
        psu_config(),
        MonitorOptions::every(Duration::from_millis(1)),
        4,
    );

    // Let the first verify pass start, then stop mid-pass.
    tokio::time::sleep(Duration::from_millis(60)).await;
    let mut session = worker.stop().await.expect("session back");

    let commands = device.commands();
    assert_eq!(commands.last().map(String::as_str), Some("SYST:ERR?"));
    session.close().await;
}

#[tokio::test]
async fn test_worker_reports_closed_session() {
    let device = SimulatedInstrument::new();
    let mut session = configured_psu(&device).await;
    session.close().await;

    let mut worker = MonitorWorker::spawn(
        session,
        psu_config(),
        MonitorOptions::every(Duration::from_millis(1)),
        4,
    );
    let event = tokio::time::timeout(Duration::from_secs(2), worker.recv())
        .await
        .expect("event");
    assert!(matches!(event, Some(WorkerEvent::Failed(reason)) if reason.contains("closed")));
    assert!(tokio::time::timeout(Duration::from_secs(2), worker.recv())
        .await
        .expect("channel closes")
        .is_none());
    let session = worker.stop().await.expect("session back");
    assert!(!session.is_open());
}
