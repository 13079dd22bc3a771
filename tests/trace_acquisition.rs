//! Single-sweep trace acquisition and peak report.

use scpi_verify::acquisition::{acquire_trace, Peak};
use scpi_verify::command_set::catalog;
use scpi_verify::error::VerifyError;
use scpi_verify::session::Session;
use scpi_verify::transport::SimulatedInstrument;
use std::sync::Arc;

#[tokio::test]
async fn test_osa_trace_and_peak() {
    let device = SimulatedInstrument::new().named("ap2061a");
    device.override_response("SPSWP1", "1");
    device.override_response("SPDATAWL1", "4 1550.0 1550.1 1550.2 1550.3");
    device.override_response("SPDATAD1", "4 -40.0 -12.5 -12.5 -30.0");
    let mut session = Session::open(device.clone(), Arc::new(catalog::ap2061a()));

    let trace = acquire_trace(&mut session, 1).await.unwrap();
    session.close().await;

    assert_eq!(trace.x, vec![1550.0, 1550.1, 1550.2, 1550.3]);
    assert_eq!(trace.peak(), Some(Peak { x: 1550.1, y: -12.5 }));
    assert_eq!(trace.peak_summary(), "Peak -12.50 dBm @ 1550.100 nm");
    assert_eq!(device.commands(), ["SPSWP1", "SPDATAWL1", "SPDATAD1"]);
}

#[tokio::test]
async fn test_analyzer_trace_triggers_and_waits() {
    let device = SimulatedInstrument::new().named("fsv30");
    device.override_response("TRAC:DATA:X? TRACE2", "1.0e9,1.001e9,1.002e9");
    device.override_response("TRAC:DATA? TRACE2", "-71.0,-20.25,-68.5");
    let mut session = Session::open(device.clone(), Arc::new(catalog::fsv30()));

    let trace = acquire_trace(&mut session, 2).await.unwrap();
    session.close().await;

    assert_eq!(trace.number, 2);
    assert_eq!(trace.peak(), Some(Peak { x: 1.001e9, y: -20.25 }));
    assert_eq!(trace.x_unit, "Hz");
    assert_eq!(
        &device.commands()[..4],
        ["INIT:IMM", "*OPC?", "TRAC:DATA:X? TRACE2", "TRAC:DATA? TRACE2"]
    );
}

#[tokio::test]
async fn test_interrupted_sweep_is_rejected() {
    let device = SimulatedInstrument::new();
    device.override_response("SPSWP1", "0");
    let mut session = Session::open(device.clone(), Arc::new(catalog::ap2061a()));

    let err = acquire_trace(&mut session, 1).await.unwrap_err();
    session.close().await;

    assert!(matches!(err, VerifyError::Acquisition(ref msg) if msg.contains("did not complete")));
    assert!(!device.commands().iter().any(|c| c.starts_with("SPDATA")));
}

#[tokio::test]
async fn test_mismatched_axes_are_rejected() {
    let device = SimulatedInstrument::new();
    device.override_response("SPSWP1", "1");
    device.override_response("SPDATAWL1", "1550.0,1550.1");
    device.override_response("SPDATAD1", "-40.0");
    let mut session = Session::open(device, Arc::new(catalog::ap2061a()));

    let err = acquire_trace(&mut session, 1).await.unwrap_err();
    session.close().await;
    assert!(matches!(err, VerifyError::Acquisition(_)));
}

#[tokio::test]
async fn test_generator_has_no_trace() {
    let device = SimulatedInstrument::new();
    let mut session = Session::open(device.clone(), Arc::new(catalog::afg1062()));

    let err = acquire_trace(&mut session, 1).await.unwrap_err();
    assert!(device.commands().is_empty());
    session.close().await;

    assert!(matches!(err, VerifyError::Acquisition(ref msg) if msg.contains("no trace commands")));
}
