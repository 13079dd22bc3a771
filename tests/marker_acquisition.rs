//! Spectrum analyzer marker acquisition on a simulated FSV30.

use scpi_verify::acquisition::{acquire_markers, MarkerPlan};
use scpi_verify::command_set::{catalog, ChannelConfig};
use scpi_verify::engine::{ConfigureOptions, VerifyOptions};
use scpi_verify::error::VerifyError;
use scpi_verify::session::Session;
use scpi_verify::transport::SimulatedInstrument;
use std::sync::Arc;
use std::time::Duration;

fn analyzer_config() -> ChannelConfig {
    ChannelConfig::new()
        .with("center_hz", 1.0e9)
        .with("span_hz", 10.0e6)
        .with("rbw_hz", 10.0e3)
        .with("vbw_hz", 10.0e3)
}

fn plan() -> MarkerPlan {
    MarkerPlan::new().marker(1, 1.0e9).marker(2, 1.001e9)
}

#[tokio::test]
async fn test_markers_are_placed_verified_and_read() {
    let device = SimulatedInstrument::new().named("fsv30");
    let set = plan().extend_command_set(&catalog::fsv30());
    let mut session = Session::open(device.clone(), Arc::new(set));
    let config = analyzer_config();

    session
        .configure(&config, &ConfigureOptions::default().with_settle(Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(device.register("CALC:MARK2:X").as_deref(), Some("1001000000"));
    assert_eq!(device.register("CALC:MARK1:STAT").as_deref(), Some("1"));

    let report = session.verify(&config, &VerifyOptions::default()).await.unwrap();
    assert!(report.overall_passed(), "{report}");
    assert_eq!(report.lines().len(), 9);

    device.set_register("CALC:MARK1:Y", "-23.5");
    device.set_register("CALC:MARK2:Y", "-61.25");
    device.clear_commands();
    let readings = acquire_markers(&mut session, &plan()).await.unwrap();
    session.close().await;

    assert_eq!(readings.len(), 2);
    assert_eq!(readings[0].marker, 1);
    assert_eq!(readings[0].frequency_hz, 1.0e9);
    assert_eq!(readings[0].level_dbm, -23.5);
    assert_eq!(readings[1].level_dbm, -61.25);
    assert_eq!(
        &device.commands()[..4],
        ["INIT:IMM", "*OPC?", "CALC:MARK1:X?", "CALC:MARK1:Y?"]
    );
}

#[tokio::test]
async fn test_acquisition_stops_on_bad_reading() {
    let device = SimulatedInstrument::new();
    device.set_register("CALC:MARK1:X", "1e9");
    device.override_response("CALC:MARK1:Y?", "OVLD");
    let mut session = Session::open(device.clone(), Arc::new(catalog::fsv30()));

    let err = acquire_markers(&mut session, &plan()).await.unwrap_err();
    session.close().await;

    assert!(matches!(err, VerifyError::Acquisition(ref msg) if msg.contains("marker 1 Y")));
    assert!(!device.commands().iter().any(|c| c.starts_with("CALC:MARK2")));
}

#[tokio::test]
async fn test_acquisition_propagates_transport_failure() {
    let device = SimulatedInstrument::new();
    device.fail_on("INIT:IMM");
    let mut session = Session::open(device.clone(), Arc::new(catalog::fsv30()));

    let err = acquire_markers(&mut session, &plan()).await.unwrap_err();
    session.close().await;

    assert!(matches!(err, VerifyError::Transport(ref e) if e.command == "INIT:IMM"));
}
