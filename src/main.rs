//! CLI entry point for scpi-verify
//!
//! ```bash
//! # Configure the function generator, read everything back, print OK/NG lines
//! scpi-verify --config config/instruments.toml verify afg
//!
//! # Only check, then keep re-checking every 2 s until Ctrl-C
//! scpi-verify verify afg --check-only --monitor 2
//!
//! # Spectrum analyzer marker read-out
//! scpi-verify markers fsv
//!
//! # Optical spectrum: sweep, read trace 1, report the peak every 5 s
//! scpi-verify trace osa --interval 5
//!
//! # Dry run against the in-memory instrument, echoing every command
//! scpi-verify --simulate --debug verify afg
//! ```
//!
//! Exit status: 0 when every check passed, 1 when a check failed (NG),
//! 2 when configuration or communication failed, 130 when interrupted with
//! Ctrl-C before the first report.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use scpi_verify::acquisition::{acquire_markers, acquire_trace, MarkerReading, Peak, Trace};
use scpi_verify::command_set::{catalog, ChannelConfig, Value};
use scpi_verify::config::{AppConfig, InstrumentDefinition, DEFAULT_CONFIG_PATH};
use scpi_verify::logging::{self, TracingConfig};
use scpi_verify::monitor::{MonitorWorker, TimestampedReport, WorkerEvent};
use scpi_verify::report::VerificationReport;
use scpi_verify::session::Session;
use scpi_verify::transport::{LineTransport, Logged, SimulatedInstrument, Transport};
use scpi_verify::VerifyError;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

type BoxedSession = Session<Box<dyn Transport>>;

#[derive(Parser)]
#[command(name = "scpi-verify")]
#[command(about = "Configure SCPI instruments and verify their settings by readback", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Talk to an in-memory simulated instrument instead of hardware
    #[arg(long, global = true)]
    simulate: bool,

    /// Echo every command and response
    #[arg(long, global = true)]
    debug: bool,

    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure an instrument and verify every setting
    Verify {
        /// Instrument id from the configuration file
        id: String,

        /// Skip configuration; only read back and compare
        #[arg(long)]
        check_only: bool,

        /// Send the reset command before configuring
        #[arg(long)]
        reset: bool,

        /// Override a configured value, e.g. --set frequency_hz=2000
        #[arg(long = "set", value_name = "FIELD=VALUE")]
        overrides: Vec<String>,

        /// Keep verifying every SECONDS until Ctrl-C
        #[arg(long, value_name = "SECONDS")]
        monitor: Option<f64>,
    },

    /// Place spectrum analyzer markers and print their readings until Ctrl-C
    Markers {
        /// Instrument id from the configuration file
        id: String,

        /// Seconds between sweeps (defaults to engine.monitor_interval)
        #[arg(long, value_name = "SECONDS")]
        interval: Option<f64>,

        /// Skip configuration; markers must already be placed
        #[arg(long)]
        check_only: bool,
    },

    /// Sweep an analyzer, read one trace, and print its peak until Ctrl-C
    Trace {
        /// Instrument id from the configuration file
        id: String,

        /// Trace number to read
        #[arg(long, default_value_t = 1)]
        number: u8,

        /// Seconds between sweeps (defaults to engine.monitor_interval)
        #[arg(long, value_name = "SECONDS")]
        interval: Option<f64>,

        /// Skip configuration; use the analyzer as it is set up
        #[arg(long)]
        check_only: bool,
    },

    /// List the built-in command sets
    List,
}

/// Result of a run that got as far as comparing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Pass,
    NotGood,
}

impl Outcome {
    fn from_passed(passed: bool) -> Self {
        if passed {
            Outcome::Pass
        } else {
            Outcome::NotGood
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = run(cli).await;
    match &result {
        Err(e) if is_interrupt(e) => info!("Interrupted"),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {e:#}");
        }
        Ok(_) => {}
    }
    ExitCode::from(exit_status(&result))
}

fn is_interrupt(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<VerifyError>()
        .is_some_and(VerifyError::is_cancellation)
}

fn exit_status(result: &Result<Outcome>) -> u8 {
    match result {
        Ok(Outcome::Pass) => 0,
        Ok(Outcome::NotGood) => 1,
        Err(e) if is_interrupt(e) => 130,
        Err(_) => 2,
    }
}

async fn run(cli: Cli) -> Result<Outcome> {
    if let Commands::List = cli.command {
        list_command_sets()?;
        return Ok(Outcome::Pass);
    }

    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    let tracing_config = TracingConfig::from_app_config(&config)
        .map_err(|e| anyhow!(e))?
        .with_debug(cli.debug);
    logging::init(tracing_config).map_err(|e| anyhow!(e))?;
    info!("{} starting", config.application.name);

    match &cli.command {
        Commands::Verify {
            id,
            check_only,
            reset,
            overrides,
            monitor,
        } => {
            let request = VerifyRequest {
                check_only: *check_only,
                reset: *reset,
                overrides,
                monitor: monitor.map(seconds).transpose()?,
            };
            run_verify(&cli, &config, id, request).await
        }
        Commands::Markers {
            id,
            interval,
            check_only,
        } => {
            let interval = interval
                .map(seconds)
                .transpose()?
                .unwrap_or(config.engine.monitor_interval);
            run_markers(&cli, &config, id, interval, *check_only).await
        }
        Commands::Trace {
            id,
            number,
            interval,
            check_only,
        } => {
            let interval = interval
                .map(seconds)
                .transpose()?
                .unwrap_or(config.engine.monitor_interval);
            run_trace(&cli, &config, id, *number, interval, *check_only).await
        }
        Commands::List => Ok(Outcome::Pass),
    }
}

fn seconds(value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| anyhow!("Invalid number of seconds: {value}"))
}

fn list_command_sets() -> Result<()> {
    for set in catalog::builtins() {
        println!("{:<10} {}", set.kind, set.description);
        for field in &set.fields {
            let tolerance = field
                .comparator
                .tolerance()
                .map(|t| format!(" (±{t}{})", field.unit.as_deref().map(|u| format!(" {u}")).unwrap_or_default()))
                .unwrap_or_default();
            println!("    {:<16} {}{}", field.name, field.query_command, tolerance);
        }
    }
    Ok(())
}

/// Parse `FIELD=VALUE`; finite numbers and `true`/`false` keep their type.
fn parse_override(raw: &str) -> Result<(String, Value)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected FIELD=VALUE, got '{raw}'"))?;
    let value = if let Some(number) = value.parse::<f64>().ok().filter(|n| n.is_finite()) {
        Value::Number(number)
    } else if let Ok(flag) = value.parse::<bool>() {
        Value::Bool(flag)
    } else {
        Value::from(value)
    };
    Ok((name.trim().to_string(), value))
}

async fn open_transport(cli: &Cli, instrument: &InstrumentDefinition) -> Result<Box<dyn Transport>> {
    let transport: Box<dyn Transport> = if cli.simulate {
        Box::new(SimulatedInstrument::new().named(&instrument.kind))
    } else if let Some(port) = &instrument.serial_port {
        open_serial(port, instrument)?
    } else if let Some(host) = &instrument.host {
        let settings = instrument.transport_settings();
        Box::new(
            LineTransport::connect_tcp(host, instrument.port, settings)
                .await
                .with_context(|| format!("Failed to connect to {}", instrument.id))?,
        )
    } else {
        bail!("Instrument '{}' has neither host nor serial_port", instrument.id);
    };

    if cli.debug {
        Ok(Box::new(Logged::new(transport)))
    } else {
        Ok(transport)
    }
}

#[cfg(feature = "serial")]
fn open_serial(port: &str, instrument: &InstrumentDefinition) -> Result<Box<dyn Transport>> {
    let transport = LineTransport::open_serial(port, instrument.baud_rate, instrument.transport_settings())
        .with_context(|| format!("Failed to open {} on {}", instrument.id, port))?;
    Ok(Box::new(transport))
}

#[cfg(not(feature = "serial"))]
fn open_serial(_port: &str, _instrument: &InstrumentDefinition) -> Result<Box<dyn Transport>> {
    Err(VerifyError::FeatureNotEnabled("serial".to_string()).into())
}

async fn open_session(cli: &Cli, instrument: &InstrumentDefinition) -> Result<BoxedSession> {
    let set = instrument.command_set()?;
    let channel = instrument.channel_name(&set);
    let transport = open_transport(cli, instrument).await?;
    Ok(Session::open(transport, Arc::new(set)).with_channel(channel))
}

struct VerifyRequest<'a> {
    check_only: bool,
    reset: bool,
    overrides: &'a [String],
    monitor: Option<Duration>,
}

async fn run_verify(
    cli: &Cli,
    config: &AppConfig,
    id: &str,
    request: VerifyRequest<'_>,
) -> Result<Outcome> {
    let instrument = config.instrument(id)?;
    let mut values = instrument.channel_config()?;
    for raw in request.overrides {
        let (name, value) = parse_override(raw)?;
        values.set(&name, value);
    }
    let verify_options = instrument.verify_options();
    let mut session = open_session(cli, instrument).await?;

    let first_pass = tokio::select! {
        result = configure_and_verify(&mut session, config, &values, &verify_options, &request) => result,
        _ = tokio::signal::ctrl_c() => Err(VerifyError::Cancelled.into()),
    };
    let outcome = match first_pass {
        Ok(report) => {
            print_report(&report, cli.json)?;
            Outcome::from_passed(report.overall_passed())
        }
        Err(e) => {
            session.close().await;
            return Err(e);
        }
    };

    let Some(interval) = request.monitor else {
        session.close().await;
        return Ok(outcome);
    };

    let options = config.engine.monitor_options(Some(interval), verify_options);
    let mut worker = MonitorWorker::spawn(session, values, options, config.engine.report_queue_capacity);
    let monitored = consume_reports(&mut worker, config.engine.poll_interval, cli.json).await;
    let mut session = worker.stop().await?;
    session.close().await;
    Ok(if monitored? && outcome == Outcome::Pass {
        Outcome::Pass
    } else {
        Outcome::NotGood
    })
}

async fn configure_and_verify(
    session: &mut BoxedSession,
    config: &AppConfig,
    values: &ChannelConfig,
    verify_options: &scpi_verify::VerifyOptions,
    request: &VerifyRequest<'_>,
) -> Result<VerificationReport> {
    let identity = session.identify().await.context("Instrument did not identify")?;
    info!("Connected to {}", identity);

    if request.check_only {
        info!("Check-only mode: skipping configuration");
    } else {
        session
            .configure(values, &config.engine.configure_options(request.reset))
            .await
            .context("Configuration failed")?;
    }
    Ok(session.verify(values, verify_options).await?)
}

/// Print reports as they arrive until Ctrl-C. Returns whether every tick passed.
async fn consume_reports(
    worker: &mut MonitorWorker<Box<dyn Transport>>,
    poll_interval: Duration,
    json: bool,
) -> Result<bool> {
    let mut poll = tokio::time::interval(poll_interval);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut all_passed = true;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Stopping monitor");
                break;
            }
            _ = poll.tick() => {
                while let Some(event) = worker.try_next() {
                    match event {
                        WorkerEvent::Report(tick) => {
                            all_passed &= tick.report.overall_passed();
                            print_tick(&tick, json)?;
                        }
                        WorkerEvent::Failed(reason) => {
                            warn!("Monitor stopped: {}", reason);
                            all_passed = false;
                        }
                    }
                }
                if worker.is_finished() {
                    break;
                }
            }
        }
    }
    Ok(all_passed)
}

async fn run_markers(
    cli: &Cli,
    config: &AppConfig,
    id: &str,
    interval: Duration,
    check_only: bool,
) -> Result<Outcome> {
    let instrument = config.instrument(id)?;
    if instrument.markers.is_empty() {
        bail!("Instrument '{}' has no markers configured", instrument.id);
    }
    let values = instrument.channel_config()?;
    let mut session = open_session(cli, instrument).await?;

    let result = tokio::select! {
        result = marker_loop(&mut session, config, instrument, &values, interval, check_only, cli.json) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Stopping marker acquisition");
            Ok(())
        }
    };
    session.close().await;
    result.map(|()| Outcome::Pass)
}

async fn marker_loop(
    session: &mut BoxedSession,
    config: &AppConfig,
    instrument: &InstrumentDefinition,
    values: &ChannelConfig,
    interval: Duration,
    check_only: bool,
    json: bool,
) -> Result<()> {
    session.identify().await.context("Instrument did not identify")?;
    if !check_only {
        session
            .configure(values, &config.engine.configure_options(false))
            .await
            .context("Configuration failed")?;
    }
    loop {
        let readings = acquire_markers(session, &instrument.markers).await?;
        print_markers(&readings, json)?;
        tokio::time::sleep(interval).await;
    }
}

async fn run_trace(
    cli: &Cli,
    config: &AppConfig,
    id: &str,
    number: u8,
    interval: Duration,
    check_only: bool,
) -> Result<Outcome> {
    let instrument = config.instrument(id)?;
    let values = instrument.channel_config()?;
    let mut session = open_session(cli, instrument).await?;
    if session.command_set().trace.is_none() {
        session.close().await;
        bail!("Instrument '{}' ({}) cannot read traces", instrument.id, instrument.kind);
    }

    let result = tokio::select! {
        result = trace_loop(&mut session, config, &values, number, interval, check_only, cli.json) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Stopping trace acquisition");
            Ok(())
        }
    };
    session.close().await;
    result.map(|()| Outcome::Pass)
}

async fn trace_loop(
    session: &mut BoxedSession,
    config: &AppConfig,
    values: &ChannelConfig,
    number: u8,
    interval: Duration,
    check_only: bool,
    json: bool,
) -> Result<()> {
    session.identify().await.context("Instrument did not identify")?;
    if !check_only {
        session
            .configure(values, &config.engine.configure_options(false))
            .await
            .context("Configuration failed")?;
    }
    for scan in 1u64.. {
        let trace = acquire_trace(session, number).await?;
        print_trace(scan, &trace, json)?;
        tokio::time::sleep(interval).await;
    }
    Ok(())
}

#[derive(Serialize)]
struct TraceRecord<'a> {
    scan: u64,
    timestamp: chrono::DateTime<chrono::Utc>,
    peak: Option<Peak>,
    trace: &'a Trace,
}

fn print_trace(scan: u64, trace: &Trace, json: bool) -> Result<()> {
    let timestamp = chrono::Utc::now();
    if json {
        let record = TraceRecord {
            scan,
            timestamp,
            peak: trace.peak(),
            trace,
        };
        println!("{}", serde_json::to_string(&record)?);
    } else {
        println!(
            "[{}] #{} Trace {}: {}",
            timestamp.format("%H:%M:%S"),
            scan,
            trace.number,
            trace.peak_summary()
        );
    }
    Ok(())
}

fn print_report(report: &VerificationReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}

fn print_tick(tick: &TimestampedReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(tick)?);
    } else {
        println!("[{}] tick {}", tick.timestamp.format("%H:%M:%S%.3f"), tick.tick);
        println!("{}", tick.report);
    }
    Ok(())
}

fn print_markers(readings: &[MarkerReading], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(readings)?);
    } else {
        for reading in readings {
            println!(
                "Marker {}: {:.3} MHz, {:.2} dBm",
                reading.marker,
                reading.frequency_hz / 1e6,
                reading.level_dbm
            );
        }
    }
    Ok(())
}
