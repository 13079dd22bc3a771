//! # SCPI Verify Core Library
//!
//! Configure lab instruments over SCPI, read every setting back, and check it
//! against what was commanded, once or on a timer.
//!
//! ## Crate Structure
//!
//! - **`transport`**: the `Transport` trait plus line-oriented TCP/serial,
//!   logging and simulated implementations.
//! - **`command_set`**: declarative per-instrument field lists (`CommandSet`,
//!   `FieldSpec`, comparators) and the built-in catalog.
//! - **`engine`**: the configure and verify passes.
//! - **`report`**: `VerificationReport` and its operator-facing rendering.
//! - **`session`**: one transport plus one command set, with safe shutdown.
//! - **`monitor`**: periodic verification, in-task or on a background worker.
//! - **`acquisition`**: spectrum analyzer markers and trace peak search.
//! - **`config`**: figment-based application configuration.
//! - **`logging`**: tracing subscriber setup.
//! - **`error`**: error types for every layer.
//!
//! ## Example
//! ```no_run
//! use scpi_verify::command_set::{catalog, ChannelConfig};
//! use scpi_verify::engine::{ConfigureOptions, VerifyOptions};
//! use scpi_verify::session::Session;
//! use scpi_verify::transport::{LineTransport, TransportSettings};
//! use std::sync::Arc;
//!
//! # async fn run() -> scpi_verify::error::AppResult<()> {
//! let transport = LineTransport::connect_tcp("192.168.99.50", 5025, TransportSettings::default()).await?;
//! let mut afg = Session::open(transport, Arc::new(catalog::afg1062()));
//! let config = ChannelConfig::new()
//!     .with("function", "SIN")
//!     .with("frequency_hz", 1000.0)
//!     .with("voltage_vpp", 2.0)
//!     .with("offset_v", 0.0)
//!     .with("load", "50");
//!
//! afg.configure(&config, &ConfigureOptions::default()).await?;
//! let report = afg.verify(&config, &VerifyOptions::default()).await?;
//! println!("{report}");
//! afg.close().await;
//! # Ok(())
//! # }
//! ```

pub mod acquisition;
pub mod command_set;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod report;
pub mod session;
pub mod transport;

pub use command_set::{ChannelConfig, CommandSet, FieldSpec, Value};
pub use engine::{configure, verify, ConfigureOptions, VerifyOptions};
pub use error::{AppResult, VerifyError};
pub use monitor::{monitor, CancelSignal, Monitor, MonitorOptions, MonitorWorker, TimestampedReport, WorkerEvent};
pub use report::{DiagnosticLine, VerificationReport};
pub use session::{Session, SessionState};
pub use transport::{LineTransport, Logged, SimulatedInstrument, Transport, TransportSettings};
