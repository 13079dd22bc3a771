//! Tracing setup.
//!
//! Every component logs through `tracing`: lifecycle at `info`, wire traffic
//! and per-field results at `debug`, swallowed shutdown failures at `warn`.
//! `RUST_LOG` takes precedence over the configured level. Logs go to stderr
//! by default so stdout carries only reports.
//!
//! # Example
//! ```no_run
//! use scpi_verify::logging::{self, OutputFormat, TracingConfig};
//! use tracing::Level;
//!
//! # fn main() -> Result<(), String> {
//! logging::init(TracingConfig::new(Level::DEBUG).with_format(OutputFormat::Compact))?;
//! tracing::info!("Bench ready");
//! # Ok(())
//! # }
//! ```

use crate::config::AppConfig;
use std::io::IsTerminal;
use tracing::Level;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, colored (interactive use)
    Pretty,
    /// One line per event
    Compact,
    /// JSON objects (log aggregation)
    Json,
}

/// Stream the log lines are written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    /// Standard error (default)
    Stderr,
    /// Standard output
    Stdout,
}

impl LogTarget {
    fn make_writer(self) -> BoxMakeWriter {
        match self {
            LogTarget::Stderr => BoxMakeWriter::new(std::io::stderr),
            LogTarget::Stdout => BoxMakeWriter::new(std::io::stdout),
        }
    }

    fn is_terminal(self) -> bool {
        match self {
            LogTarget::Stderr => std::io::stderr().is_terminal(),
            LogTarget::Stdout => std::io::stdout().is_terminal(),
        }
    }
}

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Whether to include file and line numbers
    pub with_file_and_line: bool,
    /// Whether to enable ANSI colors (Pretty and Compact); only honoured
    /// when the target is a terminal
    pub with_ansi: bool,
    /// Where log lines go
    pub target: LogTarget,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_file_and_line: false,
            with_ansi: true,
            target: LogTarget::Stderr,
        }
    }
}

impl TracingConfig {
    /// Config with the given level and default formatting.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Level taken from `[application] log_level`.
    pub fn from_app_config(config: &AppConfig) -> Result<Self, String> {
        Ok(Self::new(parse_log_level(&config.application.log_level)?))
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }

    /// Set the log stream
    pub fn with_target(mut self, target: LogTarget) -> Self {
        self.target = target;
        self
    }

    fn ansi_enabled(&self, terminal: bool) -> bool {
        self.with_ansi && terminal
    }

    /// Raise the level to at least `DEBUG` (the `--debug` flag).
    pub fn with_debug(mut self, enabled: bool) -> Self {
        if enabled && self.level < Level::DEBUG {
            self.level = Level::DEBUG;
        }
        self
    }
}

/// Install the global subscriber.
///
/// Idempotent: if a subscriber is already installed this returns `Ok(())`.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string().to_lowercase()));

    let ansi = config.ansi_enabled(config.target.is_terminal());
    let writer = config.target.make_writer();
    let layer = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(env_filter))
        .try_init()
        .or_else(|e| {
            // Expected in tests and when the host application set one up first
            if e.to_string().contains("a global default trace dispatcher has already been set") {
                Ok(())
            } else {
                Err(format!("Failed to initialize tracing: {e}"))
            }
        })
}

/// Parse log level string into tracing Level
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("Debug"), Ok(Level::DEBUG)));
        assert!(matches!(parse_log_level("WARN"), Ok(Level::WARN)));
        assert!(parse_log_level("loud").is_err());
    }

    #[test]
    fn debug_flag_only_raises_level() {
        assert_eq!(TracingConfig::new(Level::WARN).with_debug(true).level, Level::DEBUG);
        assert_eq!(TracingConfig::new(Level::TRACE).with_debug(true).level, Level::TRACE);
        assert_eq!(TracingConfig::new(Level::WARN).with_debug(false).level, Level::WARN);
    }

    #[test]
    fn logs_default_to_stderr_without_color_when_piped() {
        let config = TracingConfig::default();
        assert_eq!(config.target, LogTarget::Stderr);
        assert!(config.ansi_enabled(true));
        assert!(!config.ansi_enabled(false));
        assert!(!config.with_ansi(false).ansi_enabled(true));
    }

    #[test]
    fn level_comes_from_app_config() {
        let mut config = AppConfig::default();
        config.application.log_level = "error".to_string();
        let tracing = TracingConfig::from_app_config(&config).unwrap();
        assert_eq!(tracing.level, Level::ERROR);
    }
}
