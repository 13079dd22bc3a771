//! Application configuration.
//!
//! Loaded with `figment` from a TOML file, then overridden by environment
//! variables prefixed with `SCPI_VERIFY_` (nested keys separated by `__`, e.g.
//! `SCPI_VERIFY_ENGINE__SETTLE=500ms`).
//!
//! # Example
//! ```no_run
//! use scpi_verify::config::AppConfig;
//!
//! let config = AppConfig::load_from("config/instruments.toml")?;
//! let afg = config.instrument("afg")?;
//! println!("{} is a {}", afg.id, afg.kind);
//! # Ok::<(), scpi_verify::error::VerifyError>(())
//! ```

use crate::acquisition::MarkerPlan;
use crate::command_set::{catalog, ChannelConfig, CommandSet, Value};
use crate::engine::{ConfigureOptions, VerifyOptions};
use crate::error::{AppResult, VerifyError};
use crate::monitor::{MonitorOptions, DEFAULT_QUEUE_CAPACITY};
use crate::transport::TransportSettings;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/instruments.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SCPI_VERIFY_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Timing and queueing of the engine
    #[serde(default)]
    pub engine: EngineConfig,
    /// Instrument definitions
    #[serde(default)]
    pub instruments: Vec<InstrumentDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Engine timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Wait after the reset command
    #[serde(with = "humantime_serde", default = "default_reset_settle")]
    pub reset_settle: Duration,
    /// Wait after configuring, before verification
    #[serde(with = "humantime_serde", default = "default_settle")]
    pub settle: Duration,
    /// Delay between monitor ticks
    #[serde(with = "humantime_serde", default = "default_monitor_interval")]
    pub monitor_interval: Duration,
    /// Depth of the monitor worker's report queue
    #[serde(default = "default_queue_capacity")]
    pub report_queue_capacity: usize,
    /// How often the consumer polls the report queue
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reset_settle: default_reset_settle(),
            settle: default_settle(),
            monitor_interval: default_monitor_interval(),
            report_queue_capacity: default_queue_capacity(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl EngineConfig {
    /// Configure options using these delays.
    pub fn configure_options(&self, reset: bool) -> ConfigureOptions {
        ConfigureOptions {
            reset,
            reset_settle: self.reset_settle,
            settle: self.settle,
        }
    }

    /// Monitor options; `interval` overrides `monitor_interval`.
    pub fn monitor_options(&self, interval: Option<Duration>, verify: VerifyOptions) -> MonitorOptions {
        MonitorOptions {
            interval: interval.unwrap_or(self.monitor_interval),
            verify,
        }
    }
}

/// Channel selector; numeric for generators, named for supplies (`P6V`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelId {
    /// Channel number
    Number(u32),
    /// Channel name
    Name(String),
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Number(n) => write!(f, "{n}"),
            ChannelId::Name(name) => f.write_str(name),
        }
    }
}

/// One instrument on the bench.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentDefinition {
    /// Unique instrument identifier
    pub id: String,
    /// Built-in command set kind (see [`catalog::BUILTIN_KINDS`])
    pub kind: String,
    /// Custom command set file; replaces the built-in one
    #[serde(default)]
    pub command_set: Option<PathBuf>,
    /// Host for raw-socket SCPI
    #[serde(default)]
    pub host: Option<String>,
    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Serial device, e.g. `/dev/ttyUSB0` (requires the `serial` feature)
    #[serde(default)]
    pub serial_port: Option<String>,
    /// Serial baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per-call timeout
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
    /// Wait for late responses after a timeout
    #[serde(with = "humantime_serde", default = "default_drain_window")]
    pub drain_window: Duration,
    /// Appended to every command
    #[serde(default = "default_terminator")]
    pub write_terminator: String,
    /// Ends every response; exactly one byte
    #[serde(default = "default_terminator")]
    pub read_terminator: String,
    /// Channel substituted into templates
    #[serde(default)]
    pub channel: Option<ChannelId>,
    /// Desired values
    #[serde(default)]
    pub values: ChannelConfig,
    /// Per-field tolerance overrides
    #[serde(default)]
    pub tolerances: HashMap<String, f64>,
    /// Spectrum analyzer markers
    #[serde(default)]
    pub markers: MarkerPlan,
}

// Default value functions
fn default_name() -> String {
    "scpi-verify".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_reset_settle() -> Duration {
    Duration::from_secs(1)
}

fn default_settle() -> Duration {
    Duration::from_millis(200)
}

fn default_monitor_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_port() -> u16 {
    5025
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_drain_window() -> Duration {
    Duration::from_millis(250)
}

fn default_terminator() -> String {
    "\n".to_string()
}

impl AppConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] plus environment overrides.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from `path` plus environment overrides, then validate.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document (no environment overrides), then validate.
    pub fn from_toml_str(source: &str) -> AppResult<Self> {
        let config: Self = Figment::new().merge(Toml::string(source)).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: String| Err(VerifyError::ConfigValidation(msg));

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.engine.report_queue_capacity == 0 {
            return invalid("report_queue_capacity must be at least 1".to_string());
        }

        let mut ids = HashSet::new();
        for instrument in &self.instruments {
            if !ids.insert(&instrument.id) {
                return invalid(format!("Duplicate instrument ID: {}", instrument.id));
            }
            instrument.validate()?;
        }

        Ok(())
    }

    /// Look up an instrument by id.
    pub fn instrument(&self, id: &str) -> AppResult<&InstrumentDefinition> {
        self.instruments
            .iter()
            .find(|inst| inst.id == id)
            .ok_or_else(|| VerifyError::ConfigValidation(format!("Unknown instrument '{id}'")))
    }
}

impl InstrumentDefinition {
    fn validate(&self) -> AppResult<()> {
        let invalid = |msg: String| Err(VerifyError::ConfigValidation(format!("{}: {msg}", self.id)));

        if self.command_set.is_none() && catalog::builtin(&self.kind).is_err() {
            return invalid(format!(
                "unknown kind '{}' (built-in kinds: {}) and no command_set file",
                self.kind,
                catalog::BUILTIN_KINDS.join(", ")
            ));
        }
        if self.host.is_some() && self.serial_port.is_some() {
            return invalid("set either host or serial_port, not both".to_string());
        }
        if self.read_terminator.len() != 1 {
            return invalid(format!(
                "read_terminator must be a single byte, got {:?}",
                self.read_terminator
            ));
        }
        if self.timeout.is_zero() {
            return invalid("timeout must be non-zero".to_string());
        }
        for (field, tolerance) in &self.tolerances {
            if !tolerance.is_finite() || *tolerance < 0.0 {
                return invalid(format!("tolerance for '{field}' must be a non-negative number"));
            }
        }
        Ok(())
    }

    /// Framing and timeout for this instrument's transport.
    pub fn transport_settings(&self) -> TransportSettings {
        let read_terminator = self.read_terminator.bytes().next().unwrap_or(b'\n');
        TransportSettings::default()
            .with_timeout(self.timeout)
            .with_drain_window(self.drain_window)
            .with_write_terminator(self.write_terminator.clone())
            .with_read_terminator(read_terminator)
    }

    /// The command set to drive this instrument with, markers included.
    pub fn command_set(&self) -> AppResult<CommandSet> {
        let set = match &self.command_set {
            Some(path) => CommandSet::from_toml_str(&std::fs::read_to_string(path)?)?,
            None => catalog::builtin(&self.kind)?,
        };
        if self.markers.is_empty() {
            Ok(set)
        } else {
            Ok(self.markers.extend_command_set(&set))
        }
    }

    /// Channel name, or the command set's default.
    pub fn channel_name(&self, set: &CommandSet) -> String {
        self.channel
            .as_ref()
            .map_or_else(|| set.default_channel.clone(), ToString::to_string)
    }

    /// Desired values, with OSA polarization aliases resolved.
    pub fn channel_config(&self) -> AppResult<ChannelConfig> {
        let mut values = self.values.clone();
        if self.kind.eq_ignore_ascii_case("ap2061a") {
            if let Some(alias) = values.get("polarization").map(ToString::to_string) {
                let channel = catalog::osa_channel(&alias).ok_or_else(|| {
                    VerifyError::ConfigValidation(format!(
                        "{}: unknown polarization '{alias}'",
                        self.id
                    ))
                })?;
                values.set("polarization", Value::from(channel));
            }
        }
        Ok(values)
    }

    /// Verify options carrying this instrument's tolerance overrides.
    pub fn verify_options(&self) -> VerifyOptions {
        VerifyOptions {
            tolerance_overrides: self.tolerances.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [application]
        name = "bench"
        log_level = "debug"

        [engine]
        settle = "500ms"
        monitor_interval = "1s"

        [[instruments]]
        id = "afg"
        kind = "afg1062"
        host = "192.168.99.50"
        channel = 2
        [instruments.values]
        function = "SQU"
        frequency_hz = 1000.0
        load = "INF"
        [instruments.tolerances]
        frequency_hz = 2.0

        [[instruments]]
        id = "osa"
        kind = "ap2061a"
        host = "192.168.99.60"
        port = 5900
        timeout = "10s"
        [instruments.values]
        polarization = "total"
        center_nm = 1550.0
    "#;

    #[test]
    fn parses_sample_with_defaults() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.application.name, "bench");
        assert_eq!(config.engine.settle, Duration::from_millis(500));
        assert_eq!(config.engine.reset_settle, Duration::from_secs(1));
        assert_eq!(config.engine.report_queue_capacity, 16);

        let afg = config.instrument("afg").unwrap();
        assert_eq!(afg.port, 5025);
        assert_eq!(afg.timeout, Duration::from_secs(5));
        let set = afg.command_set().unwrap();
        assert_eq!(afg.channel_name(&set), "2");
        assert_eq!(afg.verify_options().tolerance_overrides.get("frequency_hz"), Some(&2.0));
    }

    #[test]
    fn resolves_osa_polarization_alias() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        let osa = config.instrument("osa").unwrap();
        assert_eq!(osa.transport_settings().timeout, Duration::from_secs(10));
        let values = osa.channel_config().unwrap();
        assert_eq!(values.get("polarization"), Some(&Value::from("1+2")));
    }

    #[test]
    fn rejects_duplicates_and_unknown_kinds() {
        let dup = r#"
            [[instruments]]
            id = "a"
            kind = "afg1062"
            [[instruments]]
            id = "a"
            kind = "fsv30"
        "#;
        assert!(matches!(
            AppConfig::from_toml_str(dup),
            Err(VerifyError::ConfigValidation(msg)) if msg.contains("Duplicate")
        ));

        let unknown = "[[instruments]]\nid = \"x\"\nkind = \"hp8560\"\n";
        assert!(AppConfig::from_toml_str(unknown).is_err());
    }

    #[test]
    fn rejects_bad_log_level_and_terminator() {
        assert!(AppConfig::from_toml_str("[application]\nlog_level = \"loud\"\n").is_err());
        let bad = "[[instruments]]\nid = \"x\"\nkind = \"e3631a\"\nread_terminator = \"\\r\\n\"\n";
        assert!(AppConfig::from_toml_str(bad).is_err());
        let both = "[[instruments]]\nid = \"x\"\nkind = \"e3631a\"\nhost = \"10.0.0.2\"\nserial_port = \"/dev/ttyUSB0\"\n";
        assert!(AppConfig::from_toml_str(both).is_err());
    }

    #[test]
    fn unknown_instrument_id() {
        let config = AppConfig::default();
        assert!(config.instrument("afg").is_err());
    }

    #[test]
    fn loads_file_and_custom_command_set() {
        let dir = tempfile::tempdir().unwrap();
        let set_path = dir.path().join("psu.toml");
        std::fs::write(&set_path, catalog::e3631a().to_toml_string().unwrap()).unwrap();

        let config_path = dir.path().join("bench.toml");
        std::fs::write(
            &config_path,
            format!(
                "[[instruments]]\nid = \"psu\"\nkind = \"custom\"\ncommand_set = {:?}\nchannel = \"P25V\"\n",
                set_path.display().to_string()
            ),
        )
        .unwrap();

        let config = AppConfig::load_from(&config_path).unwrap();
        let psu = config.instrument("psu").unwrap();
        let set = psu.command_set().unwrap();
        assert_eq!(set.kind, "e3631a");
        assert_eq!(psu.channel_name(&set), "P25V");
    }
}
