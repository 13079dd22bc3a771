//! Declarative command sets.
//!
//! A [`CommandSet`] is the single source of truth for one instrument kind: the
//! ordered list of [`FieldSpec`]s that configure sends and verify reads back,
//! plus the housekeeping commands around them (clear, reset, channel preamble,
//! error queue, safe shutdown).
//!
//! Command sets are plain data. They are immutable once built, `Clone`, and are
//! shared between sessions and worker tasks behind an `Arc`. They can be written
//! by hand in TOML and loaded with [`CommandSet::from_toml_str`]; the built-in
//! catalog lives in [`catalog`].
//!
//! # Example
//!
//! ```toml
//! kind = "bench-psu"
//! description = "Single-output bench supply"
//! clear_command = "*CLS"
//! shutdown_commands = ["OUTP OFF"]
//!
//! [error_query]
//! command = "SYST:ERR?"
//!
//! [[fields]]
//! name = "voltage_v"
//! set_command = "VOLT {value}"
//! query_command = "VOLT?"
//! comparator = { type = "numeric", tolerance = 0.01 }
//! unit = "V"
//! ```

pub mod catalog;
pub mod template;

pub use template::{Template, TemplateVars};

use crate::error::{CommandSetError, ConfigurationError, VerificationFieldError};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

/// Leading status code of an error-queue response, e.g. `0,"No error"` or `-113,"Undefined header"`.
static ERROR_CODE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([+-]?\d+)").expect("Invalid error code regex"));

fn default_channel() -> String {
    "1".to_string()
}

/// A configured or read-back value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// On/off style setting.
    Bool(bool),
    /// Floating-point setting (frequency, amplitude, ...).
    Number(f64),
    /// Enumerated setting (waveform shape, load, ...).
    Text(String),
}

impl Value {
    /// Numeric view; text is parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Bool(_) => None,
        }
    }

    /// Switch view; accepts `true/false`, `1/0`, `ON/OFF`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Text(s) => parse_switch(s),
            Value::Number(n) if *n == 0.0 => Some(false),
            Value::Number(n) if *n == 1.0 => Some(true),
            Value::Number(_) => None,
        }
    }

    /// Text view; numbers use their shortest round-trip form.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Text(s) => Some(s.clone()),
            Value::Number(n) => Some(format_number(*n)),
            Value::Bool(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", if *b { "ON" } else { "OFF" }),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

/// Shortest representation that round-trips, e.g. `1000`, `0.2`, `1e-7`.
pub fn format_number(value: f64) -> String {
    format!("{value}")
}

/// Parse an instrument on/off response.
pub fn parse_switch(raw: &str) -> Option<bool> {
    match raw.trim().trim_matches('"').to_ascii_uppercase().as_str() {
        "1" | "ON" | "TRUE" => Some(true),
        "0" | "OFF" | "FALSE" => Some(false),
        _ => None,
    }
}

/// How a read-back response is compared with the expected value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Comparator {
    /// `abs(actual - expected) <= tolerance`.
    Numeric {
        /// Absolute difference bound, in the field's unit.
        tolerance: f64,
    },
    /// Case-insensitive string equality.
    Text,
    /// On/off state; set as `ON`/`OFF`, read back as `1`/`0`.
    Switch,
}

/// Outcome of one comparison, already rendered for the report.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    /// Whether the read-back matched.
    pub passed: bool,
    /// Rendered read-back value.
    pub actual: String,
    /// Rendered expected value.
    pub expected: String,
}

impl Comparator {
    /// Tolerance of a numeric comparator.
    pub fn tolerance(&self) -> Option<f64> {
        match self {
            Comparator::Numeric { tolerance } => Some(*tolerance),
            _ => None,
        }
    }

    /// Render `value` as the argument of a set command.
    pub fn setpoint(&self, field: &str, value: &Value) -> Result<String, ConfigurationError> {
        let kind_error = |expected: &'static str| ConfigurationError::ValueKind {
            field: field.to_string(),
            expected,
            actual: value.to_string(),
        };
        match self {
            Comparator::Numeric { .. } => value
                .as_f64()
                .map(format_number)
                .ok_or_else(|| kind_error("numeric")),
            Comparator::Text => value.as_text().ok_or_else(|| kind_error("text")),
            Comparator::Switch => value
                .as_bool()
                .map(|on| if on { "ON" } else { "OFF" }.to_string())
                .ok_or_else(|| kind_error("on/off")),
        }
    }

    /// Compare a raw response with `expected`.
    ///
    /// `tolerance_override` replaces the numeric tolerance for this call only.
    pub fn compare(
        &self,
        response: &str,
        expected: &Value,
        tolerance_override: Option<f64>,
        unit: Option<&str>,
    ) -> Result<Comparison, VerificationFieldError> {
        match self {
            Comparator::Numeric { tolerance } => {
                let actual: f64 = response.trim().parse().map_err(|e: std::num::ParseFloatError| {
                    VerificationFieldError::Parse {
                        response: response.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                let wanted = expected
                    .as_f64()
                    .ok_or_else(|| VerificationFieldError::ExpectedKind(expected.to_string()))?;
                let tolerance = tolerance_override.unwrap_or(*tolerance);
                Ok(Comparison {
                    passed: (actual - wanted).abs() <= tolerance,
                    actual: with_unit(format_number(actual), unit),
                    expected: with_unit(format_number(wanted), unit),
                })
            }
            Comparator::Text => {
                let actual = response.trim().trim_matches('"').to_uppercase();
                let wanted = expected
                    .as_text()
                    .ok_or_else(|| VerificationFieldError::ExpectedKind(expected.to_string()))?
                    .to_uppercase();
                Ok(Comparison {
                    passed: actual == wanted,
                    actual,
                    expected: wanted,
                })
            }
            Comparator::Switch => {
                let actual = parse_switch(response).ok_or_else(|| VerificationFieldError::Parse {
                    response: response.to_string(),
                    reason: "not an on/off state".to_string(),
                })?;
                let wanted = expected
                    .as_bool()
                    .ok_or_else(|| VerificationFieldError::ExpectedKind(expected.to_string()))?;
                let render = |on: bool| if on { "1" } else { "0" }.to_string();
                Ok(Comparison {
                    passed: actual == wanted,
                    actual: render(actual),
                    expected: render(wanted),
                })
            }
        }
    }
}

fn with_unit(value: String, unit: Option<&str>) -> String {
    match unit {
        Some(unit) => format!("{value} {unit}"),
        None => value,
    }
}

/// One configurable, verifiable instrument attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Key into [`ChannelConfig`].
    pub name: String,
    /// Human label used in diagnostics; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Command applying the value; `None` for read-only fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_command: Option<Template>,
    /// Command reading the value back.
    pub query_command: Template,
    /// Unit appended to rendered numeric values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Expected value when the channel config does not name this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Comparison policy.
    pub comparator: Comparator,
}

impl FieldSpec {
    fn build(name: &str, set: &str, query: &str, comparator: Comparator) -> Self {
        Self {
            name: name.to_string(),
            label: None,
            set_command: Some(Template::new(set)),
            query_command: Template::new(query),
            comparator,
            unit: None,
            default_value: None,
        }
    }

    /// Numeric field with an absolute tolerance.
    pub fn numeric(name: &str, set: &str, query: &str, tolerance: f64) -> Self {
        Self::build(name, set, query, Comparator::Numeric { tolerance })
    }

    /// Enumerated field compared case-insensitively.
    pub fn text(name: &str, set: &str, query: &str) -> Self {
        Self::build(name, set, query, Comparator::Text)
    }

    /// On/off field.
    pub fn switch(name: &str, set: &str, query: &str) -> Self {
        Self::build(name, set, query, Comparator::Switch)
    }

    /// Set the diagnostic label.
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    /// Set the unit shown next to numeric values.
    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    /// Set the expected value used when the channel config is silent.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Drop the set command; the field is only verified.
    pub fn read_only(mut self) -> Self {
        self.set_command = None;
        self
    }

    /// Label used in diagnostics.
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    /// Expected value for this field: the config's entry, else the default.
    pub fn expected<'a>(&'a self, config: &'a ChannelConfig) -> Option<&'a Value> {
        config.get(&self.name).or(self.default_value.as_ref())
    }
}

/// Device error-queue query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorQuery {
    /// Query command, e.g. `SYST:ERR?`.
    pub command: Template,
}

impl ErrorQuery {
    /// Error query issuing `command`.
    pub fn new(command: &str) -> Self {
        Self {
            command: Template::new(command),
        }
    }

    /// True when the response's leading status code is zero.
    pub fn is_no_error(response: &str) -> bool {
        ERROR_CODE_REGEX
            .captures(response)
            .and_then(|caps| caps.get(1))
            .and_then(|code| code.as_str().parse::<i64>().ok())
            .is_some_and(|code| code == 0)
    }
}

/// Single sweep followed by a whole-trace read, for analyzers.
///
/// `{trace}` in the axis queries is the trace number being read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceCommands {
    /// Sent to arm one sweep, e.g. `INIT:IMM`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Template>,
    /// Blocks until the sweep is done; the reply must be a positive number.
    pub complete_query: Template,
    /// X axis samples.
    pub x_query: Template,
    /// Y axis samples.
    pub y_query: Template,
    /// X axis unit.
    pub x_unit: String,
    /// Y axis unit.
    #[serde(default = "default_y_unit")]
    pub y_unit: String,
}

fn default_y_unit() -> String {
    "dBm".to_string()
}

impl TraceCommands {
    /// Trace read with `complete_query` as the only sync point.
    pub fn new(complete_query: &str, x_query: &str, y_query: &str, x_unit: &str) -> Self {
        Self {
            trigger: None,
            complete_query: Template::new(complete_query),
            x_query: Template::new(x_query),
            y_query: Template::new(y_query),
            x_unit: x_unit.to_string(),
            y_unit: default_y_unit(),
        }
    }

    /// Send `trigger` before waiting for completion.
    pub fn with_trigger(mut self, trigger: &str) -> Self {
        self.trigger = Some(Template::new(trigger));
        self
    }
}

/// Everything needed to configure and verify one instrument kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSet {
    /// Instrument kind identifier, e.g. `afg1062`.
    pub kind: String,
    /// One-line description.
    #[serde(default)]
    pub description: String,
    /// Value of `{channel}` when the session does not choose one.
    #[serde(default = "default_channel")]
    pub default_channel: String,
    /// Sent first during configure, e.g. `*CLS`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clear_command: Option<Template>,
    /// Sent when a reset is requested, e.g. `*RST`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_command: Option<Template>,
    /// Sent before both configure and verify, e.g. channel selection.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preamble: Vec<Template>,
    /// Sent once during configure, before the field set commands.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setup_commands: Vec<Template>,
    /// Queried after every set command to wait for completion, e.g. `*OPC?`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_query: Option<Template>,
    /// Commands that leave the instrument safe (outputs off). Best effort.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shutdown_commands: Vec<Template>,
    /// Queried after all fields during verify.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_query: Option<ErrorQuery>,
    /// Sweep and trace read-out, for analyzers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceCommands>,
    /// Fields in configure/verify order.
    pub fields: Vec<FieldSpec>,
}

impl CommandSet {
    /// Empty command set for `kind`; fill it with the builder methods.
    pub fn new(kind: &str, description: &str) -> Self {
        Self {
            kind: kind.to_string(),
            description: description.to_string(),
            default_channel: default_channel(),
            clear_command: None,
            reset_command: None,
            preamble: Vec::new(),
            setup_commands: Vec::new(),
            sync_query: None,
            shutdown_commands: Vec::new(),
            error_query: None,
            trace: None,
            fields: Vec::new(),
        }
    }

    /// Append a field.
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Look up a field by name.
    pub fn find_field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Field names in declared order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Parse and validate a TOML command set.
    pub fn from_toml_str(source: &str) -> Result<Self, CommandSetError> {
        let set: CommandSet = toml::from_str(source)?;
        set.validate()?;
        Ok(set)
    }

    /// Serialize to the TOML schema accepted by [`CommandSet::from_toml_str`].
    pub fn to_toml_string(&self) -> Result<String, CommandSetError> {
        Ok(toml::to_string(self)?)
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), CommandSetError> {
        if self.kind.trim().is_empty() {
            return Err(CommandSetError::Invalid("kind must not be empty".into()));
        }
        if self.fields.is_empty() {
            return Err(CommandSetError::Invalid(format!(
                "command set '{}' declares no fields",
                self.kind
            )));
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(CommandSetError::Invalid(format!(
                    "duplicate field '{}' in command set '{}'",
                    field.name, self.kind
                )));
            }
            if let Some(tolerance) = field.comparator.tolerance() {
                if !tolerance.is_finite() || tolerance < 0.0 {
                    return Err(CommandSetError::Invalid(format!(
                        "field '{}' has invalid tolerance {tolerance}",
                        field.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Desired values for one configure/verify cycle, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelConfig(IndexMap<String, Value>);

impl ChannelConfig {
    /// Empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Insert or replace a value.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.0.insert(name.to_string(), value.into());
    }

    /// Value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Overlay `other` on top of this config.
    pub fn merge(&mut self, other: &ChannelConfig) {
        for (name, value) in other.iter() {
            self.0.insert(name.clone(), value.clone());
        }
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no values are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Value)> for ChannelConfig {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_tolerance_is_inclusive() {
        let cmp = Comparator::Numeric { tolerance: 0.5 };
        let expected = Value::Number(1000.0);
        assert!(cmp.compare("1000.5", &expected, None, None).unwrap().passed);
        assert!(cmp.compare("999.5", &expected, None, None).unwrap().passed);
        assert!(!cmp.compare("1000.5001", &expected, None, None).unwrap().passed);
    }

    #[test]
    fn tolerance_override_applies_per_call() {
        let cmp = Comparator::Numeric { tolerance: 0.5 };
        let expected = Value::Number(1000.0);
        assert!(!cmp.compare("1002", &expected, None, None).unwrap().passed);
        assert!(cmp.compare("1002", &expected, Some(2.0), None).unwrap().passed);
    }

    #[test]
    fn numeric_accepts_scpi_exponent_form() {
        let cmp = Comparator::Numeric { tolerance: 0.5 };
        let outcome = cmp
            .compare("+1.00020E+03", &Value::Number(1000.0), None, Some("Hz"))
            .unwrap();
        assert!(outcome.passed);
        assert_eq!(outcome.actual, "1000.2 Hz");
        assert_eq!(outcome.expected, "1000 Hz");
    }

    #[test]
    fn text_is_case_insensitive() {
        let outcome = Comparator::Text
            .compare("inf", &Value::from("INF"), None, None)
            .unwrap();
        assert!(outcome.passed);
        assert_eq!(outcome.actual, "INF");
    }

    #[test]
    fn switch_reads_numeric_states() {
        let on = Value::Bool(true);
        assert!(Comparator::Switch.compare("1", &on, None, None).unwrap().passed);
        assert!(!Comparator::Switch.compare("0", &on, None, None).unwrap().passed);
        assert!(Comparator::Switch.compare("maybe", &on, None, None).is_err());
    }

    #[test]
    fn unparseable_numeric_response_is_a_field_error() {
        let err = Comparator::Numeric { tolerance: 0.1 }
            .compare("ERR", &Value::Number(1.0), None, None)
            .unwrap_err();
        assert!(matches!(err, VerificationFieldError::Parse { .. }));
    }

    #[test]
    fn setpoints_render_per_comparator() {
        assert_eq!(
            Comparator::Switch.setpoint("out", &Value::Bool(true)).unwrap(),
            "ON"
        );
        assert_eq!(
            Comparator::Numeric { tolerance: 0.1 }
                .setpoint("freq", &Value::Number(1000.0))
                .unwrap(),
            "1000"
        );
        assert_eq!(
            Comparator::Text.setpoint("load", &Value::Number(50.0)).unwrap(),
            "50"
        );
        assert!(Comparator::Numeric { tolerance: 0.1 }
            .setpoint("freq", &Value::from("fast"))
            .is_err());
    }

    #[test]
    fn error_queue_codes() {
        assert!(ErrorQuery::is_no_error("0,No error"));
        assert!(ErrorQuery::is_no_error("+0,\"No error\""));
        assert!(!ErrorQuery::is_no_error("-113,\"Undefined header\""));
        assert!(!ErrorQuery::is_no_error(""));
        assert!(!ErrorQuery::is_no_error("garbage"));
    }

    #[test]
    fn field_default_fills_missing_config() {
        let field = FieldSpec::switch("output_enabled", "OUTP {value}", "OUTP?").with_default(true);
        let config = ChannelConfig::new();
        assert_eq!(field.expected(&config), Some(&Value::Bool(true)));
        let config = config.with("output_enabled", false);
        assert_eq!(field.expected(&config), Some(&Value::Bool(false)));
    }

    #[test]
    fn validate_rejects_duplicates_and_negative_tolerance() {
        let dup = CommandSet::new("x", "")
            .field(FieldSpec::text("a", "A {value}", "A?"))
            .field(FieldSpec::text("a", "A {value}", "A?"));
        assert!(dup.validate().is_err());

        let negative =
            CommandSet::new("x", "").field(FieldSpec::numeric("a", "A {value}", "A?", -1.0));
        assert!(negative.validate().is_err());

        assert!(CommandSet::new("x", "").validate().is_err());
    }

    #[test]
    fn parses_hand_written_toml() {
        let source = r#"
            kind = "bench-psu"
            description = "Single-output bench supply"
            clear_command = "*CLS"
            shutdown_commands = ["OUTP OFF"]

            [error_query]
            command = "SYST:ERR?"

            [[fields]]
            name = "voltage_v"
            set_command = "VOLT {value}"
            query_command = "VOLT?"
            comparator = { type = "numeric", tolerance = 0.01 }
            unit = "V"

            [[fields]]
            name = "output_enabled"
            set_command = "OUTP {value}"
            query_command = "OUTP?"
            comparator = { type = "switch" }
            default_value = true
        "#;
        let set = CommandSet::from_toml_str(source).unwrap();
        assert_eq!(set.field_names(), vec!["voltage_v", "output_enabled"]);
        assert_eq!(set.default_channel, "1");
        assert_eq!(
            set.find_field("voltage_v").and_then(|f| f.comparator.tolerance()),
            Some(0.01)
        );
        assert_eq!(
            set.find_field("output_enabled").and_then(|f| f.default_value.clone()),
            Some(Value::Bool(true))
        );
    }

    #[test]
    fn channel_config_deserializes_mixed_values() {
        let config: ChannelConfig =
            toml::from_str("function = \"SIN\"\nfrequency_hz = 1000.0\nload = 50\nenabled = true")
                .unwrap();
        assert_eq!(config.get("function"), Some(&Value::from("SIN")));
        assert_eq!(config.get("frequency_hz"), Some(&Value::Number(1000.0)));
        assert_eq!(config.get("load"), Some(&Value::Number(50.0)));
        assert_eq!(config.get("enabled"), Some(&Value::Bool(true)));
    }
}
