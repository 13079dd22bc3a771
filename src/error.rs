//! Error types for the verification engine.
//!
//! The taxonomy mirrors how failures are handled at each layer:
//!
//! - **`TransportError`**: a single send/query failed at the communication layer.
//!   It always carries the operation and the offending command so diagnostics can
//!   point at the exact SCPI exchange that broke.
//! - **`ConfigurationError`**: a fail-fast error raised by configure. The remaining
//!   configuration steps are skipped and the error is surfaced to the caller.
//! - **`VerificationFieldError`**: one field could not be read back or parsed during
//!   verify. It never propagates; it is folded into a failing diagnostic line.
//! - **`CommandSetError`**: a command set is malformed (bad template, bad TOML,
//!   unknown instrument kind).
//! - **`VerifyError`**: the crate-wide error used at API boundaries. Using `#[from]`,
//!   every layer's error converts into it with the `?` operator.
//!
//! Monitors end on cancellation without an error. `VerifyError::Cancelled` is
//! for callers that abandon a pass before it produced a report.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate-wide error type.
pub type AppResult<T> = std::result::Result<T, VerifyError>;

/// The transport operation that was being attempted when an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Opening the underlying channel (TCP connect, serial open).
    Open,
    /// Writing a command that expects no response.
    Send,
    /// Writing a command and reading its response.
    Query,
    /// Releasing the underlying channel.
    Close,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Open => "open",
            Operation::Send => "send",
            Operation::Query => "query",
            Operation::Close => "close",
        };
        f.write_str(name)
    }
}

/// Underlying reason a transport call failed.
#[derive(Error, Debug)]
pub enum TransportCause {
    /// Socket or serial port error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No answer within the configured timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The transport was never opened or is already closed.
    #[error("not connected")]
    NotConnected,

    /// The instrument hung up.
    #[error("connection closed by peer")]
    Closed,

    /// The response bytes are not text.
    #[error("response is not valid UTF-8")]
    InvalidUtf8,

    /// The device (or simulator) rejected the call.
    #[error("{0}")]
    Device(String),
}

/// A send or query failed at the communication layer.
#[derive(Error, Debug)]
#[error("{operation} {command:?} failed: {cause}")]
pub struct TransportError {
    /// What was being attempted.
    pub operation: Operation,
    /// The command (or resource, for `Open`) that caused the failure.
    pub command: String,
    /// Why it failed.
    #[source]
    pub cause: TransportCause,
}

impl TransportError {
    /// Build an error for `operation` on `command`.
    pub fn new(operation: Operation, command: impl Into<String>, cause: TransportCause) -> Self {
        Self {
            operation,
            command: command.into(),
            cause,
        }
    }

    /// True if the call ran out of time rather than failing outright.
    pub fn is_timeout(&self) -> bool {
        matches!(self.cause, TransportCause::Timeout(_))
    }
}

/// Problems with a command set definition.
#[derive(Error, Debug)]
pub enum CommandSetError {
    /// A placeholder had no value.
    #[error("template {template:?} could not be rendered: {reason}")]
    Template {
        /// Template text.
        template: String,
        /// Renderer message.
        reason: String,
    },

    /// Structural problem, e.g. duplicate fields.
    #[error("invalid command set: {0}")]
    Invalid(String),

    /// TOML syntax or schema error.
    #[error("failed to parse command set TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML output error.
    #[error("failed to serialize command set: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// No built-in command set with this kind.
    #[error("unknown instrument kind '{0}'")]
    UnknownKind(String),
}

/// Fail-fast error raised while applying a configuration.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// A command failed; `step` names the field or housekeeping phase.
    #[error("configuration step '{step}' failed: {source}")]
    Transport {
        /// Field name, or `preamble`/`clear`/`reset`/`setup`.
        step: String,
        /// The failed call.
        #[source]
        source: TransportError,
    },

    /// The field has neither a configured value nor a default.
    #[error("no value supplied for field '{0}'")]
    MissingValue(String),

    /// The configured value does not fit the field.
    #[error("field '{field}' expects a {expected} value, got {actual}")]
    ValueKind {
        /// Field name.
        field: String,
        /// What the comparator accepts.
        expected: &'static str,
        /// What was configured.
        actual: String,
    },

    /// Bad command set.
    #[error(transparent)]
    CommandSet(#[from] CommandSetError),
}

/// Why a single field failed during verification.
#[derive(Error, Debug)]
pub enum VerificationFieldError {
    /// The readback query failed.
    #[error("query failed ({0})")]
    Query(#[source] TransportError),

    /// The response could not be converted.
    #[error("unparseable response {response:?}: {reason}")]
    Parse {
        /// Raw response.
        response: String,
        /// Why it did not parse.
        reason: String,
    },

    /// Nothing to compare against.
    #[error("no expected value configured")]
    MissingExpected,

    /// The expected value does not fit the comparator.
    #[error("expected value {0} does not fit the field's comparator")]
    ExpectedKind(String),

    /// Bad command set.
    #[error(transparent)]
    CommandSet(#[from] CommandSetError),
}

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum VerifyError {
    /// Loading the configuration failed.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// The configuration loaded but is inconsistent.
    #[error("Configuration validation error: {0}")]
    ConfigValidation(String),

    /// Communication failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Configure pass failure.
    #[error(transparent)]
    Configure(#[from] ConfigurationError),

    /// Bad command set.
    #[error(transparent)]
    CommandSet(#[from] CommandSetError),

    /// File access failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The session was used after close.
    #[error("Session is closed")]
    SessionClosed,

    /// Abandoned on request before producing a result.
    #[error("Cancelled before completion")]
    Cancelled,

    /// The monitor worker task panicked or was already stopped.
    #[error("Monitor worker failed: {0}")]
    Worker(String),

    /// A marker or trace read-out was unusable.
    #[error("Acquisition failed: {0}")]
    Acquisition(String),

    /// The binary was built without a needed cargo feature.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl VerifyError {
    /// True for [`VerifyError::Cancelled`].
    pub fn is_cancellation(&self) -> bool {
        matches!(self, VerifyError::Cancelled)
    }
}
