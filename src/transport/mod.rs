//! Instrument transports.
//!
//! A [`Transport`] is an opaque request/response text channel to one device.
//! SCPI is not parsed here: a command is a string, a response is a string, and
//! every call may fail with a [`TransportError`] naming the command.
//!
//! Implementations:
//! - [`LineTransport`]: line-oriented SCPI over TCP sockets or serial ports
//! - [`Logged`]: wraps any transport and echoes `>> CMD` / `<< RESP`
//! - [`SimulatedInstrument`]: in-memory device for tests and dry runs

mod line;
mod logged;
mod simulated;

pub use line::LineTransport;
pub use logged::Logged;
pub use simulated::SimulatedInstrument;

use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;

/// Request/response channel to one instrument.
///
/// No retries happen at this layer.
#[async_trait]
pub trait Transport: Send {
    /// Send a command that produces no response.
    async fn send(&mut self, command: &str) -> Result<(), TransportError>;

    /// Send a command and return its (trimmed) response.
    async fn query(&mut self, command: &str) -> Result<String, TransportError>;

    /// Release the underlying channel. Calling it twice is harmless.
    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Short human-readable description, e.g. `tcp://10.0.0.5:5025`.
    fn describe(&self) -> String;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&mut self, command: &str) -> Result<(), TransportError> {
        (**self).send(command).await
    }

    async fn query(&mut self, command: &str) -> Result<String, TransportError> {
        (**self).query(command).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        (**self).close().await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Framing and timeout settings for line-oriented transports.
///
/// Defaults: write terminator `"\n"`, read terminator `b'\n'`, timeout 5 s,
/// drain window 250 ms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    /// Appended to every command written.
    pub write_terminator: String,
    /// Byte that ends a response.
    pub read_terminator: u8,
    /// Bound on each write and each response read.
    pub timeout: Duration,
    /// After a response timed out, how long to wait for its late arrival
    /// before the next command is written.
    pub drain_window: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            write_terminator: "\n".to_string(),
            read_terminator: b'\n',
            timeout: Duration::from_secs(5),
            drain_window: Duration::from_millis(250),
        }
    }
}

impl TransportSettings {
    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the command terminator, e.g. `"\r\n"`.
    pub fn with_write_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.write_terminator = terminator.into();
        self
    }

    /// Set the response terminator byte.
    pub fn with_read_terminator(mut self, terminator: u8) -> Self {
        self.read_terminator = terminator;
        self
    }

    /// Set the late-response drain window.
    pub fn with_drain_window(mut self, window: Duration) -> Self {
        self.drain_window = window;
        self
    }
}
