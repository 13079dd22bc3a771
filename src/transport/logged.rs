//! Command echo for debugging sessions.

use super::Transport;
use crate::error::TransportError;
use async_trait::async_trait;
use tracing::{info, warn};

/// Wraps a transport and logs every exchange: `>> CMD` for commands,
/// `<< RESP` for responses.
pub struct Logged<T> {
    inner: T,
}

impl<T: Transport> Logged<T> {
    /// Echo all traffic of `inner`.
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Unwrap the inner transport.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for Logged<T> {
    async fn send(&mut self, command: &str) -> Result<(), TransportError> {
        info!(target: "scpi_verify::wire", ">> {}", command);
        self.inner.send(command).await.inspect_err(|e| {
            warn!(target: "scpi_verify::wire", "!! {}", e);
        })
    }

    async fn query(&mut self, command: &str) -> Result<String, TransportError> {
        info!(target: "scpi_verify::wire", ">> {}", command);
        match self.inner.query(command).await {
            Ok(response) => {
                info!(target: "scpi_verify::wire", "<< {}", response);
                Ok(response)
            }
            Err(e) => {
                warn!(target: "scpi_verify::wire", "!! {}", e);
                Err(e)
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.close().await
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SimulatedInstrument;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn echoes_commands_and_responses() {
        let mut transport = Logged::new(SimulatedInstrument::new());
        transport.send("SOUR1:FREQ 1000").await.unwrap();
        let response = transport.query("SOUR1:FREQ?").await.unwrap();

        assert_eq!(response, "1000");
        assert!(logs_contain(">> SOUR1:FREQ 1000"));
        assert!(logs_contain("<< 1000"));
    }
}
