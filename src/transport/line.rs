//! Line-oriented SCPI transport over any async byte stream.

use super::{Transport, TransportSettings};
use crate::error::{Operation, TransportCause, TransportError};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Commands are written with the configured terminator; responses are read up
/// to the read terminator and trimmed.
///
/// A response that times out may still arrive later. Before the next command
/// is written, anything the instrument sends within
/// [`TransportSettings::drain_window`] is read and discarded, so every query
/// gets its own answer.
///
/// # Example
/// ```no_run
/// # async fn example() -> Result<(), scpi_verify::error::TransportError> {
/// use scpi_verify::transport::{LineTransport, Transport, TransportSettings};
///
/// let mut psu = LineTransport::connect_tcp("192.168.99.20", 5025, TransportSettings::default()).await?;
/// let idn = psu.query("*IDN?").await?;
/// # Ok(())
/// # }
/// ```
pub struct LineTransport<S> {
    stream: Option<BufReader<S>>,
    settings: TransportSettings,
    description: String,
    stale: bool,
}

impl<S> LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already-open stream.
    pub fn new(stream: S, settings: TransportSettings, description: impl Into<String>) -> Self {
        Self {
            stream: Some(BufReader::new(stream)),
            settings,
            description: description.into(),
            stale: false,
        }
    }

    /// Settings in effect.
    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// False once [`Transport::close`] has run.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Read and drop responses that arrived after their query timed out.
    async fn discard_stale_input(&mut self) {
        if !self.stale {
            return;
        }
        self.stale = false;
        let window = self.settings.drain_window;
        let terminator = self.settings.read_terminator;
        let Some(stream) = self.stream.as_mut() else {
            return;
        };

        let mut discarded = 0usize;
        loop {
            let mut buf = Vec::new();
            match timeout(window, stream.read_until(terminator, &mut buf)).await {
                Ok(Ok(n)) if n > 0 => {
                    discarded += 1;
                    debug!(
                        "Discarding late response {:?} on {}",
                        String::from_utf8_lossy(&buf).trim(),
                        self.description
                    );
                }
                Ok(_) => break,
                Err(_) => {
                    // Half a line is still in flight.
                    self.stale = !buf.is_empty();
                    break;
                }
            }
        }
        if discarded > 0 {
            warn!("Discarded {} late response(s) on {}", discarded, self.description);
        }
    }

    async fn write_line(&mut self, operation: Operation, command: &str) -> Result<(), TransportError> {
        self.discard_stale_input().await;
        let limit = self.settings.timeout;
        let line = format!("{command}{}", self.settings.write_terminator);
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| TransportError::new(operation, command, TransportCause::NotConnected))?;

        let write = async {
            let writer = stream.get_mut();
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        match timeout(limit, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::new(operation, command, e.into())),
            Err(_) => Err(TransportError::new(
                operation,
                command,
                TransportCause::Timeout(limit),
            )),
        }
    }

    async fn read_line(&mut self, command: &str) -> Result<String, TransportError> {
        let limit = self.settings.timeout;
        let terminator = self.settings.read_terminator;
        let stream = self.stream.as_mut().ok_or_else(|| {
            TransportError::new(Operation::Query, command, TransportCause::NotConnected)
        })?;

        let mut buf = Vec::new();
        let read = match timeout(limit, stream.read_until(terminator, &mut buf)).await {
            Ok(read) => read,
            Err(_) => {
                self.stale = true;
                return Err(TransportError::new(
                    Operation::Query,
                    command,
                    TransportCause::Timeout(limit),
                ));
            }
        };
        match read {
            Ok(0) => Err(TransportError::new(
                Operation::Query,
                command,
                TransportCause::Closed,
            )),
            Ok(_) => {
                let text = String::from_utf8(buf).map_err(|_| {
                    TransportError::new(Operation::Query, command, TransportCause::InvalidUtf8)
                })?;
                Ok(text
                    .trim_matches(|c: char| c.is_whitespace() || c == char::from(terminator))
                    .to_string())
            }
            Err(e) => Err(TransportError::new(Operation::Query, command, e.into())),
        }
    }
}

impl LineTransport<TcpStream> {
    /// Open a raw-socket SCPI connection, e.g. port 5025 or the Apex OSA's 5900.
    pub async fn connect_tcp(
        host: &str,
        port: u16,
        settings: TransportSettings,
    ) -> Result<Self, TransportError> {
        let address = format!("{host}:{port}");
        let stream = match timeout(settings.timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(TransportError::new(Operation::Open, &address, e.into())),
            Err(_) => {
                return Err(TransportError::new(
                    Operation::Open,
                    &address,
                    TransportCause::Timeout(settings.timeout),
                ))
            }
        };
        stream
            .set_nodelay(true)
            .map_err(|e| TransportError::new(Operation::Open, &address, e.into()))?;
        info!("Connected to tcp://{}", address);
        Ok(Self::new(stream, settings, format!("tcp://{address}")))
    }
}

#[cfg(feature = "serial")]
impl LineTransport<tokio_serial::SerialStream> {
    /// Open an RS-232 / USB-serial instrument.
    pub fn open_serial(
        path: &str,
        baud_rate: u32,
        settings: TransportSettings,
    ) -> Result<Self, TransportError> {
        use tokio_serial::SerialPortBuilderExt;

        let stream = tokio_serial::new(path, baud_rate)
            .timeout(settings.timeout)
            .open_native_async()
            .map_err(|e| {
                TransportError::new(Operation::Open, path, std::io::Error::from(e).into())
            })?;
        info!("Opened serial port {} at {} baud", path, baud_rate);
        Ok(Self::new(stream, settings, format!("serial://{path}")))
    }
}

#[async_trait]
impl<S> Transport for LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, command: &str) -> Result<(), TransportError> {
        self.write_line(Operation::Send, command).await
    }

    async fn query(&mut self, command: &str) -> Result<String, TransportError> {
        self.write_line(Operation::Query, command).await?;
        self.read_line(command).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        debug!("Closing {}", self.description);
        stream
            .get_mut()
            .shutdown()
            .await
            .map_err(|e| TransportError::new(Operation::Close, &self.description, e.into()))
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}
