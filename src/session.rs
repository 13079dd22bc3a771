//! Instrument sessions.
//!
//! A [`Session`] owns one transport and one command set. It tracks the
//! lifecycle
//!
//! ```text
//! Closed -> Open -> Configuring -> Verifying -> (Verifying | Idle)* -> Closing -> Closed
//! ```
//!
//! and guarantees that [`Session::close`] leaves the instrument in its safe
//! state (outputs off) before the transport is released. Close never fails:
//! shutdown problems are logged and kept on the session.

use crate::command_set::{ChannelConfig, CommandSet, TemplateVars};
use crate::engine::{self, ConfigureOptions, VerifyOptions};
use crate::error::{AppResult, TransportError, VerifyError};
use crate::report::VerificationReport;
use crate::transport::Transport;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport released.
    Closed,
    /// Opened, nothing applied yet.
    Open,
    /// A configure pass is running (or was abandoned mid-way).
    Configuring,
    /// A verify pass is running.
    Verifying,
    /// Between passes.
    Idle,
    /// Running the shutdown sequence.
    Closing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Closed => "closed",
            SessionState::Open => "open",
            SessionState::Configuring => "configuring",
            SessionState::Verifying => "verifying",
            SessionState::Idle => "idle",
            SessionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// One open connection to one instrument.
pub struct Session<T: Transport> {
    transport: Option<T>,
    command_set: Arc<CommandSet>,
    channel: String,
    state: SessionState,
    identity: Option<String>,
    shutdown_errors: Vec<TransportError>,
}

impl<T: Transport> Session<T> {
    /// Take ownership of an open transport.
    pub fn open(transport: T, command_set: Arc<CommandSet>) -> Self {
        info!(
            "Opened {} session on {}",
            command_set.kind,
            transport.describe()
        );
        let channel = command_set.default_channel.clone();
        Self {
            transport: Some(transport),
            command_set,
            channel,
            state: SessionState::Open,
            identity: None,
            shutdown_errors: Vec::new(),
        }
    }

    /// Address a different channel (`{channel}` in templates).
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// False once closed.
    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// The command set in use.
    pub fn command_set(&self) -> &Arc<CommandSet> {
        &self.command_set
    }

    /// Channel substituted into templates.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// `*IDN?` response, once [`Session::identify`] has run.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Failures seen while closing. Empty if the last close was clean.
    pub fn shutdown_errors(&self) -> &[TransportError] {
        &self.shutdown_errors
    }

    /// Variables available to this session's templates.
    pub fn template_vars(&self) -> TemplateVars {
        TemplateVars::from([("channel".to_string(), self.channel.clone())])
    }

    fn transport(&mut self) -> AppResult<&mut T> {
        self.transport.as_mut().ok_or(VerifyError::SessionClosed)
    }

    /// Query `*IDN?` and remember the answer.
    pub async fn identify(&mut self) -> AppResult<String> {
        let identity = self.transport()?.query("*IDN?").await?;
        info!("Instrument identity: {}", identity);
        self.identity = Some(identity.clone());
        Ok(identity)
    }

    /// Apply `config`; see [`engine::configure`].
    pub async fn configure(
        &mut self,
        config: &ChannelConfig,
        options: &ConfigureOptions,
    ) -> AppResult<()> {
        let vars = self.template_vars();
        let transport = self.transport.as_mut().ok_or(VerifyError::SessionClosed)?;
        self.state = SessionState::Configuring;
        let result = engine::configure(transport, &self.command_set, &vars, config, options).await;
        self.state = SessionState::Idle;
        result.map_err(VerifyError::from)
    }

    /// Read back and compare; see [`engine::verify`].
    ///
    /// Fails only if the session is closed.
    pub async fn verify(
        &mut self,
        config: &ChannelConfig,
        options: &VerifyOptions,
    ) -> AppResult<VerificationReport> {
        let vars = self.template_vars();
        let transport = self.transport.as_mut().ok_or(VerifyError::SessionClosed)?;
        self.state = SessionState::Verifying;
        let report = engine::verify(transport, &self.command_set, &vars, config, options).await;
        self.state = SessionState::Idle;
        Ok(report)
    }

    /// Send a raw command.
    pub async fn send(&mut self, command: &str) -> AppResult<()> {
        self.transport()?.send(command).await?;
        Ok(())
    }

    /// Send a raw query.
    pub async fn query(&mut self, command: &str) -> AppResult<String> {
        Ok(self.transport()?.query(command).await?)
    }

    /// Put the instrument in its safe state and release the transport.
    ///
    /// Every shutdown command is attempted even if earlier ones fail. Failures
    /// are logged and kept in [`Session::shutdown_errors`]. Closing a closed
    /// session does nothing.
    pub async fn close(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        let previous = self.state;
        self.state = SessionState::Closing;
        self.shutdown_errors.clear();
        info!(
            "Closing {} session on {} (was {})",
            self.command_set.kind,
            transport.describe(),
            previous
        );

        let vars = self.template_vars();
        for template in &self.command_set.shutdown_commands {
            let command = match template.render(&vars) {
                Ok(command) => command,
                Err(e) => {
                    warn!("Skipping shutdown command: {}", e);
                    continue;
                }
            };
            if let Err(e) = transport.send(&command).await {
                warn!("Shutdown command failed: {}", e);
                self.shutdown_errors.push(e);
            }
        }
        if let Err(e) = transport.close().await {
            warn!("Closing transport failed: {}", e);
            self.shutdown_errors.push(e);
        }
        self.state = SessionState::Closed;
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        if let Some(transport) = &self.transport {
            warn!(
                "Session on {} dropped without close; outputs were not switched off",
                transport.describe()
            );
        }
    }
}
