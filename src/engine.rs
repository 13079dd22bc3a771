//! Configure-verify engine.
//!
//! Both passes walk the same [`CommandSet`] field list:
//!
//! - [`configure`] sends the housekeeping commands and every field's set
//!   command, then waits for the instrument to settle. It stops at the first
//!   failure and leaves the instrument in whatever partial state it reached.
//! - [`verify`] queries every field back, compares it with the expected value,
//!   and finishes with one error-queue query. It never fails: every problem
//!   becomes part of the returned [`VerificationReport`].

use crate::command_set::{ChannelConfig, CommandSet, ErrorQuery, TemplateVars};
use crate::error::{ConfigurationError, VerificationFieldError};
use crate::report::{DiagnosticLine, ReportBuilder, VerificationReport};
use crate::transport::Transport;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Options for [`configure`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigureOptions {
    /// Send the command set's reset command before configuring.
    pub reset: bool,
    /// Wait after the reset command.
    pub reset_settle: Duration,
    /// Wait after the last set command, before any verification.
    pub settle: Duration,
}

impl Default for ConfigureOptions {
    fn default() -> Self {
        Self {
            reset: false,
            reset_settle: Duration::from_secs(1),
            settle: Duration::from_millis(200),
        }
    }
}

impl ConfigureOptions {
    /// Request a reset before configuring.
    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    /// Override the settle delay.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Override the post-reset delay.
    pub fn with_reset_settle(mut self, reset_settle: Duration) -> Self {
        self.reset_settle = reset_settle;
        self
    }
}

/// Options for [`verify`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerifyOptions {
    /// Per-field numeric tolerances replacing the command set's.
    pub tolerance_overrides: HashMap<String, f64>,
}

impl VerifyOptions {
    /// Override the tolerance of one numeric field.
    pub fn with_tolerance(mut self, field: &str, tolerance: f64) -> Self {
        self.tolerance_overrides.insert(field.to_string(), tolerance);
        self
    }
}

async fn send_step<T: Transport + ?Sized>(
    transport: &mut T,
    step: &str,
    command: &str,
) -> Result<(), ConfigurationError> {
    transport
        .send(command)
        .await
        .map_err(|source| ConfigurationError::Transport {
            step: step.to_string(),
            source,
        })
}

async fn query_step<T: Transport + ?Sized>(
    transport: &mut T,
    step: &str,
    command: &str,
) -> Result<String, ConfigurationError> {
    transport
        .query(command)
        .await
        .map_err(|source| ConfigurationError::Transport {
            step: step.to_string(),
            source,
        })
}

/// Apply `config` to the instrument.
///
/// All set commands are rendered before anything is sent, so a missing or
/// ill-typed value fails without touching the instrument.
pub async fn configure<T: Transport + ?Sized>(
    transport: &mut T,
    set: &CommandSet,
    vars: &TemplateVars,
    config: &ChannelConfig,
    options: &ConfigureOptions,
) -> Result<(), ConfigurationError> {
    let mut settings = Vec::with_capacity(set.fields.len());
    for field in &set.fields {
        let Some(template) = &field.set_command else {
            continue;
        };
        let value = field
            .expected(config)
            .ok_or_else(|| ConfigurationError::MissingValue(field.name.clone()))?;
        let setpoint = field.comparator.setpoint(&field.name, value)?;
        settings.push((field.name.as_str(), template.render_with_value(vars, &setpoint)?));
    }
    let sync = set.sync_query.as_ref().map(|q| q.render(vars)).transpose()?;

    info!("Configuring {} via {}", set.kind, transport.describe());

    for command in &set.preamble {
        send_step(transport, "preamble", &command.render(vars)?).await?;
    }
    if let Some(clear) = &set.clear_command {
        send_step(transport, "clear", &clear.render(vars)?).await?;
    }
    if options.reset {
        if let Some(reset) = &set.reset_command {
            send_step(transport, "reset", &reset.render(vars)?).await?;
            sleep(options.reset_settle).await;
            // A reset may deselect the channel.
            for command in &set.preamble {
                send_step(transport, "preamble", &command.render(vars)?).await?;
            }
        } else {
            warn!("Command set '{}' has no reset command; skipping reset", set.kind);
        }
    }
    for command in &set.setup_commands {
        send_step(transport, "setup", &command.render(vars)?).await?;
    }
    for (step, command) in &settings {
        debug!("Setting {}: {}", step, command);
        send_step(transport, step, command).await?;
        if let Some(sync) = &sync {
            query_step(transport, step, sync).await?;
        }
    }

    if !options.settle.is_zero() {
        debug!("Settling for {:?}", options.settle);
        sleep(options.settle).await;
    }
    Ok(())
}

/// Read every field back and compare it with `config`.
pub async fn verify<T: Transport + ?Sized>(
    transport: &mut T,
    set: &CommandSet,
    vars: &TemplateVars,
    config: &ChannelConfig,
    options: &VerifyOptions,
) -> VerificationReport {
    let mut report = ReportBuilder::default();

    for template in &set.preamble {
        let sent = match template.render(vars) {
            Ok(command) => transport.send(&command).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(failure) = sent {
            warn!("Verify preamble failed: {}", failure);
            report.transport_failure(failure);
        }
    }

    for field in &set.fields {
        let label = field.label();
        let Some(expected) = field.expected(config) else {
            report.line(DiagnosticLine::failed(
                &field.name,
                label,
                None,
                VerificationFieldError::MissingExpected.to_string(),
            ));
            continue;
        };
        let rendered_expected = Some(expected.to_string());

        let command = match field.query_command.render(vars) {
            Ok(command) => command,
            Err(e) => {
                let err = VerificationFieldError::from(e);
                report.line(DiagnosticLine::failed(&field.name, label, rendered_expected, err.to_string()));
                continue;
            }
        };

        let response = match transport.query(&command).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Readback of {} failed: {}", field.name, e);
                report.transport_failure(e.to_string());
                let err = VerificationFieldError::Query(e);
                report.line(DiagnosticLine::failed(&field.name, label, rendered_expected, err.to_string()));
                continue;
            }
        };

        let tolerance = options.tolerance_overrides.get(&field.name).copied();
        match field
            .comparator
            .compare(&response, expected, tolerance, field.unit.as_deref())
        {
            Ok(outcome) => {
                debug!(
                    "{}: {} vs {} -> {}",
                    field.name,
                    outcome.actual,
                    outcome.expected,
                    if outcome.passed { "OK" } else { "NG" }
                );
                report.line(DiagnosticLine::compared(
                    &field.name,
                    label,
                    outcome.actual,
                    outcome.expected,
                    outcome.passed,
                ));
            }
            Err(e) => {
                report.line(DiagnosticLine::failed(&field.name, label, rendered_expected, e.to_string()));
            }
        }
    }

    if let Some(error_query) = &set.error_query {
        match error_query.command.render(vars) {
            Ok(command) => match transport.query(&command).await {
                Ok(response) => {
                    let no_error = ErrorQuery::is_no_error(&response);
                    if !no_error {
                        warn!("Instrument reported an error: {}", response);
                    }
                    report.error_queue(command, Some(response), no_error);
                }
                Err(e) => {
                    warn!("Error queue query failed: {}", e);
                    report.transport_failure(e.to_string());
                    report.error_queue(command, None, false);
                }
            },
            Err(e) => {
                report.transport_failure(e.to_string());
                report.error_queue(error_query.command.to_string(), None, false);
            }
        }
    }

    let report = report.finish();
    info!("Verification of {}: {}", set.kind, report.summary());
    report
}
