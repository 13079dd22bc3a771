//! In-memory SCPI responder.
//!
//! `HEADER value` commands store `value` under the header; `HEADER?` queries
//! answer with the stored value. Headers are compared in SCPI short form, so
//! `OUTPut1:STATe OFF` and `OUTP1:STAT?` address the same register, and
//! `ON`/`OFF` arguments are stored as `1`/`0` the way real instruments echo
//! them back.
//!
//! A handle is cheap to clone: tests keep one clone to script the device and
//! hand the other to a session.

use super::Transport;
use crate::error::{Operation, TransportCause, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

const NO_ERROR: &str = "0,\"No error\"";
const UNDEFINED_HEADER: &str = "-113,\"Undefined header\"";

#[derive(Debug)]
struct SimState {
    name: String,
    identity: String,
    registers: HashMap<String, String>,
    overrides: HashMap<String, String>,
    failures: HashSet<String>,
    error_queue: VecDeque<String>,
    commands: Vec<String>,
    latency: Duration,
    timeout: Duration,
    disconnected: bool,
    closed: bool,
    close_count: usize,
}

/// Simulated instrument for tests and `--simulate` runs.
#[derive(Debug, Clone)]
pub struct SimulatedInstrument {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedInstrument {
    fn default() -> Self {
        Self::new()
    }
}

/// Reduce a command header to SCPI short form: `:OUTPut1:STATe` -> `OUTP1:STAT`.
fn short_form(header: &str) -> String {
    header
        .trim_start_matches(':')
        .split(':')
        .map(|node| {
            let mixed = node.chars().any(|c| c.is_ascii_lowercase())
                && node.chars().any(|c| c.is_ascii_uppercase());
            if mixed {
                node.chars()
                    .filter(|c| !c.is_ascii_lowercase())
                    .collect::<String>()
            } else {
                node.to_ascii_uppercase()
            }
        })
        .collect::<Vec<_>>()
        .join(":")
}

/// Split a command into its short-form header and argument.
fn split_command(command: &str) -> (String, Option<String>) {
    let command = command.trim();
    match command.split_once(char::is_whitespace) {
        Some((header, arg)) => (short_form(header), Some(arg.trim().to_string())),
        None => (short_form(command), None),
    }
}

fn stored_value(arg: &str) -> String {
    match arg.to_ascii_uppercase().as_str() {
        "ON" => "1".to_string(),
        "OFF" => "0".to_string(),
        _ => arg.to_string(),
    }
}

impl SimulatedInstrument {
    /// Device with empty registers and an empty error queue.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                name: "simulated".to_string(),
                identity: "SCPI-VERIFY,SIMULATED,0,1.0".to_string(),
                registers: HashMap::new(),
                overrides: HashMap::new(),
                failures: HashSet::new(),
                error_queue: VecDeque::new(),
                commands: Vec::new(),
                latency: Duration::ZERO,
                timeout: Duration::from_secs(5),
                disconnected: false,
                closed: false,
                close_count: 0,
            })),
        }
    }

    /// Name shown by [`Transport::describe`] and in the `*IDN?` model field.
    pub fn named(self, name: &str) -> Self {
        {
            let mut state = self.state.lock();
            state.name = name.to_string();
            state.identity = format!("SCPI-VERIFY,{},0,1.0", name.to_ascii_uppercase());
        }
        self
    }

    /// Delay applied to every call before it is answered.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().latency = latency;
        self
    }

    /// Store a register value as if it had been set by a command.
    pub fn set_register(&self, header: &str, value: &str) {
        self.state
            .lock()
            .registers
            .insert(short_form(header), stored_value(value));
    }

    /// Current register value, if any.
    pub fn register(&self, header: &str) -> Option<String> {
        self.state.lock().registers.get(&short_form(header)).cloned()
    }

    /// Answer `query` with `response` regardless of register state.
    pub fn override_response(&self, query: &str, response: &str) {
        let (header, _) = split_command(query);
        self.state
            .lock()
            .overrides
            .insert(header, response.to_string());
    }

    /// Remove a scripted response.
    pub fn clear_override(&self, query: &str) {
        let (header, _) = split_command(query);
        self.state.lock().overrides.remove(&header);
    }

    /// Make every command with this header time out.
    ///
    /// Queries and sends are distinguished by the trailing `?`.
    pub fn fail_on(&self, header: &str) {
        let (header, _) = split_command(header);
        self.state.lock().failures.insert(header);
    }

    /// Undo [`SimulatedInstrument::fail_on`].
    pub fn clear_failure(&self, header: &str) {
        let (header, _) = split_command(header);
        self.state.lock().failures.remove(&header);
    }

    /// Simulate a pulled cable: every later call fails.
    pub fn disconnect(&self) {
        self.state.lock().disconnected = true;
    }

    /// Queue an entry for the error query.
    pub fn push_error(&self, entry: &str) {
        self.state.lock().error_queue.push_back(entry.to_string());
    }

    /// Every command received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    /// Forget the command log.
    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    /// Number of times the transport was closed.
    pub fn close_count(&self) -> usize {
        self.state.lock().close_count
    }

    fn handle(&self, operation: Operation, command: &str) -> Result<Option<String>, TransportError> {
        let mut state = self.state.lock();
        state.commands.push(command.to_string());

        let fail = |cause| Err(TransportError::new(operation, command, cause));
        if state.disconnected {
            return fail(TransportCause::Closed);
        }
        if state.closed {
            return fail(TransportCause::NotConnected);
        }

        let (header, arg) = split_command(command);
        if state.failures.contains(&header) {
            return fail(TransportCause::Timeout(state.timeout));
        }

        // Overrides also answer bare-header queries such as `SPSWP1`.
        if operation == Operation::Query {
            if let Some(response) = state.overrides.get(&header) {
                return Ok(Some(response.clone()));
            }
        }
        if let Some(query) = header.strip_suffix('?') {
            let response = match query {
                "*IDN" => Some(state.identity.clone()),
                "*OPC" => Some("1".to_string()),
                "SYST:ERR" => Some(
                    state
                        .error_queue
                        .pop_front()
                        .unwrap_or_else(|| NO_ERROR.to_string()),
                ),
                _ => state.registers.get(query).cloned(),
            };
            return match response {
                Some(response) => Ok(Some(response)),
                None => {
                    state.error_queue.push_back(UNDEFINED_HEADER.to_string());
                    fail(TransportCause::Timeout(state.timeout))
                }
            };
        }

        match (header.as_str(), arg) {
            ("*RST", _) => state.registers.clear(),
            ("*CLS", _) => state.error_queue.clear(),
            (_, Some(arg)) => {
                state.registers.insert(header.clone(), stored_value(&arg));
            }
            // Bare headers such as ABOR or INIT:IMM are events with nothing to store.
            _ => {}
        }
        Ok(None)
    }

    async fn delay(&self) {
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl Transport for SimulatedInstrument {
    async fn send(&mut self, command: &str) -> Result<(), TransportError> {
        self.delay().await;
        self.handle(Operation::Send, command).map(|_| ())
    }

    async fn query(&mut self, command: &str) -> Result<String, TransportError> {
        self.delay().await;
        match self.handle(Operation::Query, command)? {
            Some(response) => Ok(response),
            None => Err(TransportError::new(
                Operation::Query,
                command,
                TransportCause::Device("command produced no response".to_string()),
            )),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.close_count += 1;
        state.closed = true;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sim://{}", self.state.lock().name)
    }
}
