//! Mock SCPI instrument.
//!
//! Provides a simulated instrument for testing without physical hardware and for
//! the `--simulate` mode of the binary.
//!
//! # Behaviour
//!
//! - A write `KEY VALUE` stores `VALUE` under `KEY` (compound commands are split on
//!   `;`). A query `KEY?` answers the stored value.
//! - Keys are normalised: surrounding whitespace and a leading `:` are removed and
//!   the rest is upper-cased, so `:TRAC:POIN` and `trac:poin` are the same register.
//! - Responders override registers for computed replies (e.g. `READ?`).
//! - `SYST:ERR?` / `:SYSTem:ERRor?` pop the injected error queue and answer
//!   `0,"No error"` when it is empty.
//! - A query with neither a responder nor a register fails with
//!   [`DaqError::Transport`], as a real bus timeout would.
//! - Every call is logged with its (tokio) timestamp so tests can assert on
//!   ordering and delays.
//!
//! # Example
//!
//! ```rust,ignore
//! let source = Arc::new(MockScpiTransport::new("GPIB::1"));
//! let meter = Arc::new(
//!     MockScpiTransport::new("GPIB::25").with_responder("READ", ohmic_load(source.clone(), 1e3)),
//! );
//! ```

use crate::error::{AppResult, DaqError};
use crate::hardware::reply::parse_numeric;
use crate::hardware::transport::ScpiTransport;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::trace;

/// Computed reply for a query.
pub type Responder = Arc<dyn Fn() -> String + Send + Sync>;

/// One recorded exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// A command written.
    Write(String),
    /// A query issued.
    Query(String),
}

impl MockCall {
    /// Command text of the call.
    pub fn command(&self) -> &str {
        match self {
            MockCall::Write(cmd) | MockCall::Query(cmd) => cmd,
        }
    }
}

#[derive(Default)]
struct MockState {
    registers: HashMap<String, String>,
    responders: HashMap<String, Responder>,
    errors: VecDeque<(i32, String)>,
    failing: Vec<String>,
    calls: Vec<(Instant, MockCall)>,
}

/// In-memory SCPI register bank implementing [`ScpiTransport`].
pub struct MockScpiTransport {
    address: String,
    state: Mutex<MockState>,
}

/// Normalise a register key.
pub fn register_key(raw: &str) -> String {
    raw.trim()
        .trim_start_matches(':')
        .trim_end_matches('?')
        .trim()
        .to_ascii_uppercase()
}

fn is_error_query(key: &str) -> bool {
    matches!(key, "SYST:ERR" | "SYSTEM:ERROR" | "SYST:ERR:NEXT" | "SYSTEM:ERROR:NEXT")
}

impl MockScpiTransport {
    /// Create an empty instrument at `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Builder form of [`set_register`](Self::set_register).
    pub fn with_register(self, key: &str, value: impl Into<String>) -> Self {
        self.set_register(key, value);
        self
    }

    /// Builder form of [`set_responder`](Self::set_responder).
    pub fn with_responder(self, key: &str, responder: Responder) -> Self {
        self.set_responder(key, responder);
        self
    }

    /// Store `value` as the reply to `key?`.
    pub fn set_register(&self, key: &str, value: impl Into<String>) {
        self.state().registers.insert(register_key(key), value.into());
    }

    /// Answer `key?` by calling `responder`.
    pub fn set_responder(&self, key: &str, responder: Responder) {
        self.state().responders.insert(register_key(key), responder);
    }

    /// Current content of a register.
    pub fn register(&self, key: &str) -> Option<String> {
        self.state().registers.get(&register_key(key)).cloned()
    }

    /// Queue an entry on the instrument error queue.
    pub fn push_error(&self, code: i32, message: impl Into<String>) {
        self.state().errors.push_back((code, message.into()));
    }

    /// Make every write containing `pattern` fail with a transport error.
    pub fn fail_writes_matching(&self, pattern: impl Into<String>) {
        self.state().failing.push(pattern.into());
    }

    /// All calls in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.iter().map(|(_, call)| call.clone()).collect()
    }

    /// All calls with the instant they were made.
    pub fn timed_calls(&self) -> Vec<(Instant, MockCall)> {
        self.state().calls.clone()
    }

    /// Commands written, in order.
    pub fn writes(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|(_, call)| match call {
                MockCall::Write(cmd) => Some(cmd.clone()),
                MockCall::Query(_) => None,
            })
            .collect()
    }

    /// Queries issued, in order.
    pub fn queries(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|(_, call)| match call {
                MockCall::Query(cmd) => Some(cmd.clone()),
                MockCall::Write(_) => None,
            })
            .collect()
    }

    /// Number of writes exactly equal to `command`.
    pub fn count_writes(&self, command: &str) -> usize {
        self.writes().iter().filter(|cmd| *cmd == command).count()
    }

    /// Number of writes starting with `prefix`.
    pub fn count_writes_matching(&self, prefix: &str) -> usize {
        self.writes()
            .iter()
            .filter(|cmd| cmd.starts_with(prefix))
            .count()
    }

    /// Forget recorded calls, keeping registers.
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }
}

#[async_trait]
impl ScpiTransport for MockScpiTransport {
    async fn write(&self, command: &str) -> AppResult<()> {
        let mut state = self.state();
        state
            .calls
            .push((Instant::now(), MockCall::Write(command.to_string())));
        if state.failing.iter().any(|p| command.contains(p.as_str())) {
            return Err(DaqError::Transport(format!(
                "{}: write '{command}' failed",
                self.address
            )));
        }
        for part in command.split(';') {
            let part = part.trim();
            if let Some((key, value)) = part.split_once(char::is_whitespace) {
                state
                    .registers
                    .insert(register_key(key), value.trim().to_string());
            }
        }
        trace!(address = %self.address, command, "mock write");
        Ok(())
    }

    async fn query(&self, command: &str) -> AppResult<String> {
        let key = register_key(command);
        let responder = {
            let mut state = self.state();
            state
                .calls
                .push((Instant::now(), MockCall::Query(command.to_string())));
            if is_error_query(&key) {
                let (code, message) = state
                    .errors
                    .pop_front()
                    .unwrap_or_else(|| (0, "No error".to_string()));
                return Ok(format!("{code},\"{message}\""));
            }
            match state.responders.get(&key) {
                Some(responder) => Some(responder.clone()),
                None => {
                    return state.registers.get(&key).cloned().ok_or_else(|| {
                        DaqError::Transport(format!(
                            "{}: no reply to '{command}'",
                            self.address
                        ))
                    })
                }
            }
        };
        // Responders may inspect other mocks, so the lock is released first.
        Ok(responder.map(|r| r()).unwrap_or_default())
    }

    fn address(&self) -> &str {
        &self.address
    }
}

/// Voltage reply of a resistor of `ohms` driven by the current last written to
/// `source` (register `CURRENT`), in instrument exponent notation.
pub fn ohmic_load(source: Arc<MockScpiTransport>, ohms: f64) -> Responder {
    Arc::new(move || {
        let amps = source
            .register("CURRent")
            .and_then(|raw| parse_numeric(&raw).ok())
            .unwrap_or(0.0);
        format!("{:E}", amps * ohms)
    })
}

/// Reply that echoes the current last written to `source` as the voltage.
pub fn echo_current(source: Arc<MockScpiTransport>) -> Responder {
    ohmic_load(source, 1.0)
}
