//! VISA transport for GPIB/USB/Ethernet instruments.
//!
//! Wraps a `visa-rs` session behind [`ScpiTransport`]. VISA I/O is blocking, so
//! every exchange runs on Tokio's blocking pool while holding the session lock;
//! one command is in flight per instrument at any time.
//!
//! Supports resource strings like:
//! - `"GPIB::25"` / `"GPIB0::25::INSTR"` (GPIB interface)
//! - `"USB0::0x05E6::0x6220::SERIAL::INSTR"` (USB)
//! - `"TCPIP0::192.168.1.100::INSTR"` (Ethernet/LXI)

use crate::error::{AppResult, DaqError};
use crate::hardware::transport::ScpiTransport;
use async_trait::async_trait;
use std::ffi::CString;
use std::io::{BufRead, BufReader, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};
use visa_rs::prelude::*;

struct VisaSession {
    // Dropping the resource manager closes every session it opened.
    _rm: DefaultRM,
    instr: Instrument,
}

/// [`ScpiTransport`] over a VISA session.
pub struct VisaTransport {
    address: String,
    terminator: String,
    session: Arc<Mutex<VisaSession>>,
}

fn visa_err(context: &str, err: impl std::fmt::Display) -> DaqError {
    DaqError::Transport(format!("{context}: {err}"))
}

impl VisaTransport {
    /// Open a session to `address`, waiting at most `timeout` for the lock.
    pub fn open(address: &str, timeout: Duration) -> AppResult<Self> {
        let rm = DefaultRM::new().map_err(|e| visa_err("VISA resource manager", e))?;
        let resource = CString::new(address)
            .map_err(|e| DaqError::validation("address", format!("'{address}': {e}")))?;
        let instr = rm
            .open(&resource.into(), AccessMode::NO_LOCK, timeout)
            .map_err(|e| visa_err(address, e))?;
        info!(address, "VISA session opened");
        Ok(Self {
            address: address.to_string(),
            terminator: "\n".to_string(),
            session: Arc::new(Mutex::new(VisaSession { _rm: rm, instr })),
        })
    }

    /// Use `terminator` instead of `"\n"` after each command.
    pub fn with_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.terminator = terminator.into();
        self
    }

    async fn exchange(&self, command: &str, expect_reply: bool) -> AppResult<Option<String>> {
        let session = self.session.clone();
        let address = self.address.clone();
        let line = format!("{command}{}", self.terminator);
        debug!(address = %self.address, command, "VISA exchange");

        tokio::task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|_| DaqError::Transport(format!("{address}: session lock poisoned")))?;
            guard
                .instr
                .write_all(line.as_bytes())
                .map_err(|e| visa_err(&address, e))?;
            if !expect_reply {
                return Ok(None);
            }
            let mut reply = String::new();
            BufReader::new(&guard.instr)
                .read_line(&mut reply)
                .map_err(|e| visa_err(&address, e))?;
            Ok(Some(reply.trim_end_matches(['\r', '\n']).to_string()))
        })
        .await
        .map_err(|e| DaqError::Transport(format!("VISA task failed: {e}")))?
    }
}

#[async_trait]
impl ScpiTransport for VisaTransport {
    async fn write(&self, command: &str) -> AppResult<()> {
        self.exchange(command, false).await.map(|_| ())
    }

    async fn query(&self, command: &str) -> AppResult<String> {
        self.exchange(command, true)
            .await?
            .ok_or_else(|| DaqError::Transport(format!("{}: no reply to '{command}'", self.address)))
    }

    fn address(&self) -> &str {
        &self.address
    }
}
