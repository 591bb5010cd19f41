//! SCPI transport abstraction.
//!
//! Abstracts the underlying communication mechanism (VISA, in-memory mock) so the
//! property layer and the device façades only ever see a line-based
//! command/query exchange.

use crate::error::AppResult;
use async_trait::async_trait;

/// Text request/response channel to one addressed instrument.
///
/// # Contract
/// - `write` sends a command and expects no reply.
/// - `query` sends a command and returns the reply with the line terminator
///   stripped.
/// - Each call is a complete round trip; callers never interleave calls on one
///   transport.
#[async_trait]
pub trait ScpiTransport: Send + Sync {
    /// Send a command without expecting a response.
    async fn write(&self, command: &str) -> AppResult<()>;

    /// Send a query command and return the response.
    async fn query(&self, command: &str) -> AppResult<String>;

    /// Address of the instrument (e.g. `"GPIB::25"`).
    fn address(&self) -> &str;
}
