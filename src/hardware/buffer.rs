//! Trace-buffer capability shared by Keithley instruments.
//!
//! Both the nanovoltmeter and the current source carry an internal trace buffer
//! driven by the same command set. [`TraceBuffer`] wraps the device's transport
//! and is handed out by the façades (`meter.buffer()`, `source.buffer()`), so the
//! capability is composed rather than inherited.
//!
//! Trigger settings differ per instrument, so the façade passes its own
//! `trigger_count` / `trigger_delay` descriptors in.

use crate::error::{AppResult, DaqError};
use crate::hardware::property::{
    cast_int, truncated_range, Domain, PropertyDescriptor, PropertyValue,
};
use crate::hardware::reply::parse_values;
use crate::hardware::transport::ScpiTransport;
use crate::procedures::cancel::CancellationToken;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

/// Status byte value reported once the buffer has filled.
pub const BUFFER_FULL_STATUS: i64 = 65;

/// Number of readings the trace buffer stores.
pub static BUFFER_POINTS: PropertyDescriptor = PropertyDescriptor {
    name: "buffer_points",
    get_command: Some(":TRAC:POIN?"),
    set_command: Some(":TRAC:POIN {value}"),
    validator: Some(truncated_range),
    values: Domain::Range {
        min: 2.0,
        max: 1024.0,
    },
    cast: Some(cast_int),
    unit: None,
};

/// Trigger settings a buffered acquisition programs alongside the buffer.
#[derive(Debug, Clone, Copy)]
pub struct TriggerProperties {
    /// Number of triggers (one reading each).
    pub count: &'static PropertyDescriptor,
    /// Delay before each reading, in seconds.
    pub delay: &'static PropertyDescriptor,
}

/// Handle on an instrument's trace buffer.
#[derive(Clone)]
pub struct TraceBuffer {
    transport: Arc<dyn ScpiTransport>,
    trigger: TriggerProperties,
}

impl TraceBuffer {
    /// Wrap `transport`, programming triggers through `trigger`.
    pub fn new(transport: Arc<dyn ScpiTransport>, trigger: TriggerProperties) -> Self {
        Self { transport, trigger }
    }

    /// Prepare the buffer to collect `points` readings, `delay` apart.
    ///
    /// Returns the number of points actually programmed (clamped to 2..=1024).
    pub async fn configure(&self, points: u32, delay: Duration) -> AppResult<i64> {
        let transport = self.transport.as_ref();
        transport
            .write(":STAT:PRES;*CLS;*SRE 1;:STAT:MEAS:ENAB 512;")
            .await?;
        transport.write(":TRAC:CLEAR;").await?;

        let applied = BUFFER_POINTS.set(transport, i64::from(points)).await?;
        let applied = applied
            .as_i64()
            .ok_or_else(|| DaqError::validation(BUFFER_POINTS.name, "expected an integer"))?;
        self.trigger.count.set(transport, applied).await?;
        self.trigger
            .delay
            .set(transport, PropertyValue::Float(delay.as_secs_f64()))
            .await?;

        transport
            .write(":TRAC:FEED SENSE;:TRAC:FEED:CONT NEXT;")
            .await?;
        info!(
            address = transport.address(),
            points = applied,
            "trace buffer configured"
        );
        Ok(applied)
    }

    /// Whether the status byte reports a full buffer.
    pub async fn is_full(&self) -> AppResult<bool> {
        let reply = self.transport.query("*STB?").await?;
        let status = cast_int(&reply)?
            .as_i64()
            .ok_or_else(|| DaqError::Protocol(format!("bad status byte '{}'", reply.trim())))?;
        Ok(status == BUFFER_FULL_STATUS)
    }

    /// Poll until the buffer is full.
    ///
    /// Returns `Ok(false)` if `cancel` fires first and a [`DaqError::Timeout`]
    /// once `timeout` has elapsed.
    pub async fn wait_for_full(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
        interval: Duration,
    ) -> AppResult<bool> {
        let started = Instant::now();
        loop {
            if cancel.is_cancelled() {
                debug!("buffer wait cancelled");
                return Ok(false);
            }
            if self.is_full().await? {
                return Ok(true);
            }
            if started.elapsed() >= timeout {
                return Err(DaqError::Timeout(format!(
                    "trace buffer on {} not full after {:?}",
                    self.transport.address(),
                    timeout
                )));
            }
            sleep(interval).await;
        }
    }

    /// Read back all stored readings.
    pub async fn data(&self) -> AppResult<Vec<f64>> {
        self.transport.write(":FORM:DATA ASCII").await?;
        let reply = self.transport.query(":TRAC:DATA?").await?;
        parse_values(&reply)
    }

    /// Start collecting.
    pub async fn start(&self) -> AppResult<()> {
        self.transport.write(":INIT").await
    }

    /// Clear the buffer and status registers.
    pub async fn reset(&self) -> AppResult<()> {
        self.transport
            .write(":STAT:PRES;*CLS;:TRAC:CLEAR;:TRAC:FEED:CONT NEXT;")
            .await
    }

    /// Abort the acquisition in progress.
    pub async fn stop(&self) -> AppResult<()> {
        self.transport.write(":ABOR").await
    }

    /// Stop feeding readings into the buffer.
    pub async fn disable(&self) -> AppResult<()> {
        self.transport.write(":TRAC:FEED:CONT NEV").await
    }
}
