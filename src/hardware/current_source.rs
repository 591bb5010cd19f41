//! Keithley 6220 class DC current source.
//!
//! The façade mirrors what it has commanded (last set-point, auto-range, output)
//! so that ramps can start from the present current without a round trip.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut source = CurrentSource::new(transport);
//! source.reset().await?;
//! source.set_current_range(10e-3).await?;   // also disables auto-range
//! source.set_compliance_voltage(10.0).await?;
//! source.enable_source().await?;
//! source.ramp_to_current(5e-3, 30, Duration::from_millis(20)).await?;
//! source.shutdown().await?;                 // ramps to zero, output off
//! ```

use crate::error::{AppResult, DaqError};
use crate::hardware::buffer::{TraceBuffer, TriggerProperties};
use crate::hardware::property::{
    cast_int, cast_text, find_property, strict_discrete_set, truncated_range, Domain,
    PropertyDescriptor, PropertyValue,
};
use crate::hardware::reply::parse_error_reply;
use crate::hardware::transport::ScpiTransport;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

/// Steps used by [`CurrentSource::shutdown`] unless overridden.
pub const DEFAULT_RAMP_STEPS: usize = 30;
/// Pause between ramp steps unless overridden.
pub const DEFAULT_RAMP_PAUSE: Duration = Duration::from_millis(20);
/// Longest time [`CurrentSource::check_errors`] keeps draining the queue.
pub const ERROR_POLL_TIMEOUT: Duration = Duration::from_secs(10);
/// Spacing between error-queue polls.
pub const ERROR_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Largest output current magnitude in amps.
pub const MAX_OUTPUT_CURRENT: f64 = 105e-3;

const ON_OFF: &[&str] = &["ON", "OFF"];

/// Output range in amps. Setting it disables auto-range.
pub static CURRENT_RANGE: PropertyDescriptor = PropertyDescriptor {
    name: "current_range",
    get_command: Some("CURRent:RANGe?"),
    set_command: Some("CURRent:RANGe:AUTO 0;CURRent:RANGe {value}"),
    validator: Some(truncated_range),
    values: Domain::Range {
        min: -MAX_OUTPUT_CURRENT,
        max: MAX_OUTPUT_CURRENT,
    },
    cast: None,
    unit: Some("A"),
};

/// Output set-point in amps.
pub static CURRENT: PropertyDescriptor = PropertyDescriptor {
    name: "current",
    get_command: Some("CURRent?"),
    set_command: Some("CURRent {value}"),
    validator: Some(truncated_range),
    values: Domain::Range {
        min: -MAX_OUTPUT_CURRENT,
        max: MAX_OUTPUT_CURRENT,
    },
    cast: None,
    unit: Some("A"),
};

/// Output analog filter.
pub static CURRENT_FILTER: PropertyDescriptor = PropertyDescriptor {
    name: "current_filter",
    get_command: Some("CURRent:FILTer?"),
    set_command: Some("CURRent:FILTer {value}"),
    validator: Some(strict_discrete_set),
    values: Domain::Set(ON_OFF),
    cast: Some(cast_text),
    unit: None,
};

/// Compliance voltage in volts.
pub static COMPLIANCE_VOLTAGE: PropertyDescriptor = PropertyDescriptor {
    name: "compliance_voltage",
    get_command: Some("CURRent:COMPliance?"),
    set_command: Some("CURRent:COMPliance {value}"),
    validator: Some(truncated_range),
    values: Domain::Range {
        min: 0.1,
        max: 105.0,
    },
    cast: None,
    unit: Some("V"),
};

/// Trigger count.
pub static TRIGGER_COUNT: PropertyDescriptor = PropertyDescriptor {
    name: "trigger_count",
    get_command: Some(":TRIG:COUN?"),
    set_command: Some(":TRIG:COUN {value}"),
    validator: Some(truncated_range),
    values: Domain::Range {
        min: 1.0,
        max: 2500.0,
    },
    cast: Some(cast_int),
    unit: None,
};

/// Trigger delay in seconds.
pub static TRIGGER_DELAY: PropertyDescriptor = PropertyDescriptor {
    name: "trigger_delay",
    get_command: Some(":TRIG:SEQ:DEL?"),
    set_command: Some(":TRIG:SEQ:DEL {value}"),
    validator: Some(truncated_range),
    values: Domain::Range {
        min: 0.0,
        max: 999.9999,
    },
    cast: None,
    unit: Some("s"),
};

/// Every property reachable through [`CurrentSource::property`].
pub static PROPERTIES: &[&PropertyDescriptor] = &[
    &CURRENT_RANGE,
    &CURRENT,
    &CURRENT_FILTER,
    &COMPLIANCE_VOLTAGE,
    &TRIGGER_COUNT,
    &TRIGGER_DELAY,
];

/// One entry of the instrument error queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorQueueEntry {
    /// Instrument error code; 0 means the queue is empty.
    pub code: i32,
    /// Instrument error message.
    pub message: String,
}

impl ErrorQueueEntry {
    /// Whether this entry reports an actual error.
    pub fn is_error(&self) -> bool {
        self.code != 0
    }

    /// Convert into a [`DaqError::Device`].
    pub fn into_error(self) -> DaqError {
        DaqError::Device {
            code: self.code,
            message: self.message,
        }
    }
}

impl fmt::Display for ErrorQueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Session with one current source.
pub struct CurrentSource {
    transport: Arc<dyn ScpiTransport>,
    last_current: Option<f64>,
    auto_range: Option<bool>,
    output_enabled: bool,
    ramp_steps: usize,
    ramp_pause: Duration,
}

impl CurrentSource {
    /// Open a session over `transport`. No command is sent.
    pub fn new(transport: Arc<dyn ScpiTransport>) -> Self {
        Self {
            transport,
            last_current: None,
            auto_range: None,
            output_enabled: false,
            ramp_steps: DEFAULT_RAMP_STEPS,
            ramp_pause: DEFAULT_RAMP_PAUSE,
        }
    }

    /// Ramp used by [`shutdown`](Self::shutdown).
    pub fn with_shutdown_ramp(mut self, steps: usize, pause: Duration) -> Self {
        self.ramp_steps = steps;
        self.ramp_pause = pause;
        self
    }

    /// Instrument address.
    pub fn address(&self) -> &str {
        self.transport.address()
    }

    /// Last set-point written through this session, if known.
    pub fn last_current(&self) -> Option<f64> {
        self.last_current
    }

    /// Mirrored auto-range flag, if known.
    pub fn auto_range(&self) -> Option<bool> {
        self.auto_range
    }

    /// Whether this session last switched the output on.
    pub fn is_output_enabled(&self) -> bool {
        self.output_enabled
    }

    // =========================================================================
    // Properties
    // =========================================================================

    /// Output range in amps.
    pub async fn current_range(&self) -> AppResult<f64> {
        self.read_float(&CURRENT_RANGE).await
    }

    /// Set the output range; clamped to ±105 mA. Disables auto-range.
    pub async fn set_current_range(&mut self, amps: f64) -> AppResult<f64> {
        let applied = self.write_float(&CURRENT_RANGE, amps).await?;
        self.auto_range = Some(false);
        Ok(applied)
    }

    /// Present set-point in amps, as reported by the instrument.
    pub async fn current(&self) -> AppResult<f64> {
        self.read_float(&CURRENT).await
    }

    /// Set the output current; clamped to ±105 mA.
    pub async fn set_current(&mut self, amps: f64) -> AppResult<f64> {
        // -0.0 would be rendered as "-0".
        let amps = if amps == 0.0 { 0.0 } else { amps };
        let applied = self.write_float(&CURRENT, amps).await?;
        self.last_current = Some(applied);
        Ok(applied)
    }

    /// Whether the output analog filter is on.
    pub async fn current_filter(&self) -> AppResult<bool> {
        let value = CURRENT_FILTER.get(self.transport.as_ref()).await?;
        Ok(value.as_str() == Some("ON"))
    }

    /// Switch the output analog filter.
    pub async fn set_current_filter(&self, enabled: bool) -> AppResult<()> {
        CURRENT_FILTER
            .set(self.transport.as_ref(), enabled)
            .await
            .map(|_| ())
    }

    /// Compliance voltage in volts.
    pub async fn compliance_voltage(&self) -> AppResult<f64> {
        self.read_float(&COMPLIANCE_VOLTAGE).await
    }

    /// Set the compliance voltage; clamped to 0.1..=105 V.
    pub async fn set_compliance_voltage(&self, volts: f64) -> AppResult<f64> {
        self.write_float(&COMPLIANCE_VOLTAGE, volts).await
    }

    /// Trigger count.
    pub async fn trigger_count(&self) -> AppResult<i64> {
        TRIGGER_COUNT
            .get(self.transport.as_ref())
            .await?
            .as_i64()
            .ok_or_else(|| DaqError::Protocol("trigger_count is not an integer".into()))
    }

    /// Set the trigger count; clamped to 1..=2500.
    pub async fn set_trigger_count(&self, count: i64) -> AppResult<i64> {
        TRIGGER_COUNT
            .set(self.transport.as_ref(), count)
            .await?
            .as_i64()
            .ok_or_else(|| DaqError::validation(TRIGGER_COUNT.name, "expected an integer"))
    }

    /// Trigger delay.
    pub async fn trigger_delay(&self) -> AppResult<Duration> {
        let secs = self.read_float(&TRIGGER_DELAY).await?;
        Duration::try_from_secs_f64(secs.max(0.0))
            .map_err(|e| DaqError::Protocol(format!("trigger_delay: {e}")))
    }

    /// Set the trigger delay; clamped to 0..=999.9999 s.
    pub async fn set_trigger_delay(&self, delay: Duration) -> AppResult<f64> {
        self.write_float(&TRIGGER_DELAY, delay.as_secs_f64()).await
    }

    /// Look up a property by name.
    pub fn property(&self, name: &str) -> AppResult<&'static PropertyDescriptor> {
        find_property(PROPERTIES, name)
    }

    async fn read_float(&self, desc: &PropertyDescriptor) -> AppResult<f64> {
        let value = desc.get(self.transport.as_ref()).await?;
        value
            .as_f64()
            .ok_or_else(|| DaqError::Protocol(format!("{} is not numeric: '{value}'", desc.name)))
    }

    async fn write_float(&self, desc: &PropertyDescriptor, value: f64) -> AppResult<f64> {
        let applied = desc
            .set(self.transport.as_ref(), PropertyValue::Float(value))
            .await?;
        applied
            .as_f64()
            .ok_or_else(|| DaqError::validation(desc.name, "expected a number"))
    }

    // =========================================================================
    // Output control
    // =========================================================================

    /// Switch the output on.
    pub async fn enable_source(&mut self) -> AppResult<()> {
        self.transport.write("OUTPUT ON").await?;
        self.output_enabled = true;
        info!(address = self.transport.address(), "source output enabled");
        Ok(())
    }

    /// Switch the output off.
    pub async fn disable_source(&mut self) -> AppResult<()> {
        self.transport.write("OUTPUT OFF").await?;
        self.output_enabled = false;
        info!(address = self.transport.address(), "source output disabled");
        Ok(())
    }

    /// Let the instrument pick the range.
    pub async fn enable_auto_range(&mut self) -> AppResult<()> {
        self.transport.write("CURRent:RANGe:AUTO 1").await?;
        self.auto_range = Some(true);
        Ok(())
    }

    /// Hold the present range.
    pub async fn disable_auto_range(&mut self) -> AppResult<()> {
        self.transport.write("CURRent:RANGe:AUTO 0").await?;
        self.auto_range = Some(false);
        Ok(())
    }

    /// Move linearly from the present set-point to `target` in `steps` writes,
    /// sleeping `pause` after each one.
    ///
    /// The present set-point is the mirrored value, or is queried when unknown.
    /// The last write is exactly `target`.
    #[instrument(skip(self), fields(address = %self.transport.address()))]
    pub async fn ramp_to_current(
        &mut self,
        target: f64,
        steps: usize,
        pause: Duration,
    ) -> AppResult<()> {
        if steps < 2 {
            return Err(DaqError::validation(
                "steps",
                format!("a ramp needs at least 2 steps, got {steps}"),
            ));
        }
        let start = match self.last_current {
            Some(current) => current,
            None => self.current().await?,
        };
        debug!(start, target, steps, "ramping current");

        let last = steps - 1;
        for i in 0..steps {
            let value = if i == last {
                target
            } else {
                start + (target - start) * (i as f64) / (last as f64)
            };
            self.set_current(value).await?;
            sleep(pause).await;
        }
        Ok(())
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Pop one entry from the error queue.
    pub async fn error(&self) -> AppResult<ErrorQueueEntry> {
        let reply = self.transport.query(":SYSTem:ERRor?").await?;
        let (code, message) = parse_error_reply(&reply)?;
        Ok(ErrorQueueEntry { code, message })
    }

    /// Drain the error queue, logging every entry.
    ///
    /// Stops at the first `0` entry or [`ERROR_POLL_TIMEOUT`] after the call
    /// began. Device errors are returned, never raised.
    pub async fn check_errors(&self) -> AppResult<Vec<ErrorQueueEntry>> {
        let started = Instant::now();
        let mut entries = Vec::new();
        loop {
            let entry = self.error().await?;
            if !entry.is_error() {
                break;
            }
            warn!(
                address = self.transport.address(),
                code = entry.code,
                message = %entry.message,
                "instrument reported error"
            );
            entries.push(entry);
            if started.elapsed() >= ERROR_POLL_TIMEOUT {
                warn!(
                    address = self.transport.address(),
                    "timed out draining the error queue"
                );
                break;
            }
            sleep(ERROR_POLL_INTERVAL).await;
        }
        Ok(entries)
    }

    /// Restore factory defaults and clear status.
    pub async fn reset(&mut self) -> AppResult<()> {
        self.transport.write("*RST").await?;
        self.transport.write("*CLS").await?;
        self.last_current = Some(0.0);
        self.auto_range = None;
        self.output_enabled = false;
        Ok(())
    }

    /// Ramp to zero, then switch the output off.
    ///
    /// The output is switched off even if the ramp fails; the first error is
    /// returned.
    pub async fn shutdown(&mut self) -> AppResult<()> {
        info!(address = self.transport.address(), "shutting down current source");
        let ramp = self
            .ramp_to_current(0.0, self.ramp_steps, self.ramp_pause)
            .await;
        if let Err(e) = &ramp {
            warn!(error = %e, "ramp to zero failed, disabling output anyway");
        }
        let disable = self.disable_source().await;
        ramp.and(disable)
    }

    /// Trace-buffer operations on this source.
    pub fn buffer(&self) -> TraceBuffer {
        TraceBuffer::new(
            self.transport.clone(),
            TriggerProperties {
                count: &TRIGGER_COUNT,
                delay: &TRIGGER_DELAY,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockScpiTransport;

    fn source() -> (Arc<MockScpiTransport>, CurrentSource) {
        let mock = Arc::new(MockScpiTransport::new("GPIB::1"));
        let source = CurrentSource::new(mock.clone());
        (mock, source)
    }

    #[tokio::test]
    async fn test_current_range_disables_auto_range() {
        let (mock, mut source) = source();
        source.enable_auto_range().await.unwrap();
        assert_eq!(source.auto_range(), Some(true));
        source.set_current_range(1e-7).await.unwrap();
        assert_eq!(source.auto_range(), Some(false));
        assert_eq!(
            mock.writes(),
            vec![
                "CURRent:RANGe:AUTO 1",
                "CURRent:RANGe:AUTO 0;CURRent:RANGe 0.0000001",
            ]
        );
        assert_eq!(source.current_range().await.unwrap(), 1e-7);
    }

    #[tokio::test]
    async fn test_range_properties_clamp() {
        let (_mock, mut source) = source();
        assert_eq!(source.set_current_range(1.0).await.unwrap(), 0.105);
        assert_eq!(source.set_current(-1.0).await.unwrap(), -0.105);
        assert_eq!(source.set_compliance_voltage(200.0).await.unwrap(), 105.0);
        assert_eq!(source.set_compliance_voltage(0.0).await.unwrap(), 0.1);
        assert_eq!(source.set_trigger_count(0).await.unwrap(), 1);
        assert_eq!(source.set_trigger_count(2500).await.unwrap(), 2500);
        assert_eq!(
            source.set_trigger_delay(Duration::from_secs(5000)).await.unwrap(),
            999.9999
        );
        assert_eq!(source.trigger_count().await.unwrap(), 2500);
    }

    #[tokio::test]
    async fn test_current_filter_round_trip() {
        let (mock, source) = source();
        source.set_current_filter(true).await.unwrap();
        assert!(source.current_filter().await.unwrap());
        assert_eq!(mock.writes(), vec!["CURRent:FILTer ON"]);

        let err = CURRENT_FILTER
            .set(mock.as_ref(), "MAYBE")
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(mock.writes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ramp_is_linear_and_ends_on_target() {
        let (mock, mut source) = source();
        // Powers of two keep every intermediate value exact.
        source.set_current(0.0009765625).await.unwrap();
        mock.clear_calls();

        let started = Instant::now();
        source
            .ramp_to_current(0.0, 5, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(
            mock.writes(),
            vec![
                "CURRent 0.0009765625",
                "CURRent 0.000732421875",
                "CURRent 0.00048828125",
                "CURRent 0.000244140625",
                "CURRent 0",
            ]
        );
        assert_eq!(source.last_current(), Some(0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ramp_queries_unknown_start() {
        let (mock, mut source) = source();
        mock.set_register("CURRent", "2.0E-3");
        source
            .ramp_to_current(0.0, 2, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(mock.queries(), vec!["CURRent?"]);
        assert_eq!(mock.writes(), vec!["CURRent 0.002", "CURRent 0"]);
    }

    #[tokio::test]
    async fn test_ramp_rejects_single_step() {
        let (_mock, mut source) = source();
        let err = source
            .ramp_to_current(0.0, 1, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_errors_drains_queue() {
        let (mock, source) = source();
        mock.push_error(-222, "Data out of range");
        mock.push_error(-113, "Undefined header");
        let entries = source.check_errors().await.unwrap();
        assert_eq!(
            entries,
            vec![
                ErrorQueueEntry {
                    code: -222,
                    message: "Data out of range".into()
                },
                ErrorQueueEntry {
                    code: -113,
                    message: "Undefined header".into()
                },
            ]
        );
        assert!(source.check_errors().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    #[tracing_test::traced_test]
    async fn test_check_errors_logs_each_entry() {
        let (mock, source) = source();
        mock.push_error(-221, "Settings conflict");
        source.check_errors().await.unwrap();
        assert!(logs_contain("instrument reported error"));
        assert!(logs_contain("Settings conflict"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_errors_times_out() {
        let (mock, source) = source();
        for _ in 0..5000 {
            mock.push_error(-350, "Queue overflow");
        }
        let started = Instant::now();
        let entries = source.check_errors().await.unwrap();
        assert!(started.elapsed() >= ERROR_POLL_TIMEOUT);
        assert!(entries.len() < 5000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_ramps_then_disables() {
        let (mock, mut source) = source();
        source.set_current(1e-6).await.unwrap();
        source.enable_source().await.unwrap();
        mock.clear_calls();

        source.shutdown().await.unwrap();
        let writes = mock.writes();
        assert_eq!(writes.len(), DEFAULT_RAMP_STEPS + 1);
        assert_eq!(writes[DEFAULT_RAMP_STEPS - 1], "CURRent 0");
        assert_eq!(writes[DEFAULT_RAMP_STEPS], "OUTPUT OFF");
        assert!(!source.is_output_enabled());
        assert!(!writes.iter().any(|w| w.contains("SourceMeter")));
    }

    #[tokio::test]
    async fn test_shutdown_disables_even_if_ramp_fails() {
        let (mock, mut source) = source();
        mock.fail_writes_matching("CURRent ");
        source.last_current = Some(1e-6);
        assert!(source.shutdown().await.is_err());
        assert_eq!(mock.count_writes("OUTPUT OFF"), 1);
    }

    #[tokio::test]
    async fn test_reset_clears_mirrors() {
        let (mock, mut source) = source();
        source.enable_auto_range().await.unwrap();
        source.reset().await.unwrap();
        assert_eq!(source.last_current(), Some(0.0));
        assert_eq!(source.auto_range(), None);
        assert_eq!(mock.count_writes("*RST"), 1);
        assert_eq!(mock.count_writes("*CLS"), 1);
    }

    #[test]
    fn test_error_entry_conversion() {
        let entry = ErrorQueueEntry {
            code: -222,
            message: "Data out of range".into(),
        };
        assert!(entry.is_error());
        assert!(matches!(entry.into_error(), DaqError::Device { code: -222, .. }));
    }
}
