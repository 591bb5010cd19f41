//! Keithley 2182 class nanovoltmeter.
//!
//! The meter is driven in single-shot mode: [`Nanovoltmeter::setup`] fixes the
//! integration time, disables autozero and front autozero, and leaves the
//! trigger model idle so that each `READ?` produces exactly one reading.
//!
//! State machine:
//!
//! ```text
//! Uninitialized --setup()--> Configured --measure_voltage()--> Measuring
//!        ^                                                         |
//!        +---------------------------reset()-----------------------+
//! ```

use crate::error::{AppResult, DaqError};
use crate::hardware::buffer::{TraceBuffer, TriggerProperties};
use crate::hardware::property::{
    cast_int, find_property, render_template, truncated_range, Domain, PropertyDescriptor,
    PropertyValue, VALUE_PLACEHOLDER,
};
use crate::hardware::reply::parse_scientific;
use crate::hardware::transport::ScpiTransport;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Integration time written by [`Nanovoltmeter::setup`] unless overridden.
pub const DEFAULT_NPLC: f64 = 5.0;

/// Integration time in power-line cycles.
pub static VOLTAGE_NPLC: PropertyDescriptor = PropertyDescriptor {
    name: "voltage_nplc",
    get_command: Some("SENSe:VOLTage:NPLCycles?"),
    set_command: Some("SENSe:VOLTage:NPLCycles {value}"),
    validator: Some(truncated_range),
    values: Domain::Range {
        min: 0.01,
        max: 10.0,
    },
    cast: None,
    unit: Some("PLC"),
};

/// Upper measurement range of the selected channel, in volts.
///
/// The command depends on the channel, so it is rendered by
/// [`Nanovoltmeter::set_range`] rather than through the table.
pub static VOLTAGE_RANGE: PropertyDescriptor = PropertyDescriptor {
    name: "voltage_range",
    get_command: None,
    set_command: None,
    validator: Some(truncated_range),
    values: Domain::Range {
        min: 0.0,
        max: 120.0,
    },
    cast: None,
    unit: Some("V"),
};

const RANGE_TEMPLATE: &str = "SENSe:VOLTage:CHANnel{channel}:RANGe:UPPer {value}";
const FILTER_TEMPLATE: &str = "SENSe:VOLTage:CHANnel{channel}:LPASs {value}";

/// Trigger count used by buffered acquisitions.
pub static TRIGGER_COUNT: PropertyDescriptor = PropertyDescriptor {
    name: "trigger_count",
    get_command: Some(":TRIG:COUN?"),
    set_command: Some(":TRIG:COUN {value}"),
    validator: Some(truncated_range),
    values: Domain::Range {
        min: 1.0,
        max: 9999.0,
    },
    cast: Some(cast_int),
    unit: None,
};

/// Delay before each triggered reading, in seconds.
pub static TRIGGER_DELAY: PropertyDescriptor = PropertyDescriptor {
    name: "trigger_delay",
    get_command: Some(":TRIG:DEL?"),
    set_command: Some(":TRIG:DEL {value}"),
    validator: Some(truncated_range),
    values: Domain::Range {
        min: 0.0,
        max: 999_999.999,
    },
    cast: None,
    unit: Some("s"),
};

/// Every property reachable through [`Nanovoltmeter::property`].
pub static PROPERTIES: &[&PropertyDescriptor] = &[&VOLTAGE_NPLC, &TRIGGER_COUNT, &TRIGGER_DELAY];

/// Lifecycle of a meter session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MeterState {
    /// Fresh or reset; configuration unknown.
    Uninitialized,
    /// [`Nanovoltmeter::setup`] has run.
    Configured,
    /// At least one reading has been taken since setup.
    Measuring,
}

impl fmt::Display for MeterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MeterState::Uninitialized => "uninitialized",
            MeterState::Configured => "configured",
            MeterState::Measuring => "measuring",
        };
        f.write_str(s)
    }
}

/// Session with one nanovoltmeter.
pub struct Nanovoltmeter {
    transport: Arc<dyn ScpiTransport>,
    state: MeterState,
    channel: u8,
    nplc: f64,
}

impl Nanovoltmeter {
    /// Open a session over `transport`. No command is sent.
    pub fn new(transport: Arc<dyn ScpiTransport>) -> Self {
        Self {
            transport,
            state: MeterState::Uninitialized,
            channel: 1,
            nplc: DEFAULT_NPLC,
        }
    }

    /// Use `nplc` power-line cycles in [`setup`](Self::setup).
    pub fn with_nplc(mut self, nplc: f64) -> Self {
        self.nplc = nplc;
        self
    }

    /// Instrument address.
    pub fn address(&self) -> &str {
        self.transport.address()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MeterState {
        self.state
    }

    /// Mirrored input channel.
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Configure the meter for single-shot voltage readings on channel 2.
    #[instrument(skip(self), fields(address = %self.transport.address()))]
    pub async fn setup(&mut self) -> AppResult<()> {
        let transport = self.transport.as_ref();
        transport.write("SENSe:VOLTage").await?;
        transport.write("SENSe:CHANnel 2").await?;
        self.channel = 2;
        VOLTAGE_NPLC.set(transport, self.nplc).await?;
        for command in [
            "SYSTem:FAZero OFF",
            "SYSTem:AZERo OFF",
            "SYSTem:LSYNc ON",
            "SENSe:VOLTage:CHANnel2:RANGe:AUTO ON",
            "SENSe:VOLTage:CHANnel2:LPASs OFF",
            "INITiate",
            "INITiate:CONTinuous OFF",
        ] {
            transport.write(command).await?;
        }
        self.state = MeterState::Configured;
        info!(nplc = self.nplc, "nanovoltmeter configured");
        Ok(())
    }

    /// Select input channel 0, 1 or 2.
    pub async fn set_channel(&mut self, channel: u8) -> AppResult<()> {
        if channel > 2 {
            return Err(DaqError::validation(
                "channel",
                format!("{channel} is not one of {{0, 1, 2}}"),
            ));
        }
        self.transport
            .write(&format!("SENSe:CHANnel {channel}"))
            .await?;
        self.channel = channel;
        Ok(())
    }

    /// Average of `iterations` single readings, in volts.
    ///
    /// Every reading must be in exponent notation; one bad reply fails the call.
    pub async fn measure_voltage(&mut self, iterations: u32) -> AppResult<f64> {
        if iterations == 0 {
            return Err(DaqError::validation(
                "iterations",
                "at least one reading is required",
            ));
        }
        self.transport.write("INITiate:CONTinuous OFF").await?;
        let mut sum = 0.0;
        for _ in 0..iterations {
            let reply = self.transport.query("READ?").await?;
            sum += parse_scientific(&reply)?;
        }
        self.state = MeterState::Measuring;
        let volts = sum / f64::from(iterations);
        debug!(volts, iterations, "voltage measured");
        Ok(volts)
    }

    /// Restore factory defaults and clear status.
    pub async fn reset(&mut self) -> AppResult<()> {
        self.transport.write("*RST").await?;
        self.transport.write("*CLS").await?;
        self.state = MeterState::Uninitialized;
        self.channel = 1;
        Ok(())
    }

    /// Integration time in power-line cycles.
    pub async fn voltage_nplc(&self) -> AppResult<f64> {
        float(&VOLTAGE_NPLC, VOLTAGE_NPLC.get(self.transport.as_ref()).await?)
    }

    /// Set the integration time; clamped to 0.01..=10.
    pub async fn set_voltage_nplc(&mut self, nplc: f64) -> AppResult<f64> {
        let applied = float(&VOLTAGE_NPLC, VOLTAGE_NPLC.set(self.transport.as_ref(), nplc).await?)?;
        self.nplc = applied;
        Ok(applied)
    }

    /// Set the upper range of the selected channel; clamped to 0..=120 V.
    pub async fn set_range(&self, volts: f64) -> AppResult<f64> {
        let applied = VOLTAGE_RANGE.validate(PropertyValue::Float(volts))?;
        let command = render_template(
            RANGE_TEMPLATE,
            &[
                ("channel", self.channel.to_string()),
                (VALUE_PLACEHOLDER, applied.to_string()),
            ],
        )?;
        self.transport.write(&command).await?;
        float(&VOLTAGE_RANGE, applied)
    }

    /// Switch the analog low-pass filter of the selected channel.
    pub async fn set_analog_filtering(&self, enabled: bool) -> AppResult<()> {
        let command = render_template(
            FILTER_TEMPLATE,
            &[
                ("channel", self.channel.to_string()),
                (VALUE_PLACEHOLDER, PropertyValue::from(enabled).to_string()),
            ],
        )?;
        self.transport.write(&command).await
    }

    /// Raw reply of the error queue, e.g. `0,"No error"`.
    pub async fn last_error(&self) -> AppResult<String> {
        self.transport.query("SYST:ERR?").await
    }

    /// Look up a property by name.
    pub fn property(&self, name: &str) -> AppResult<&'static PropertyDescriptor> {
        find_property(PROPERTIES, name)
    }

    /// Trace-buffer operations on this meter.
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

fn float(desc: &PropertyDescriptor, value: PropertyValue) -> AppResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| DaqError::Protocol(format!("{} is not numeric: '{value}'", desc.name)))
}
