//! Sweep Parameters
//!
//! The operator enters three numbers: the maximum current in µA, the current
//! step in nA and the settling delay in ms. [`SweepConfig::from_parameters`]
//! tags each with its unit, converts it once into amps / a [`Duration`], and
//! checks the result.
//!
//! ```toml
//! [sweep]
//! max_current_ua = 0.1
//! current_step_na = 10.0
//! delay_ms = 10.0
//! ```

use crate::error::{AppResult, DaqError};
use crate::hardware::current_source::MAX_OUTPUT_CURRENT;
use crate::procedures::waveform::{expected_len, CurrentWaveform};
use crate::procedures::{ParameterConstraints, ParameterDef};
use crate::units::{convert, Current, CurrentUnit};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default maximum current, µA.
pub const DEFAULT_MAX_CURRENT_UA: f64 = 0.1;
/// Default current step, nA.
pub const DEFAULT_CURRENT_STEP_NA: f64 = 10.0;
/// Default delay between set-point and reading, ms.
pub const DEFAULT_DELAY_MS: f64 = 10.0;

/// Operator-facing sweep parameters, in their entry units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepParameters {
    /// Maximum current (µA).
    pub max_current_ua: f64,
    /// Current step (nA).
    pub current_step_na: f64,
    /// Delay time (ms).
    pub delay_ms: f64,
}

impl Default for SweepParameters {
    fn default() -> Self {
        Self {
            max_current_ua: DEFAULT_MAX_CURRENT_UA,
            current_step_na: DEFAULT_CURRENT_STEP_NA,
            delay_ms: DEFAULT_DELAY_MS,
        }
    }
}

impl SweepParameters {
    /// Declarations of the three parameters, with units and defaults.
    pub fn definitions() -> Vec<ParameterDef> {
        let positive = || {
            Some(ParameterConstraints {
                min: Some(0.0),
                max: None,
                allowed_values: None,
            })
        };
        vec![
            ParameterDef {
                name: "Maximum Current".into(),
                key: "max_current_ua".into(),
                param_type: "f64".into(),
                default: Some(DEFAULT_MAX_CURRENT_UA.to_string()),
                units: Some(CurrentUnit::Microampere.symbol().into()),
                description: "Peak of the triangular sweep, both polarities".into(),
                constraints: positive(),
            },
            ParameterDef {
                name: "Current Step".into(),
                key: "current_step_na".into(),
                param_type: "f64".into(),
                default: Some(DEFAULT_CURRENT_STEP_NA.to_string()),
                units: Some(CurrentUnit::Nanoampere.symbol().into()),
                description: "Spacing between consecutive set-points".into(),
                constraints: positive(),
            },
            ParameterDef {
                name: "Delay Time".into(),
                key: "delay_ms".into(),
                param_type: "f64".into(),
                default: Some(DEFAULT_DELAY_MS.to_string()),
                units: Some("ms".into()),
                description: "Wait between setting a current and reading the voltage".into(),
                constraints: positive(),
            },
        ]
    }
}

/// Validated sweep configuration in instrument units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepConfig {
    max_current: Current,
    current_step: Current,
    delay: Duration,
}

impl SweepConfig {
    /// Convert and validate operator parameters.
    pub fn from_parameters(params: &SweepParameters) -> AppResult<Self> {
        let max_current = convert(
            Current::microamps(params.max_current_ua),
            CurrentUnit::Ampere,
        );
        let current_step = convert(
            Current::nanoamps(params.current_step_na),
            CurrentUnit::Ampere,
        );

        if !params.delay_ms.is_finite() || params.delay_ms < 0.0 {
            return Err(DaqError::Configuration(format!(
                "delay must be a non-negative number of ms, got {}",
                params.delay_ms
            )));
        }
        let delay = Duration::try_from_secs_f64(params.delay_ms / 1000.0).map_err(|e| {
            DaqError::Configuration(format!("delay of {} ms: {e}", params.delay_ms))
        })?;

        // Rejects non-positive values, step > max and oversized sweeps.
        expected_len(max_current.value(), current_step.value())?;

        // The source would clamp anything larger.
        if max_current.value() > MAX_OUTPUT_CURRENT {
            return Err(DaqError::Configuration(format!(
                "maximum current {} A exceeds the source limit of {MAX_OUTPUT_CURRENT} A",
                max_current.value()
            )));
        }

        Ok(Self {
            max_current,
            current_step,
            delay,
        })
    }

    /// Skips validation, so sweeps beyond the source limit can be built.
    #[cfg(test)]
    pub(crate) fn unchecked_amps(max: f64, step: f64, delay: Duration) -> Self {
        Self {
            max_current: Current::amps(max),
            current_step: Current::amps(step),
            delay,
        }
    }

    /// Peak current.
    pub fn max_current(&self) -> Current {
        self.max_current
    }

    /// Current step.
    pub fn current_step(&self) -> Current {
        self.current_step
    }

    /// Delay between set-point and reading.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Build the set-point sequence.
    pub fn waveform(&self) -> AppResult<CurrentWaveform> {
        CurrentWaveform::triangle(self.max_current.as_amps(), self.current_step.as_amps())
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            max_current: convert(
                Current::microamps(DEFAULT_MAX_CURRENT_UA),
                CurrentUnit::Ampere,
            ),
            current_step: convert(
                Current::nanoamps(DEFAULT_CURRENT_STEP_NA),
                CurrentUnit::Ampere,
            ),
            delay: Duration::from_secs_f64(DEFAULT_DELAY_MS / 1000.0),
        }
    }
}
