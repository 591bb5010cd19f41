//! Configuration System using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. `config/iv_sweep.toml` (or the file given with `--config`)
//! 3. Environment variables prefixed with `IV_SWEEP_`, `__` separating sections
//!
//! # Example
//! ```no_run
//! use iv_sweep::config::Settings;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // IV_SWEEP_SWEEP__DELAY_MS=20 overrides [sweep] delay_ms
//! let settings = Settings::load()?;
//! settings.validate()?;
//! println!("Source at {}", settings.instruments.source_address);
//! # Ok(())
//! # }
//! ```

use crate::error::{AppResult, DaqError};
use crate::hardware::nanovoltmeter::DEFAULT_NPLC;
use crate::procedures::config::{SweepConfig, SweepParameters};
use crate::procedures::iv_sweep::ProcedureSettings;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/iv_sweep.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "IV_SWEEP_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationConfig,
    /// Instrument addresses
    pub instruments: InstrumentsConfig,
    /// Operator sweep parameters
    pub sweep: SweepParameters,
    /// Instrument settings used by the procedure
    pub procedure: ProcedureConfig,
    /// Result files
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "IV sweep".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Where the instruments live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentsConfig {
    /// Nanovoltmeter VISA address
    pub meter_address: String,
    /// Current source VISA address
    pub source_address: String,
    /// Session open timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for InstrumentsConfig {
    fn default() -> Self {
        Self {
            meter_address: "GPIB::25".to_string(),
            source_address: "GPIB::1".to_string(),
            timeout_ms: 5000,
        }
    }
}

/// Instrument settings applied by the sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcedureConfig {
    /// Wait after enabling the output
    #[serde(with = "humantime_serde")]
    pub settle_time: Duration,
    /// Source compliance voltage (V)
    pub compliance_voltage: f64,
    /// Steps of the ramp to zero at shutdown
    pub ramp_steps: usize,
    /// Pause between ramp steps
    #[serde(with = "humantime_serde")]
    pub ramp_pause: Duration,
    /// Meter integration time (power-line cycles)
    pub nplc: f64,
    /// Readings averaged per point
    pub measurement_iterations: u32,
}

impl Default for ProcedureConfig {
    fn default() -> Self {
        let defaults = ProcedureSettings::default();
        Self {
            settle_time: defaults.settle_time,
            compliance_voltage: defaults.compliance_voltage,
            ramp_steps: defaults.ramp_steps,
            ramp_pause: defaults.ramp_pause,
            nplc: DEFAULT_NPLC,
            measurement_iterations: defaults.measurement_iterations,
        }
    }
}

impl ProcedureConfig {
    /// Settings handed to the procedure.
    pub fn to_settings(&self) -> ProcedureSettings {
        ProcedureSettings {
            settle_time: self.settle_time,
            compliance_voltage: self.compliance_voltage,
            ramp_steps: self.ramp_steps,
            ramp_pause: self.ramp_pause,
            nplc: self.nplc,
            measurement_iterations: self.measurement_iterations,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Output directory for result files
    pub output_dir: PathBuf,
    /// File name prefix
    pub prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            prefix: "IV".to_string(),
        }
    }
}

impl Settings {
    /// Load from the default file and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from `path` and the environment. A missing file is not an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path).extract()?)
    }

    /// Layered provider, exposed for callers that merge extra sources.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.procedure.ramp_steps < 2 {
            return Err(DaqError::Configuration(format!(
                "ramp_steps must be at least 2, got {}",
                self.procedure.ramp_steps
            )));
        }
        if self.procedure.measurement_iterations == 0 {
            return Err(DaqError::Configuration(
                "measurement_iterations must be at least 1".into(),
            ));
        }
        if !(self.procedure.compliance_voltage.is_finite() && self.procedure.compliance_voltage > 0.0)
        {
            return Err(DaqError::Configuration(format!(
                "compliance_voltage must be positive, got {}",
                self.procedure.compliance_voltage
            )));
        }

        self.sweep_config().map(|_| ())
    }

    /// Converted sweep parameters.
    pub fn sweep_config(&self) -> AppResult<SweepConfig> {
        SweepConfig::from_parameters(&self.sweep)
    }
}
