//! # I-V Sweep Library
//!
//! Automation of current-voltage sweeps with a Keithley 6220 precision current
//! source and a Keithley 2182 nanovoltmeter over SCPI. The library is kept
//! separate from the CLI (`main.rs`) so the procedure can be embedded and
//! tested against in-memory instruments.
//!
//! ## Crate Structure
//!
//! - **`config`**: Layered `figment` configuration. See `config::Settings`.
//! - **`data`**: Result files (CSV) and file naming.
//! - **`error`**: The crate-wide `DaqError` enum and `AppResult` alias.
//! - **`hardware`**: The SCPI transport boundary, the validated property layer,
//!   the trace-buffer capability, and the two instrument façades.
//! - **`logging`**: `tracing-subscriber` initialisation.
//! - **`procedures`**: The procedure lifecycle, waveform generation, result sinks
//!   and the I-V sweep itself.
//! - **`units`**: Unit-tagged currents and their conversion.

pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod procedures;
pub mod units;

pub use error::{AppResult, DaqError};
