//! Procedure Results and Emissions
//!
//! A running sweep reports through a [`ResultSink`]: one `results` emission per
//! measured point followed by a `progress` emission. When the run is over
//! [`run_procedure`](super::run_procedure) returns a [`ProcedureResult`] summary.

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// =============================================================================
// Records
// =============================================================================

/// One measured point of an I-V curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSample {
    /// Set-point (A).
    pub current: f64,
    /// Averaged reading (V).
    pub voltage: f64,
    /// `voltage / current` (Ohm); NaN at zero current.
    pub resistance: f64,
}

impl MeasurementSample {
    /// Pair a set-point with its reading.
    pub fn new(current: f64, voltage: f64) -> Self {
        let resistance = if current == 0.0 {
            f64::NAN
        } else {
            voltage / current
        };
        Self {
            current,
            voltage,
            resistance,
        }
    }
}

/// A record emitted by a running procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum Emission {
    /// A measured point.
    Results(MeasurementSample),
    /// Percentage complete, 0 to 100.
    Progress(f64),
}

impl Emission {
    /// `"results"` or `"progress"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Emission::Results(_) => "results",
            Emission::Progress(_) => "progress",
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureResult {
    /// Procedure name.
    pub procedure: String,
    /// Set-points in the waveform.
    pub total_points: usize,
    /// Points actually measured.
    pub points_measured: usize,
    /// Whether the run stopped on a cancellation request.
    pub cancelled: bool,
    /// Wall time from startup to the end of shutdown.
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl ProcedureResult {
    /// Whether every point was measured.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.points_measured == self.total_points
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// Destination for emissions.
pub trait ResultSink: Send + Sync {
    /// Accept one emission.
    fn emit(&self, emission: &Emission) -> AppResult<()>;
}

/// Keeps every emission in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    emissions: Mutex<Vec<Emission>>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything received so far.
    pub fn emissions(&self) -> Vec<Emission> {
        self.emissions
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    /// Measured points received so far.
    pub fn samples(&self) -> Vec<MeasurementSample> {
        self.emissions()
            .into_iter()
            .filter_map(|e| match e {
                Emission::Results(sample) => Some(sample),
                Emission::Progress(_) => None,
            })
            .collect()
    }

    /// Progress values received so far.
    pub fn progress(&self) -> Vec<f64> {
        self.emissions()
            .into_iter()
            .filter_map(|e| match e {
                Emission::Progress(p) => Some(p),
                Emission::Results(_) => None,
            })
            .collect()
    }
}

impl ResultSink for MemorySink {
    fn emit(&self, emission: &Emission) -> AppResult<()> {
        self.emissions
            .lock()
            .map_err(|_| DaqError::Storage("memory sink lock poisoned".into()))?
            .push(emission.clone());
        Ok(())
    }
}

/// Forwards emissions to a live consumer.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Emission>,
}

impl ChannelSink {
    /// Sink plus the receiving end.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Emission>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ResultSink for ChannelSink {
    fn emit(&self, emission: &Emission) -> AppResult<()> {
        // A closed display must not abort the measurement.
        let _ = self.tx.send(emission.clone());
        Ok(())
    }
}

/// Forwards each emission to several sinks in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl FanoutSink {
    /// Empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a destination.
    pub fn with(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ResultSink for FanoutSink {
    fn emit(&self, emission: &Emission) -> AppResult<()> {
        for sink in &self.sinks {
            sink.emit(emission)?;
        }
        Ok(())
    }
}
