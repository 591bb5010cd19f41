//! Procedure Framework
//!
//! A procedure is a parameterised measurement run with a fixed lifecycle:
//!
//! ```text
//! Idle → Starting → Running → Stopping → Done
//!           │          │          ▲
//!           │          └─cancel───┤
//!           └──────────error──────┘
//! ```
//!
//! 1. **startup()** - bring the instruments into a known state
//! 2. **execute()** - walk the set-points, emitting records
//! 3. **shutdown()** - leave the hardware safe
//!
//! [`run_procedure`] drives the lifecycle and guarantees `shutdown()` runs
//! exactly once, whether startup or execute succeeded, failed, or was cancelled.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use iv_sweep::procedures::{run_procedure, IvSweep, MemorySink, ProcedureContext};
//!
//! let sink = Arc::new(MemorySink::new());
//! let ctx = ProcedureContext::new(sink.clone(), CancellationToken::new());
//! let mut sweep = IvSweep::new(config, settings, bench);
//! let result = run_procedure(&mut sweep, &ctx).await?;
//! println!("measured {} points", result.points_measured);
//! ```

pub mod cancel;
pub mod config;
pub mod iv_sweep;
pub mod result;
pub mod waveform;

// Re-exports
pub use cancel::CancellationToken;
pub use config::{SweepConfig, SweepParameters};
pub use iv_sweep::{InstrumentBench, IvSweep, ProcedureSettings};
pub use result::{
    ChannelSink, Emission, FanoutSink, MeasurementSample, MemorySink, ProcedureResult, ResultSink,
};
pub use waveform::CurrentWaveform;

use crate::error::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info};

// =============================================================================
// Parameters
// =============================================================================

/// Definition of a procedure parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Display name
    pub name: String,
    /// Configuration key
    pub key: String,
    /// Parameter type ("f64", "i32", "bool", "string")
    pub param_type: String,
    /// Default value as string
    pub default: Option<String>,
    /// Physical units (optional)
    pub units: Option<String>,
    /// Description
    pub description: String,
    /// Validation constraints
    pub constraints: Option<ParameterConstraints>,
}

/// Constraints for parameter validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterConstraints {
    /// Minimum value (for numeric types)
    pub min: Option<f64>,
    /// Maximum value (for numeric types)
    pub max: Option<f64>,
    /// Allowed values (for enum-like params)
    pub allowed_values: Option<Vec<String>>,
}

// =============================================================================
// Procedure Trait
// =============================================================================

/// Current state of a procedure execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcedureState {
    /// Not yet started
    Idle,
    /// Configuring instruments
    Starting,
    /// Walking the set-points
    Running,
    /// Making the hardware safe
    Stopping,
    /// Shutdown finished
    Done,
}

/// What `execute()` accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionSummary {
    /// Set-points planned.
    pub total_points: usize,
    /// Set-points measured.
    pub points_measured: usize,
    /// Whether the loop stopped on a cancellation request.
    pub cancelled: bool,
}

/// A measurement run.
///
/// Use [`run_procedure`] rather than calling the phases by hand.
#[async_trait]
pub trait Procedure: Send {
    /// Procedure name, used in logs and results.
    fn name(&self) -> &str;

    /// Current state
    fn state(&self) -> ProcedureState;

    /// Bring the instruments into a known state.
    async fn startup(&mut self, ctx: &ProcedureContext) -> AppResult<()>;

    /// Main loop. Must poll `ctx.is_cancelled()` at its iteration boundaries.
    async fn execute(&mut self, ctx: &ProcedureContext) -> AppResult<ExecutionSummary>;

    /// Leave the hardware safe. Called once after every run.
    async fn shutdown(&mut self, ctx: &ProcedureContext) -> AppResult<()>;
}

// =============================================================================
// Procedure Context
// =============================================================================

/// Context provided to procedures for result reporting and cancellation.
#[derive(Clone)]
pub struct ProcedureContext {
    /// Procedure instance ID
    pub procedure_id: String,
    sink: Arc<dyn ResultSink>,
    cancel: CancellationToken,
}

impl ProcedureContext {
    /// Create a new procedure context
    pub fn new(sink: Arc<dyn ResultSink>, cancel: CancellationToken) -> Self {
        let procedure_id = format!("run-{}", chrono::Local::now().format("%Y%m%dT%H%M%S"));
        Self {
            procedure_id,
            sink,
            cancel,
        }
    }

    /// Report a record.
    pub fn emit(&self, emission: Emission) -> AppResult<()> {
        self.sink.emit(&emission)
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancellation handle shared with the operator.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

// =============================================================================
// Safe Procedure Execution
// =============================================================================

/// Run a procedure with guaranteed shutdown.
///
/// This wrapper ensures that:
/// 1. `execute()` only runs after a successful `startup()`
/// 2. `shutdown()` is always called exactly once afterwards
/// 3. The first error wins; a shutdown error is returned only if everything
///    before it succeeded
pub async fn run_procedure(
    procedure: &mut dyn Procedure,
    ctx: &ProcedureContext,
) -> AppResult<ProcedureResult> {
    let started = Instant::now();
    info!(procedure = procedure.name(), id = %ctx.procedure_id, "procedure starting");

    let outcome = match procedure.startup(ctx).await {
        Ok(()) => procedure.execute(ctx).await,
        Err(e) => {
            error!(procedure = procedure.name(), error = %e, "startup failed");
            Err(e)
        }
    };

    // Always shut down, regardless of outcome
    let shutdown = procedure.shutdown(ctx).await;
    if let Err(e) = &shutdown {
        error!(procedure = procedure.name(), error = %e, "shutdown failed");
    }

    let summary = outcome?;
    shutdown?;

    let result = ProcedureResult {
        procedure: procedure.name().to_string(),
        total_points: summary.total_points,
        points_measured: summary.points_measured,
        cancelled: summary.cancelled,
        elapsed: started.elapsed(),
    };
    info!(
        procedure = %result.procedure,
        measured = result.points_measured,
        total = result.total_points,
        cancelled = result.cancelled,
        "procedure finished"
    );
    Ok(result)
}

// =============================================================================
// Tests
// =============================================================================
