//! Current-voltage sweep.
//!
//! Drives a current source through a triangular waveform and reads the voltage
//! across the sample with a nanovoltmeter at every set-point.
//!
//! Per point: set current → wait `delay` → measure → emit `results` → emit
//! `progress` → check for cancellation.

use crate::error::{AppResult, DaqError};
use crate::hardware::current_source::{CurrentSource, DEFAULT_RAMP_PAUSE, DEFAULT_RAMP_STEPS};
use crate::hardware::nanovoltmeter::{Nanovoltmeter, DEFAULT_NPLC};
use crate::hardware::transport::ScpiTransport;
use crate::procedures::config::SweepConfig;
use crate::procedures::result::{Emission, MeasurementSample};
use crate::procedures::{ExecutionSummary, Procedure, ProcedureContext, ProcedureState};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Transports to the two instruments of the setup.
#[derive(Clone)]
pub struct InstrumentBench {
    /// Nanovoltmeter.
    pub meter: Arc<dyn ScpiTransport>,
    /// Current source.
    pub source: Arc<dyn ScpiTransport>,
}

/// Instrument settings that are not sweep parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcedureSettings {
    /// Wait after enabling the output before the first point.
    pub settle_time: Duration,
    /// Compliance voltage of the source (V).
    pub compliance_voltage: f64,
    /// Steps of the ramp to zero at shutdown.
    pub ramp_steps: usize,
    /// Pause between ramp steps.
    pub ramp_pause: Duration,
    /// Meter integration time (power-line cycles).
    pub nplc: f64,
    /// Readings averaged per point.
    pub measurement_iterations: u32,
}

impl Default for ProcedureSettings {
    fn default() -> Self {
        Self {
            settle_time: Duration::from_secs(2),
            compliance_voltage: 100.0,
            ramp_steps: DEFAULT_RAMP_STEPS,
            ramp_pause: DEFAULT_RAMP_PAUSE,
            nplc: DEFAULT_NPLC,
            measurement_iterations: 1,
        }
    }
}

/// The I-V sweep procedure.
pub struct IvSweep {
    config: SweepConfig,
    settings: ProcedureSettings,
    bench: InstrumentBench,
    meter: Option<Nanovoltmeter>,
    source: Option<CurrentSource>,
    state: ProcedureState,
}

impl IvSweep {
    /// Prepare a sweep; no instrument is touched until startup.
    pub fn new(config: SweepConfig, settings: ProcedureSettings, bench: InstrumentBench) -> Self {
        Self {
            config,
            settings,
            bench,
            meter: None,
            source: None,
            state: ProcedureState::Idle,
        }
    }

    /// Sweep configuration.
    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Nanovoltmeter session, once started.
    pub fn meter(&self) -> Option<&Nanovoltmeter> {
        self.meter.as_ref()
    }

    /// Current source session, once started.
    pub fn source(&self) -> Option<&CurrentSource> {
        self.source.as_ref()
    }
}

#[async_trait]
impl Procedure for IvSweep {
    fn name(&self) -> &str {
        "iv_sweep"
    }

    fn state(&self) -> ProcedureState {
        self.state
    }

    async fn startup(&mut self, _ctx: &ProcedureContext) -> AppResult<()> {
        self.state = ProcedureState::Starting;
        info!("Setting up instruments");

        // Both sessions exist before the first command so shutdown can always
        // reach the source.
        let source = self.source.insert(
            CurrentSource::new(self.bench.source.clone())
                .with_shutdown_ramp(self.settings.ramp_steps, self.settings.ramp_pause),
        );
        let meter = self
            .meter
            .insert(Nanovoltmeter::new(self.bench.meter.clone()).with_nplc(self.settings.nplc));
        meter.setup().await?;

        source.reset().await?;
        source.enable_auto_range().await?;
        source
            .set_current_range(self.config.max_current().as_amps())
            .await?;
        source
            .set_compliance_voltage(self.settings.compliance_voltage)
            .await?;
        source.enable_source().await?;

        debug!(settle = ?self.settings.settle_time, "waiting for output to settle");
        sleep(self.settings.settle_time).await;
        Ok(())
    }

    async fn execute(&mut self, ctx: &ProcedureContext) -> AppResult<ExecutionSummary> {
        self.state = ProcedureState::Running;
        let waveform = self.config.waveform()?;
        let total_points = waveform.len();
        let delay = self.config.delay();
        let iterations = self.settings.measurement_iterations;

        let (Some(meter), Some(source)) = (self.meter.as_mut(), self.source.as_mut()) else {
            return Err(DaqError::Configuration(
                "execute called before startup".into(),
            ));
        };

        let mut summary = ExecutionSummary {
            total_points,
            ..Default::default()
        };

        info!(points = total_points, "Starting to sweep through current");
        for (index, &current) in waveform.iter().enumerate() {
            debug!(current, "Measuring current");
            let applied = source.set_current(current).await?;
            sleep(delay).await;

            let voltage = meter.measure_voltage(iterations).await?;
            ctx.emit(Emission::Results(MeasurementSample::new(applied, voltage)))?;
            ctx.emit(Emission::Progress(
                100.0 * (index + 1) as f64 / total_points as f64,
            ))?;
            summary.points_measured += 1;

            if ctx.is_cancelled() {
                warn!(
                    measured = summary.points_measured,
                    "Catch stop command in procedure"
                );
                summary.cancelled = true;
                break;
            }
        }
        Ok(summary)
    }

    async fn shutdown(&mut self, _ctx: &ProcedureContext) -> AppResult<()> {
        self.state = ProcedureState::Stopping;
        let result = match self.source.as_mut() {
            Some(source) => source.shutdown().await,
            None => Ok(()),
        };
        self.state = ProcedureState::Done;
        info!("Finished");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::current_source::MAX_OUTPUT_CURRENT;
    use crate::hardware::mock::{echo_current, MockScpiTransport};
    use crate::procedures::{run_procedure, CancellationToken, MemorySink};

    fn bench() -> (Arc<MockScpiTransport>, Arc<MockScpiTransport>, InstrumentBench) {
        let source = Arc::new(MockScpiTransport::new("GPIB::1"));
        let meter = Arc::new(
            MockScpiTransport::new("GPIB::25").with_responder("READ", echo_current(source.clone())),
        );
        let bench = InstrumentBench {
            meter: meter.clone(),
            source: source.clone(),
        };
        (meter, source, bench)
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_sequence() {
        let (_meter, source, bench) = bench();
        let mut sweep = IvSweep::new(SweepConfig::default(), ProcedureSettings::default(), bench);
        let ctx = ProcedureContext::new(Arc::new(MemorySink::new()), CancellationToken::new());

        sweep.startup(&ctx).await.unwrap();
        assert_eq!(sweep.state(), ProcedureState::Starting);
        let range = format!(
            "CURRent:RANGe:AUTO 0;CURRent:RANGe {}",
            sweep.config().max_current().as_amps()
        );
        assert_eq!(
            source.writes(),
            vec![
                "*RST",
                "*CLS",
                "CURRent:RANGe:AUTO 1",
                range.as_str(),
                "CURRent:COMPliance 100",
                "OUTPUT ON",
            ]
        );
        let source_session = sweep.source().unwrap();
        assert_eq!(source_session.auto_range(), Some(false));
        assert!(source_session.is_output_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_before_startup_fails() {
        let (_meter, _source, bench) = bench();
        let mut sweep = IvSweep::new(SweepConfig::default(), ProcedureSettings::default(), bench);
        let ctx = ProcedureContext::new(Arc::new(MemorySink::new()), CancellationToken::new());
        assert!(sweep.execute(&ctx).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_carry_the_current_the_source_applied() {
        let (_meter, source, bench) = bench();
        let sink = Arc::new(MemorySink::new());
        let ctx = ProcedureContext::new(sink.clone(), CancellationToken::new());
        let config = SweepConfig::unchecked_amps(1.0, 0.5, Duration::from_millis(10));
        let mut sweep = IvSweep::new(config, ProcedureSettings::default(), bench);

        run_procedure(&mut sweep, &ctx).await.unwrap();

        assert_eq!(source.writes()[3], "CURRent:RANGe:AUTO 0;CURRent:RANGe 0.105");
        let samples = sink.samples();
        assert_eq!(samples.len(), 9);
        for s in &samples {
            assert_eq!(s.current, s.voltage);
            assert!(s.current.abs() <= MAX_OUTPUT_CURRENT);
        }
        let currents: Vec<f64> = samples.iter().map(|s| s.current).collect();
        assert_eq!(
            currents,
            vec![0.0, 0.105, 0.105, 0.105, 0.0, -0.105, -0.105, -0.105, 0.0]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_sweep_runs_to_completion() {
        let (_meter, source, bench) = bench();
        let sink = Arc::new(MemorySink::new());
        let ctx = ProcedureContext::new(sink.clone(), CancellationToken::new());
        let mut sweep = IvSweep::new(SweepConfig::default(), ProcedureSettings::default(), bench);

        let result = run_procedure(&mut sweep, &ctx).await.unwrap();
        assert_eq!(result.total_points, 41);
        assert!(result.is_complete());
        assert_eq!(sink.samples().len(), 41);
        assert_eq!(sink.progress().last().copied(), Some(100.0));
        assert_eq!(source.count_writes("OUTPUT OFF"), 1);
        assert_eq!(sweep.state(), ProcedureState::Done);
    }
}
