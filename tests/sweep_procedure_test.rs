//! Integration tests for the I-V sweep procedure
//!
//! The procedure runs against two `MockScpiTransport`s: a current source that
//! remembers its set-point and a nanovoltmeter whose `READ?` reply is computed
//! from it. Time is paused so settle times, delays and ramps cost nothing.

use iv_sweep::hardware::mock::{echo_current, ohmic_load, MockCall, MockScpiTransport, Responder};
use iv_sweep::procedures::{
    run_procedure, CancellationToken, Emission, InstrumentBench, IvSweep, MemorySink,
    Procedure, ProcedureContext, ProcedureSettings, ProcedureState, ResultSink, SweepConfig,
    SweepParameters,
};
use iv_sweep::{AppResult, DaqError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Helpers
// =============================================================================

fn bench_with(
    responder: impl FnOnce(Arc<MockScpiTransport>) -> Responder,
) -> (Arc<MockScpiTransport>, Arc<MockScpiTransport>, InstrumentBench) {
    let source = Arc::new(MockScpiTransport::new("GPIB::1"));
    let meter = Arc::new(
        MockScpiTransport::new("GPIB::25").with_responder("READ", responder(source.clone())),
    );
    let bench = InstrumentBench {
        meter: meter.clone(),
        source: source.clone(),
    };
    (meter, source, bench)
}

/// 0.1 A peak in 0.05 A steps, entered in the operator units.
fn half_peak_steps() -> SweepConfig {
    SweepConfig::from_parameters(&SweepParameters {
        max_current_ua: 1e5,
        current_step_na: 5e7,
        delay_ms: 10.0,
    })
    .unwrap()
}

/// Cancels its token once it has seen `after` measured points.
struct CancelAfter {
    token: CancellationToken,
    after: usize,
    seen: AtomicUsize,
    inner: MemorySink,
}

impl CancelAfter {
    fn new(token: CancellationToken, after: usize) -> Self {
        Self {
            token,
            after,
            seen: AtomicUsize::new(0),
            inner: MemorySink::new(),
        }
    }
}

impl ResultSink for CancelAfter {
    fn emit(&self, emission: &Emission) -> AppResult<()> {
        self.inner.emit(emission)?;
        if let Emission::Results(_) = emission {
            if self.seen.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
                self.token.cancel_with_reason("test");
            }
        }
        Ok(())
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_one_amp_peak_exceeds_the_source() {
    let err = SweepConfig::from_parameters(&SweepParameters {
        max_current_ua: 1e6,
        current_step_na: 5e8,
        delay_ms: 10.0,
    })
    .unwrap_err();
    assert!(matches!(err, DaqError::Configuration(_)), "{err:?}");
}

#[tokio::test(start_paused = true)]
async fn test_half_peak_scenario_emits_nine_echoed_points() {
    let (_meter, source, bench) = bench_with(echo_current);
    let sink = Arc::new(MemorySink::new());
    let ctx = ProcedureContext::new(sink.clone(), CancellationToken::new());
    let mut sweep = IvSweep::new(half_peak_steps(), ProcedureSettings::default(), bench);

    let result = run_procedure(&mut sweep, &ctx).await.unwrap();

    let samples = sink.samples();
    let currents: Vec<f64> = samples.iter().map(|s| s.current).collect();
    assert_eq!(
        currents,
        vec![0.0, 0.05, 0.1, 0.05, 0.0, -0.05, -0.1, -0.05, 0.0]
    );
    for (i, sample) in samples.iter().enumerate() {
        assert_eq!(sample.voltage, sample.current, "point {i}");
    }
    let set_points: Vec<String> = source
        .writes()
        .into_iter()
        .filter(|w| w.starts_with("CURRent "))
        .take(9)
        .collect();
    assert_eq!(
        set_points,
        [
            "CURRent 0", "CURRent 0.05", "CURRent 0.1", "CURRent 0.05", "CURRent 0",
            "CURRent -0.05", "CURRent -0.1", "CURRent -0.05", "CURRent 0",
        ]
    );
    assert_eq!(result.total_points, 9);
    assert!(result.is_complete());

    // Records alternate results / progress, ending on 100 %.
    let emissions = sink.emissions();
    assert_eq!(emissions.len(), 18);
    for pair in emissions.chunks(2) {
        assert_eq!(pair[0].kind(), "results");
        assert_eq!(pair[1].kind(), "progress");
    }
    let progress = sink.progress();
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(progress.last().copied(), Some(100.0));
}

#[tokio::test(start_paused = true)]
async fn test_ohmic_load_gives_its_resistance() {
    let (_meter, _source, bench) = bench_with(|source| ohmic_load(source, 1000.0));
    let sink = Arc::new(MemorySink::new());
    let ctx = ProcedureContext::new(sink.clone(), CancellationToken::new());
    let config = SweepConfig::from_parameters(&SweepParameters {
        max_current_ua: 1.0,
        current_step_na: 500.0,
        delay_ms: 1.0,
    })
    .unwrap();
    let mut sweep = IvSweep::new(config, ProcedureSettings::default(), bench);

    run_procedure(&mut sweep, &ctx).await.unwrap();

    let samples = sink.samples();
    assert_eq!(samples.len(), 9);
    for sample in samples {
        if sample.current == 0.0 {
            assert!(sample.resistance.is_nan());
            assert_eq!(sample.voltage, 0.0);
        } else {
            assert!(
                (sample.resistance - 1000.0).abs() < 1e-6,
                "R = {} at I = {}",
                sample.resistance,
                sample.current
            );
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_second_record() {
    let (meter, source, bench) = bench_with(echo_current);
    let token = CancellationToken::new();
    let sink = Arc::new(CancelAfter::new(token.clone(), 2));
    let ctx = ProcedureContext::new(sink.clone(), token.clone());
    let settings = ProcedureSettings::default();
    let mut sweep = IvSweep::new(half_peak_steps(), settings, bench);

    let result = run_procedure(&mut sweep, &ctx).await.unwrap();

    assert!(result.cancelled);
    assert_eq!(result.points_measured, 2);
    assert!(!result.is_complete());
    assert_eq!(token.reason().as_deref(), Some("test"));

    assert_eq!(sink.inner.samples().len(), 2);
    let reads = meter.queries().iter().filter(|q| *q == "READ?").count();
    assert_eq!(reads, 2);

    // Two sweep set-points, then the shutdown ramp.
    assert_eq!(
        source.count_writes_matching("CURRent "),
        2 + settings.ramp_steps
    );
    assert_eq!(source.count_writes("OUTPUT OFF"), 1);
    assert_eq!(source.writes().last().map(String::as_str), Some("OUTPUT OFF"));
    assert_eq!(sweep.state(), ProcedureState::Done);
}

#[tokio::test(start_paused = true)]
async fn test_failed_meter_setup_still_switches_source_off() {
    let (meter, source, bench) = bench_with(echo_current);
    source.set_register("CURRent", "1.000000E-06");
    meter.fail_writes_matching("SENSe:VOLTage");
    let sink = Arc::new(MemorySink::new());
    let ctx = ProcedureContext::new(sink.clone(), CancellationToken::new());
    let mut sweep = IvSweep::new(SweepConfig::default(), ProcedureSettings::default(), bench);

    let err = run_procedure(&mut sweep, &ctx).await.unwrap_err();
    assert!(matches!(err, DaqError::Transport(_)));
    assert!(sink.emissions().is_empty());

    // The unknown set-point is read back before ramping down from it.
    assert!(source.queries().iter().any(|q| q == "CURRent?"));
    assert_eq!(source.count_writes("OUTPUT OFF"), 1);
    assert_eq!(source.count_writes("OUTPUT ON"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unparseable_reading_aborts_and_shuts_down() {
    let (_meter, source, bench) = bench_with(|_| -> Responder { Arc::new(|| "12.5".to_string()) });
    let sink = Arc::new(MemorySink::new());
    let ctx = ProcedureContext::new(sink.clone(), CancellationToken::new());
    let mut sweep = IvSweep::new(SweepConfig::default(), ProcedureSettings::default(), bench);

    let err = run_procedure(&mut sweep, &ctx).await.unwrap_err();
    assert!(err.is_protocol());
    assert!(sink.samples().is_empty());
    assert_eq!(source.count_writes("OUTPUT OFF"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_each_reading_follows_its_set_point_after_the_delay() {
    let (meter, source, bench) = bench_with(echo_current);
    let sink = Arc::new(MemorySink::new());
    let ctx = ProcedureContext::new(sink.clone(), CancellationToken::new());
    let config = half_peak_steps();
    let delay = config.delay();
    let mut sweep = IvSweep::new(config, ProcedureSettings::default(), bench);

    run_procedure(&mut sweep, &ctx).await.unwrap();

    let set_points: Vec<_> = source
        .timed_calls()
        .into_iter()
        .filter(|(_, call)| matches!(call, MockCall::Write(cmd) if cmd.starts_with("CURRent ")))
        .map(|(at, _)| at)
        .take(9)
        .collect();
    let readings: Vec<_> = meter
        .timed_calls()
        .into_iter()
        .filter(|(_, call)| matches!(call, MockCall::Query(cmd) if cmd == "READ?"))
        .map(|(at, _)| at)
        .collect();
    assert_eq!(set_points.len(), 9);
    assert_eq!(readings.len(), 9);

    for (i, (set_at, read_at)) in set_points.iter().zip(&readings).enumerate() {
        assert!(*read_at >= *set_at + delay, "point {i} read too early");
        if let Some(next_set) = set_points.get(i + 1) {
            assert!(read_at <= next_set, "point {i} read after the next set-point");
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_startup_waits_for_settle_time() {
    let (meter, source, bench) = bench_with(echo_current);
    let sink = Arc::new(MemorySink::new());
    let ctx = ProcedureContext::new(sink, CancellationToken::new());
    let settings = ProcedureSettings {
        settle_time: Duration::from_secs(5),
        ..Default::default()
    };
    let mut sweep = IvSweep::new(half_peak_steps(), settings, bench);

    run_procedure(&mut sweep, &ctx).await.unwrap();

    let output_on = source
        .timed_calls()
        .into_iter()
        .find(|(_, call)| call.command() == "OUTPUT ON")
        .map(|(at, _)| at)
        .unwrap();
    let first_read = meter
        .timed_calls()
        .into_iter()
        .find(|(_, call)| call.command() == "READ?")
        .map(|(at, _)| at)
        .unwrap();
    assert!(first_read >= output_on + Duration::from_secs(5));
}
