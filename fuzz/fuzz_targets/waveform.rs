//! Fuzz target for waveform construction.
//!
//! Tests:
//! - Any (max, step) either fails cleanly or yields `4n + 1` points
//! - The waveform starts and ends on zero and never exceeds `max`
//! - Every positive set-point has its negation

#![no_main]

use arbitrary::Arbitrary;
use iv_sweep::procedures::waveform::{expected_len, CurrentWaveform};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct SweepInput {
    max: f64,
    step: f64,
}

fuzz_target!(|input: SweepInput| {
    let Ok(waveform) = CurrentWaveform::triangle(input.max, input.step) else {
        assert!(expected_len(input.max, input.step).is_err());
        return;
    };

    let points = waveform.points();
    assert_eq!(Ok(points.len()), expected_len(input.max, input.step).map_err(|_| ()));
    assert_eq!((points.len() - 1) % 4, 0);
    assert_eq!(points.first().copied(), Some(0.0));
    assert_eq!(points.last().copied(), Some(0.0));

    assert!(points.iter().all(|p| p.abs() <= input.max));

    // Quadratic check, so only for short sweeps.
    if points.len() <= 4_001 {
        for &p in points.iter().filter(|p| **p > 0.0) {
            assert!(points.contains(&-p));
        }
    }
});
