//! Triangular current waveform.
//!
//! The sweep visits `0 → +max → 0 → −max → 0` in steps of `step`. With
//! `n = ceil(max / step)` one quarter of the triangle is
//!
//! ```text
//! q(0) = 0,  q(k) = k·step (0 < k < n),  q(n) = max
//! ```
//!
//! and the full waveform is `q(0..=n)`, `q(n-1..=0)`, `−q(1..=n)`, `−q(n-1..=1)`, `0`,
//! i.e. `4n + 1` points that start and end on exactly zero. Every positive
//! set-point has its exact negation in the waveform.

use crate::error::{AppResult, DaqError};
use serde::Serialize;

/// Longest waveform accepted.
pub const MAX_POINTS: usize = 1_000_000;

/// Ratios this close (relative) to an integer count as that integer, so that
/// `1e-7 / 1e-8` yields 10 steps rather than 11.
const RATIO_TOLERANCE: f64 = 1e-9;

/// Ordered current set-points in amps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentWaveform {
    max: f64,
    step: f64,
    points: Vec<f64>,
}

/// Number of steps per quarter ramp, `ceil(max / step)`.
pub fn quarter_steps(max: f64, step: f64) -> AppResult<usize> {
    if !(max.is_finite() && max > 0.0) {
        return Err(DaqError::Configuration(format!(
            "maximum current must be positive, got {max}"
        )));
    }
    if !(step.is_finite() && step > 0.0) {
        return Err(DaqError::Configuration(format!(
            "current step must be positive, got {step}"
        )));
    }
    if step > max {
        return Err(DaqError::Configuration(format!(
            "current step {step} A exceeds maximum current {max} A"
        )));
    }

    let ratio = max / step;
    let nearest = ratio.round();
    let n = if (ratio - nearest).abs() <= RATIO_TOLERANCE * nearest.max(1.0) {
        nearest
    } else {
        ratio.ceil()
    };
    // (MAX_POINTS - 1) / 4 bounds n before the cast.
    if n > ((MAX_POINTS - 1) / 4) as f64 {
        return Err(DaqError::Configuration(format!(
            "{max} A in steps of {step} A needs more than {MAX_POINTS} points"
        )));
    }
    Ok((n as usize).max(1))
}

/// Length of the waveform for `(max, step)` without building it.
pub fn expected_len(max: f64, step: f64) -> AppResult<usize> {
    Ok(4 * quarter_steps(max, step)? + 1)
}

impl CurrentWaveform {
    /// Build the triangle for `max` and `step`, both in amps.
    pub fn triangle(max: f64, step: f64) -> AppResult<Self> {
        let n = quarter_steps(max, step)?;
        let q = |k: usize| -> f64 {
            if k == 0 {
                0.0
            } else if k >= n {
                max
            } else {
                k as f64 * step
            }
        };

        let mut points = Vec::with_capacity(4 * n + 1);
        points.extend((0..=n).map(q));
        points.extend((0..n).rev().map(q));
        points.extend((1..=n).map(|k| -q(k)));
        points.extend((1..n).rev().map(|k| -q(k)));
        points.push(0.0);

        Ok(Self { max, step, points })
    }

    /// Peak current in amps.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Step in amps.
    pub fn step(&self) -> f64 {
        self.step
    }

    /// Set-points in order.
    pub fn points(&self) -> &[f64] {
        &self.points
    }

    /// Number of set-points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether there are no set-points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Iterate over the set-points.
    pub fn iter(&self) -> std::slice::Iter<'_, f64> {
        self.points.iter()
    }
}

impl<'a> IntoIterator for &'a CurrentWaveform {
    type Item = &'a f64;
    type IntoIter = std::slice::Iter<'a, f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}
