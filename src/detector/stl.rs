//! STL-style batch decomposition.
//!
//! Classical (non-iterative) additive decomposition: a centered moving
//! average gives the trend, per-phase means of the detrended series give the
//! seasonal component (re-centered to zero), and what's left is residual.

use crate::stats::{mean, stddev};

#[derive(Debug, Clone)]
pub struct StlResult {
    pub trend: Vec<f64>,
    pub seasonal: Vec<f64>,
    pub residual: Vec<f64>,
}

impl StlResult {
    /// Indices whose residual's z-score (against the residual mean/stddev)
    /// exceeds `t`: a residual outlier.
    pub fn residual_outliers(&self, t: f64) -> Vec<bool> {
        let m = mean(&self.residual);
        let sd = stddev(&self.residual);
        if sd == 0.0 {
            return vec![false; self.residual.len()];
        }
        self.residual
            .iter()
            .map(|r| (r - m).abs() / sd > t)
            .collect()
    }
}

/// Decompose `values` with seasonal `period`. Requires `n >= 2 * period`.
pub fn decompose(values: &[f64], period: usize) -> Option<StlResult> {
    let n = values.len();
    if period == 0 || n < 2 * period {
        return None;
    }

    let trend = centered_moving_average(values, period);
    let detrended: Vec<f64> = values.iter().zip(&trend).map(|(v, t)| v - t).collect();

    let mut phase_means = vec![0.0; period];
    for phase in 0..period {
        let phase_values: Vec<f64> = detrended
            .iter()
            .enumerate()
            .filter(|(i, _)| i % period == phase)
            .map(|(_, v)| *v)
            .collect();
        phase_means[phase] = mean(&phase_values);
    }
    let recenter = mean(&phase_means);
    for m in &mut phase_means {
        *m -= recenter;
    }

    let seasonal: Vec<f64> = (0..n).map(|i| phase_means[i % period]).collect();
    let residual: Vec<f64> = values
        .iter()
        .zip(&trend)
        .zip(&seasonal)
        .map(|((v, t), s)| v - t - s)
        .collect();

    Some(StlResult { trend, seasonal, residual })
}

/// Centered moving average of `width` samples, clamped at the series edges
/// so the output has the same length as the input.
fn centered_moving_average(values: &[f64], width: usize) -> Vec<f64> {
    let n = values.len();
    let half = width / 2;
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half).min(n.saturating_sub(1));
            mean(&values[lo..=hi])
        })
        .collect()
}
