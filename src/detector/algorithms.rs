//! Single-algorithm anomaly checks.
//!
//! Every algorithm shares one scoring shape: a "measure" (a z-like distance)
//! compared against a threshold via the same logistic curve, so scores from
//! different algorithms stay comparable under `Detector`'s `max(scores)`
//! combination rule.

use crate::model::{AnomalyKind, Baseline};
use crate::stats::{mad, mean, median, percentile, stddev};
use chrono::{DateTime, Datelike, Timelike, Utc};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// One algorithm's verdict on a single value.
#[derive(Debug, Clone)]
pub struct AlgoOutcome {
    pub name: &'static str,
    pub kind: AnomalyKind,
    pub triggered: bool,
    pub score: f64,
}

/// `1 / (1 + exp(threshold - measure))` — score crosses 0.5 exactly at the
/// trigger boundary, shared by every algorithm below.
fn logistic_score(measure: f64, threshold: f64) -> f64 {
    1.0 / (1.0 + (threshold - measure).exp())
}

/// Statistical (z-score) check.
pub fn statistical(value: f64, mean: f64, stddev: f64, t: f64) -> Option<AlgoOutcome> {
    if stddev == 0.0 {
        return None;
    }
    let z = (value - mean).abs() / stddev;
    let kind = if value > mean { AnomalyKind::Spike } else { AnomalyKind::Drop };
    Some(AlgoOutcome {
        name: "statistical",
        kind,
        triggered: z > t,
        score: logistic_score(z, t),
    })
}

/// MAD (robust variant) check.
pub fn mad_algorithm(value: f64, window_values: &[f64], t: f64) -> Option<AlgoOutcome> {
    if window_values.is_empty() {
        return None;
    }
    let m = median(window_values);
    let deviation = mad(window_values, m);
    if deviation == 0.0 {
        return None;
    }
    let modified_z = (0.6745 * (value - m) / deviation).abs();
    let threshold = t * 1.17;
    Some(AlgoOutcome {
        name: "mad",
        kind: AnomalyKind::Outlier,
        triggered: modified_z > threshold,
        score: logistic_score(modified_z, threshold),
    })
}

/// IQR check. `k` is the fence multiplier (default `1.5`, `3.0` for "extreme").
pub fn iqr(value: f64, sorted_window: &[f64], k: f64) -> Option<AlgoOutcome> {
    if sorted_window.len() < 4 {
        return None;
    }
    let q1 = percentile(sorted_window, 25.0);
    let q3 = percentile(sorted_window, 75.0);
    let spread = q3 - q1;
    if spread == 0.0 {
        return None;
    }
    let lower = q1 - k * spread;
    let upper = q3 + k * spread;
    let distance = if value < lower {
        (lower - value) / spread
    } else if value > upper {
        (value - upper) / spread
    } else {
        0.0
    };
    Some(AlgoOutcome {
        name: "iqr",
        kind: AnomalyKind::Outlier,
        triggered: value < lower || value > upper,
        score: logistic_score(distance, 0.0),
    })
}

/// Grubbs check. Requires >= 7 samples; critical value from the Student's t
/// quantile via `statrs`, the two-sided Grubbs test formula.
pub fn grubbs(value: f64, window_values: &[f64], mean: f64, stddev: f64, alpha: f64) -> Option<AlgoOutcome> {
    let n = window_values.len();
    if n < 7 || stddev == 0.0 {
        return None;
    }
    let g = (value - mean).abs() / stddev;
    let n_f = n as f64;
    let df = (n - 2) as f64;
    let t_dist = StudentsT::new(0.0, 1.0, df).ok()?;
    let t_crit = t_dist.inverse_cdf(1.0 - alpha / (2.0 * n_f));
    let g_crit = ((n_f - 1.0) / n_f.sqrt()) * (t_crit * t_crit / (df + t_crit * t_crit)).sqrt();
    Some(AlgoOutcome {
        name: "grubbs",
        kind: AnomalyKind::Outlier,
        triggered: g > g_crit,
        score: logistic_score(g, g_crit),
    })
}

/// Seasonal check. Requires `baseline.seasonal.has_seasonality`.
pub fn seasonal(value: f64, baseline: &Baseline, ts: DateTime<Utc>, t: f64, threshold_factor: f64) -> Option<AlgoOutcome> {
    let seasonal = baseline.seasonal.as_ref()?;
    if !seasonal.has_seasonality || baseline.stddev == 0.0 {
        return None;
    }
    let hourly = seasonal.hourly[ts.hour() as usize];
    let daily = seasonal.daily[ts.weekday().num_days_from_monday() as usize];
    let expected = 0.7 * hourly + 0.3 * daily;
    let deviation = (value - expected).abs() / baseline.stddev;
    let threshold = t * threshold_factor;
    Some(AlgoOutcome {
        name: "seasonal",
        kind: AnomalyKind::Seasonal,
        triggered: deviation > threshold,
        score: logistic_score(deviation, threshold),
    })
}

/// Convenience used by tests and callers that want a plain mean/stddev pair
/// without going through a `Baseline`.
pub fn sample_stats(values: &[f64]) -> (f64, f64) {
    (mean(values), stddev(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SeasonalBaseline;

    #[test]
    fn statistical_flags_spike_above_mean() {
        let outcome = statistical(130.0, 100.0, 10.0, 3.0).unwrap();
        assert!(outcome.triggered);
        assert_eq!(outcome.kind, AnomalyKind::Spike);
    }

    #[test]
    fn statistical_zero_stddev_is_non_anomaly() {
        assert!(statistical(100.0, 100.0, 0.0, 3.0).is_none());
    }

    #[test]
    fn iqr_needs_four_samples() {
        assert!(iqr(10.0, &[1.0, 2.0, 3.0], 1.5).is_none());
    }

    #[test]
    fn grubbs_needs_seven_samples() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert!(grubbs(100.0, &values, 3.5, 1.7, 0.05).is_none());
    }

    #[test]
    fn seasonal_requires_has_seasonality() {
        let baseline = Baseline {
            metric: "m".into(),
            window: chrono::Duration::hours(24),
            mean: 100.0,
            stddev: 10.0,
            min: 0.0,
            max: 0.0,
            p50: 0.0,
            p90: 0.0,
            p99: 0.0,
            sample_count: 1000,
            seasonal: Some(SeasonalBaseline {
                hourly: [100.0; 24],
                hourly_counts: [10; 24],
                daily: [100.0; 7],
                daily_counts: [10; 7],
                has_seasonality: false,
            }),
        };
        assert!(seasonal(200.0, &baseline, Utc::now(), 3.0, 0.8).is_none());
    }
}
