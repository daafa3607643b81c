//! Shared statistical primitives used by `store` aggregation, `baseline`
//! summaries, and `detector` algorithms.
//!
//! Sample variance (divide by `n - 1`) is used throughout, matching the
//! teacher's `BaselineAccumulator::variance()` convention.

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    sum_sq / (values.len() - 1) as f64
}

pub fn stddev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Linear-interpolation percentile over a value list. `p` is in `[0, 100]`.
/// Percentiles via linear interpolation on the sorted value list.
pub fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }
    if sorted_values.len() == 1 {
        return sorted_values[0];
    }
    let rank = (p / 100.0) * (sorted_values.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted_values[lower];
    }
    let frac = rank - lower as f64;
    sorted_values[lower] + frac * (sorted_values[upper] - sorted_values[lower])
}

pub fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    percentile(&sorted, 50.0)
}

/// Median absolute deviation (the robust MAD variant).
pub fn mad(values: &[f64], center: f64) -> f64 {
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}
