//! Baselines.
//!
//! Rolling mean/stddev/percentile summaries plus seasonal (hour-of-day,
//! day-of-week) pattern maintenance, refreshed from `Store` and cached with
//! a short TTL. Each cache entry is independently locked, grounded on
//! the teacher's `DynamicThresholds`/`BaselineAccumulator` split (a learned
//! summary plus a separate running accumulator), adapted from a Welford
//! online accumulator to a window-refresh-from-storage model since baselines
//! rather than accumulated forever in memory.

use crate::model::{Baseline, Labels, SeasonalBaseline, SeriesKey};
use crate::stats::{mean, percentile, stddev};
use crate::store::Store;
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Between-bucket variance must exceed within-bucket variance by this factor
/// for a series to be considered seasonal (documented factor, >= 2x).
pub const SEASONALITY_VARIANCE_FACTOR: f64 = 2.0;

struct CachedEntry {
    baseline: Baseline,
    fetched_at: DateTime<Utc>,
}

/// Computes and caches `Baseline`s on demand from `Store` aggregations.
pub struct Baselines {
    store: Arc<Store>,
    window: chrono::Duration,
    min_samples_per_bucket: u64,
    ttl: chrono::Duration,
    cache: RwLock<HashMap<SeriesKey, Arc<RwLock<CachedEntry>>>>,
}

impl Baselines {
    pub fn new(
        store: Arc<Store>,
        window: chrono::Duration,
        min_samples_per_bucket: u64,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            store,
            window,
            min_samples_per_bucket,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Returns a fresh-enough baseline for `(metric, labels)`, recomputing
    /// from `Store` when the cached entry has expired.
    pub async fn get(&self, metric: &str, labels: &Labels, now: DateTime<Utc>) -> Baseline {
        let key = SeriesKey::new(metric, labels);

        let existing = {
            let cache = self.cache.read().await;
            cache.get(&key).cloned()
        };

        if let Some(entry) = &existing {
            let guard = entry.read().await;
            if now - guard.fetched_at < self.ttl {
                return guard.baseline.clone();
            }
        }

        let fresh = self.compute(metric, labels, now).await;

        let entry = {
            let mut cache = self.cache.write().await;
            cache
                .entry(key)
                .or_insert_with(|| {
                    Arc::new(RwLock::new(CachedEntry {
                        baseline: fresh.clone(),
                        fetched_at: now,
                    }))
                })
                .clone()
        };
        let mut guard = entry.write().await;
        guard.baseline = fresh.clone();
        guard.fetched_at = now;
        fresh
    }

    async fn compute(&self, metric: &str, labels: &Labels, now: DateTime<Utc>) -> Baseline {
        let from = now - self.window;
        let points = self
            .store
            .raw_values(metric, from, now, Some(labels))
            .await
            .unwrap_or_default();

        let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
        let mut sorted = values.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let seasonal = compute_seasonal(&points, self.min_samples_per_bucket);

        Baseline {
            metric: metric.to_string(),
            window: self.window,
            mean: mean(&values),
            stddev: stddev(&values),
            min: sorted.first().copied().unwrap_or(0.0),
            max: sorted.last().copied().unwrap_or(0.0),
            p50: percentile(&sorted, 50.0),
            p90: percentile(&sorted, 90.0),
            p99: percentile(&sorted, 99.0),
            sample_count: values.len(),
            seasonal: Some(seasonal),
        }
    }
}

/// Aggregate `(ts, value)` points into hour-of-day / day-of-week buckets and
/// decide whether the series shows a seasonal pattern.
fn compute_seasonal(points: &[(DateTime<Utc>, f64)], min_samples_per_bucket: u64) -> SeasonalBaseline {
    let mut hourly_values: [Vec<f64>; 24] = Default::default();
    let mut daily_values: [Vec<f64>; 7] = Default::default();

    for (ts, value) in points {
        hourly_values[ts.hour() as usize].push(*value);
        // `num_days_from_monday()` gives a stable 0..=6 index for UTC timestamps.
        daily_values[ts.weekday().num_days_from_monday() as usize].push(*value);
    }

    let hourly: [f64; 24] = std::array::from_fn(|i| mean(&hourly_values[i]));
    let hourly_counts: [u64; 24] = std::array::from_fn(|i| hourly_values[i].len() as u64);
    let daily: [f64; 7] = std::array::from_fn(|i| mean(&daily_values[i]));
    let daily_counts: [u64; 7] = std::array::from_fn(|i| daily_values[i].len() as u64);

    let all_buckets_populated = hourly_counts.iter().all(|&c| c >= min_samples_per_bucket)
        && daily_counts.iter().all(|&c| c >= min_samples_per_bucket);

    let has_seasonality = all_buckets_populated
        && bucket_variance_test(&hourly_values, &hourly)
        && bucket_variance_test(&daily_values, &daily);

    SeasonalBaseline {
        hourly,
        hourly_counts,
        daily,
        daily_counts,
        has_seasonality,
    }
}

/// Between-bucket variance of the bucket means vs. the average within-bucket
/// variance, gated by [`SEASONALITY_VARIANCE_FACTOR`].
fn bucket_variance_test(buckets: &[Vec<f64>], bucket_means: &[f64]) -> bool {
    let within: Vec<f64> = buckets
        .iter()
        .filter(|b| b.len() >= 2)
        .map(|b| crate::stats::variance(b))
        .collect();
    if within.is_empty() {
        return false;
    }
    let within_avg = within.iter().sum::<f64>() / within.len() as f64;
    let between = crate::stats::variance(bucket_means);
    within_avg > 0.0 && between > within_avg * SEASONALITY_VARIANCE_FACTOR
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration as StdDuration;

    async fn store_with(values: &[f64]) -> (Arc<Store>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path(), 1000, StdDuration::from_millis(10)).unwrap());
        let now = Utc::now();
        for (i, v) in values.iter().enumerate() {
            store.record("m", *v, BTreeMap::new(), now - chrono::Duration::seconds(i as i64));
        }
        tokio::time::sleep(StdDuration::from_millis(40)).await;
        (store, dir)
    }

    #[tokio::test]
    async fn baseline_not_ready_below_min_samples() {
        let (store, _dir) = store_with(&[1.0, 2.0, 3.0]).await;
        let baselines = Baselines::new(store, chrono::Duration::hours(24), 5, chrono::Duration::seconds(60));
        let baseline = baselines.get("m", &Labels::new(), Utc::now()).await;
        assert!(!baseline.is_ready(100));
    }

    #[tokio::test]
    async fn baseline_stats_match_known_input() {
        let (store, _dir) = store_with(&[10.0, 20.0, 30.0]).await;
        let baselines = Baselines::new(store, chrono::Duration::hours(24), 5, chrono::Duration::seconds(60));
        let baseline = baselines.get("m", &Labels::new(), Utc::now()).await;
        assert_eq!(baseline.mean, 20.0);
        assert_eq!(baseline.sample_count, 3);
    }

    #[tokio::test]
    async fn cached_entry_reused_within_ttl() {
        let (store, _dir) = store_with(&[1.0, 2.0, 3.0]).await;
        let baselines = Baselines::new(store.clone(), chrono::Duration::hours(24), 5, chrono::Duration::seconds(60));
        let now = Utc::now();
        let first = baselines.get("m", &Labels::new(), now).await;
        store.record("m", 999.0, Labels::new(), now);
        let second = baselines.get("m", &Labels::new(), now + chrono::Duration::seconds(1)).await;
        assert_eq!(first.sample_count, second.sample_count, "must be served from cache inside the TTL");
    }

    #[test]
    fn no_seasonality_without_any_points() {
        let points: Vec<(DateTime<Utc>, f64)> = vec![];
        let seasonal = compute_seasonal(&points, 5);
        assert!(!seasonal.has_seasonality);
    }
}
