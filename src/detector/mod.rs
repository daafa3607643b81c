//! Detector.
//!
//! Combines the configured subset of algorithms against a series' `Baseline`
//! and dispatches confirmed anomalies to an optionally-registered callback,
//! the capability-injection shape the teacher uses for `HealthCheck` trait
//! objects in `background/self_healer.rs`.

pub mod algorithms;
pub mod stl;

use crate::baseline::Baselines;
use crate::config::{Algorithm, DetectorConfig};
use crate::error::CoreResult;
use crate::model::{Anomaly, AnomalyId, AnomalyKind, Labels};
use crate::store::Store;
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// An anomaly callback — invoked at most once per confirmed anomaly, before
/// `detect()` returns. An anomaly callback may be registered.
pub type AnomalyCallback = dyn Fn(&Anomaly) + Send + Sync;

/// `detect(metric, value, ts, labels)`'s return value.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub is_anomaly: bool,
    pub kind: Option<AnomalyKind>,
    pub score: f64,
    pub algorithms_triggered: Vec<String>,
    pub explanation: String,
    pub expected_range: (f64, f64),
}

impl DetectionResult {
    fn non_anomaly(explanation: &str) -> Self {
        Self {
            is_anomaly: false,
            kind: None,
            score: 0.0,
            algorithms_triggered: Vec::new(),
            explanation: explanation.to_string(),
            expected_range: (0.0, 0.0),
        }
    }
}

/// Priority used to pick `kind` when multiple algorithms trigger —
/// Priority order when multiple algorithms trigger: seasonal > statistical > outlier.
fn kind_priority(kind: AnomalyKind) -> u8 {
    match kind {
        AnomalyKind::Seasonal => 0,
        AnomalyKind::Spike | AnomalyKind::Drop | AnomalyKind::Trend => 1,
        AnomalyKind::Outlier | AnomalyKind::Missing => 2,
    }
}

pub struct Detector {
    store: Arc<Store>,
    baselines: Arc<Baselines>,
    algorithms: Vec<Algorithm>,
    sensitivity_threshold: f64,
    min_data_points: usize,
    seasonal_threshold_factor: f64,
    baseline_window: chrono::Duration,
    callback: RwLock<Option<Arc<AnomalyCallback>>>,
}

impl Detector {
    pub fn new(store: Arc<Store>, baselines: Arc<Baselines>, config: &DetectorConfig) -> Self {
        Self {
            store,
            baselines,
            algorithms: config.algorithms.clone(),
            sensitivity_threshold: config.sensitivity.z_threshold(),
            min_data_points: config.min_data_points,
            seasonal_threshold_factor: config.seasonal_threshold_factor,
            baseline_window: chrono::Duration::seconds(config.baseline_window_secs),
            callback: RwLock::new(None),
        }
    }

    /// Registers (or replaces) the anomaly callback.
    pub fn set_anomaly_callback(&self, callback: Arc<AnomalyCallback>) {
        *self.callback.write().expect("callback lock poisoned") = Some(callback);
    }

    /// Result of one call to `detect`.
    pub async fn detect(&self, metric: &str, value: f64, ts: DateTime<Utc>, labels: &Labels) -> DetectionResult {
        let baseline = self.baselines.get(metric, labels, ts).await;
        if !baseline.is_ready(self.min_data_points) {
            return DetectionResult::non_anomaly("baseline not ready: insufficient sample count");
        }

        let from = ts - self.baseline_window;
        let window_values: Vec<f64> = self
            .store
            .raw_values(metric, from, ts, Some(labels))
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        let mut sorted_window = window_values.clone();
        sorted_window.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let t = self.sensitivity_threshold;
        let mut outcomes = Vec::new();
        for algo in &self.algorithms {
            let outcome = match algo {
                Algorithm::Statistical => algorithms::statistical(value, baseline.mean, baseline.stddev, t),
                Algorithm::Mad => algorithms::mad_algorithm(value, &window_values, t),
                Algorithm::Iqr => algorithms::iqr(value, &sorted_window, 1.5),
                Algorithm::Grubbs => algorithms::grubbs(value, &window_values, baseline.mean, baseline.stddev, 0.05),
                Algorithm::Seasonal => algorithms::seasonal(value, &baseline, ts, t, self.seasonal_threshold_factor),
                // No built-in ML model is specified for real-time detection; recognized but inert.
                Algorithm::Ml => None,
            };
            if let Some(o) = outcome {
                outcomes.push(o);
            }
        }

        let expected_range = (baseline.mean - t * baseline.stddev, baseline.mean + t * baseline.stddev);

        if outcomes.is_empty() {
            return DetectionResult {
                expected_range,
                ..DetectionResult::non_anomaly("no algorithm produced a result for this sample")
            };
        }

        let is_anomaly = outcomes.iter().any(|o| o.triggered);
        let score = outcomes.iter().map(|o| o.score).fold(0.0, f64::max);
        let algorithms_triggered: Vec<String> = outcomes
            .iter()
            .filter(|o| o.triggered)
            .map(|o| o.name.to_string())
            .collect();
        let kind = outcomes
            .iter()
            .filter(|o| o.triggered)
            .min_by_key(|o| kind_priority(o.kind))
            .map(|o| o.kind);

        let explanation = if is_anomaly {
            format!(
                "triggered by {} (score {:.2})",
                algorithms_triggered.join(", "),
                score
            )
        } else {
            "within expected range".to_string()
        };

        let result = DetectionResult {
            is_anomaly,
            kind,
            score,
            algorithms_triggered,
            explanation,
            expected_range,
        };

        if is_anomaly {
            let anomaly = Anomaly {
                id: AnomalyId::new(),
                metric: metric.to_string(),
                labels: labels.clone(),
                kind: kind.unwrap_or(AnomalyKind::Outlier),
                severity: crate::model::Severity::from_score(score),
                score,
                value,
                expected_range,
                detected_at: ts,
                description: result.explanation.clone(),
                acknowledged: false,
                acknowledged_by: None,
                acknowledged_at: None,
            };
            let callback = self.callback.read().expect("callback lock poisoned").clone();
            if let Some(cb) = callback {
                cb(&anomaly);
            }
            debug!(metric = %anomaly.metric, score = anomaly.score, kind = ?anomaly.kind, "anomaly detected");
        }

        result
    }

    /// Batch STL decomposition over a metric's raw window.
    pub async fn decompose(
        &self,
        metric: &str,
        labels: &Labels,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        period: usize,
    ) -> CoreResult<Option<stl::StlResult>> {
        let values: Vec<f64> = self
            .store
            .raw_values(metric, from, to, Some(labels))
            .await?
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        Ok(stl::decompose(&values, period))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::Baselines;
    use crate::config::{Algorithm, DetectorConfig, Sensitivity};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    async fn setup(values: &[f64]) -> (Arc<Store>, Arc<Baselines>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path(), 1000, StdDuration::from_millis(10)).unwrap());
        let now = Utc::now();
        for (i, v) in values.iter().enumerate() {
            store.record("cpu", *v, BTreeMap::new(), now - chrono::Duration::seconds(i as i64));
        }
        tokio::time::sleep(StdDuration::from_millis(40)).await;
        let baselines = Arc::new(Baselines::new(store.clone(), chrono::Duration::hours(24), 5, chrono::Duration::seconds(60)));
        (store, baselines, dir)
    }

    #[tokio::test]
    async fn below_min_data_points_yields_no_anomaly() {
        let (store, baselines, _dir) = setup(&[10.0, 10.0, 10.0]).await;
        let config = DetectorConfig {
            algorithms: vec![Algorithm::Statistical],
            sensitivity: Sensitivity::Medium,
            baseline_window_secs: 86_400,
            min_data_points: 100,
            min_samples_per_bucket: 5,
            seasonal_threshold_factor: 0.8,
            baseline_cache_ttl_secs: 60,
        };
        let detector = Detector::new(store, baselines, &config);
        let result = detector.detect("cpu", 10.0, Utc::now(), &Labels::new()).await;
        assert!(!result.is_anomaly);
    }

    #[tokio::test]
    async fn spike_far_above_mean_triggers_statistical() {
        let mut values = vec![100.0; 50];
        values.extend(vec![101.0; 50]);
        let (store, baselines, _dir) = setup(&values).await;
        let config = DetectorConfig {
            algorithms: vec![Algorithm::Statistical],
            sensitivity: Sensitivity::Medium,
            baseline_window_secs: 86_400,
            min_data_points: 10,
            min_samples_per_bucket: 5,
            seasonal_threshold_factor: 0.8,
            baseline_cache_ttl_secs: 60,
        };
        let detector = Detector::new(store, baselines, &config);
        let result = detector.detect("cpu", 500.0, Utc::now(), &Labels::new()).await;
        assert!(result.is_anomaly);
        assert_eq!(result.kind, Some(AnomalyKind::Spike));
        assert!(result.algorithms_triggered.contains(&"statistical".to_string()));
    }

    #[tokio::test]
    async fn anomaly_callback_fires_exactly_once() {
        let mut values = vec![100.0; 50];
        values.extend(vec![101.0; 50]);
        let (store, baselines, _dir) = setup(&values).await;
        let config = DetectorConfig {
            algorithms: vec![Algorithm::Statistical],
            sensitivity: Sensitivity::Medium,
            baseline_window_secs: 86_400,
            min_data_points: 10,
            min_samples_per_bucket: 5,
            seasonal_threshold_factor: 0.8,
            baseline_cache_ttl_secs: 60,
        };
        let detector = Detector::new(store, baselines, &config);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        detector.set_anomaly_callback(Arc::new(move |_anomaly| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));
        detector.detect("cpu", 500.0, Utc::now(), &Labels::new()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
