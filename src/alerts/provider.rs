//! `MetricProvider` — the capability `AlertEngine` uses to read the metric
//! values its rules evaluate against, without depending on `Store`
//! concretely.

use crate::clock::SharedClock;
use crate::error::CoreResult;
use crate::stats::mean;
use crate::store::Store;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait MetricProvider: Send + Sync {
    /// Current value of `metric`.
    async fn metric_value(&self, metric: &str) -> CoreResult<f64>;

    /// Mean of `metric` over `[now - window, now)`.
    async fn metric_baseline(&self, metric: &str, window: chrono::Duration) -> CoreResult<f64>;
}

/// Reads both from `Store`'s raw sample history, ignoring label set (a rule
/// names a bare metric, not a specific series).
pub struct StoreMetricProvider {
    store: Arc<Store>,
    clock: SharedClock,
}

impl StoreMetricProvider {
    pub fn new(store: Arc<Store>, clock: SharedClock) -> Self {
        Self { store, clock }
    }
}

#[async_trait]
impl MetricProvider for StoreMetricProvider {
    async fn metric_value(&self, metric: &str) -> CoreResult<f64> {
        let now = self.clock.now();
        let points = self
            .store
            .raw_values(metric, now - chrono::Duration::minutes(5), now, None)
            .await?;
        Ok(points.last().map(|(_, v)| *v).unwrap_or(0.0))
    }

    async fn metric_baseline(&self, metric: &str, window: chrono::Duration) -> CoreResult<f64> {
        let now = self.clock.now();
        let points = self.store.raw_values(metric, now - window, now, None).await?;
        let values: Vec<f64> = points.into_iter().map(|(_, v)| v).collect();
        Ok(mean(&values))
    }
}
