//! Store.
//!
//! Buffered-write, label-indexed time-series storage over `sled`, the
//! teacher's embedded database (see `storage::AnalysisStorage` wrapping
//! `Arc<sled::Db>`). A single `tokio::sync::RwLock` guards the database
//! handle and a separate `Mutex` guards the write buffer, per the resource
//! policy.

mod buffer;
mod encoding;
mod meta;
mod query;

pub use query::Group;

use crate::error::{CoreError, CoreResult};
use crate::model::{Aggregation, Labels, MetricMeta, Sample};
use buffer::WriteBuffer;
use chrono::{DateTime, Utc};
use sled::Db;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// One `(timestamp, value)` pair within a series.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DataPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// One distinct label set's aggregated data points within a query's range.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SeriesResult {
    pub metric: String,
    pub labels: Labels,
    pub data_points: Vec<DataPoint>,
}

/// `query`/`query_range`'s top-level response shape: `{metric, aggregation,
/// from, to, series: [...]}`. `step` is `None` for `query` and `Some` for
/// `query_range`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueryResponse {
    pub metric: String,
    pub aggregation: Aggregation,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub step: Option<chrono::Duration>,
    pub series: Vec<SeriesResult>,
}

pub struct Store {
    db: Arc<RwLock<Db>>,
    buffer: Arc<WriteBuffer>,
    cancel: CancellationToken,
    flusher: tokio::task::JoinHandle<()>,
}

impl Store {
    /// Open (or create) the embedded database at `path` and start the
    /// background flusher (write path).
    pub fn open<P: AsRef<Path>>(
        path: P,
        write_buffer_capacity: usize,
        flush_interval: Duration,
    ) -> CoreResult<Self> {
        let db = sled::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "store opened");
        let db = Arc::new(RwLock::new(db));
        let buffer = Arc::new(WriteBuffer::new(write_buffer_capacity));
        let cancel = CancellationToken::new();
        let flusher = buffer::spawn_flusher(db.clone(), buffer.clone(), flush_interval, cancel.clone());
        Ok(Self {
            db,
            buffer,
            cancel,
            flusher,
        })
    }

    /// `record`: never fails in the caller's view, returns immediately.
    pub fn record(&self, metric: &str, value: f64, labels: Labels, ts: DateTime<Utc>) {
        self.buffer.push(Sample {
            metric: metric.to_string(),
            ts,
            value,
            labels,
        });
    }

    /// Count of samples dropped due to write-buffer back-pressure (overflow).
    pub fn dropped_count(&self) -> u64 {
        self.buffer.dropped.load(Ordering::Relaxed)
    }

    async fn read_metric_samples(&self, metric: &str) -> CoreResult<Vec<Sample>> {
        let db = self.db.read().await;
        let tree = db.open_tree("samples")?;
        let (lower, upper) = encoding::metric_range_bounds(metric);
        let mut out = Vec::new();
        for item in tree.range(lower..upper) {
            let (_key, value) = item?;
            if let Some(sample) = encoding::decode_sample(&value) {
                out.push(sample);
            }
        }
        Ok(out)
    }

    /// `query`: grouped by distinct label-set within range, one
    /// aggregated value per group.
    pub async fn query(
        &self,
        metric: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        aggregation: Aggregation,
    ) -> CoreResult<QueryResponse> {
        let samples = self.read_metric_samples(metric).await?;
        let in_range: Vec<Sample> = samples
            .into_iter()
            .filter(|s| s.ts >= from && s.ts <= to)
            .collect();
        let groups = query::group_samples(in_range);
        let series = groups
            .into_iter()
            .map(|g| {
                let value = query::aggregate(&g.points, aggregation);
                SeriesResult {
                    metric: metric.to_string(),
                    labels: g.labels,
                    data_points: vec![DataPoint { timestamp: to, value }],
                }
            })
            .collect();
        Ok(QueryResponse {
            metric: metric.to_string(),
            aggregation,
            from,
            to,
            step: None,
            series,
        })
    }

    /// `query_range`: buckets time by `step`; each group gets an
    /// ordered sequence of `(bucket_start, value)`.
    pub async fn query_range(
        &self,
        metric: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        step: chrono::Duration,
        aggregation: Aggregation,
    ) -> CoreResult<QueryResponse> {
        if step.num_milliseconds() <= 0 {
            return Err(CoreError::InvalidInput("step must be positive".into()));
        }
        let samples = self.read_metric_samples(metric).await?;
        let in_range: Vec<Sample> = samples
            .into_iter()
            .filter(|s| s.ts >= from && s.ts <= to)
            .collect();
        let groups = query::group_samples(in_range);
        let series = groups
            .into_iter()
            .map(|g| {
                let buckets = query::bucketize(&g.points, from, step, aggregation);
                SeriesResult {
                    metric: metric.to_string(),
                    labels: g.labels,
                    data_points: buckets
                        .into_iter()
                        .map(|(timestamp, value)| DataPoint { timestamp, value })
                        .collect(),
                }
            })
            .collect();
        Ok(QueryResponse {
            metric: metric.to_string(),
            aggregation,
            from,
            to,
            step: Some(step),
            series,
        })
    }

    /// Raw `(ts, value)` pairs for a metric within a window, ungrouped by
    /// labels — used by `Baselines` and `Detector` to pull the full value
    /// list for a series (optionally filtered to one label set).
    pub async fn raw_values(
        &self,
        metric: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        labels: Option<&Labels>,
    ) -> CoreResult<Vec<(DateTime<Utc>, f64)>> {
        let samples = self.read_metric_samples(metric).await?;
        let mut points: Vec<(DateTime<Utc>, f64)> = samples
            .into_iter()
            .filter(|s| s.ts >= from && s.ts <= to)
            .filter(|s| labels.map(|l| &s.labels == l).unwrap_or(true))
            .map(|s| (s.ts, s.value))
            .collect();
        points.sort_by_key(|(ts, _)| *ts);
        Ok(points)
    }

    pub async fn list_metrics(&self) -> CoreResult<Vec<String>> {
        let db = self.db.read().await;
        let tree = db.open_tree("meta")?;
        Ok(meta::list_metrics(&tree)?)
    }

    pub async fn get_meta(&self, metric: &str) -> CoreResult<Option<MetricMeta>> {
        let db = self.db.read().await;
        let tree = db.open_tree("meta")?;
        Ok(meta::get(&tree, metric)?)
    }

    /// Deletes all samples and meta for `metric`.
    pub async fn delete_metric(&self, metric: &str) -> CoreResult<()> {
        let db = self.db.write().await;
        let samples_tree = db.open_tree("samples")?;
        let (lower, upper) = encoding::metric_range_bounds(metric);
        let keys: Vec<_> = samples_tree
            .range(lower..upper)
            .filter_map(|r| r.ok())
            .map(|(k, _)| k)
            .collect();
        for key in keys {
            samples_tree.remove(key)?;
        }
        let meta_tree = db.open_tree("meta")?;
        meta::delete(&meta_tree, metric)?;
        Ok(())
    }

    /// Evicts samples older than `now - retention` across all metrics.
    /// Meta rows are *not* pruned (retention only prunes samples).
    pub async fn cleanup(&self, now: DateTime<Utc>, retention: chrono::Duration) -> CoreResult<u64> {
        let cutoff = now - retention;
        let db = self.db.write().await;
        let samples_tree = db.open_tree("samples")?;
        let mut removed = 0u64;
        let stale_keys: Vec<_> = samples_tree
            .iter()
            .filter_map(|r| r.ok())
            .filter(|(key, _)| encoding::ts_from_key(key).map(|ts| ts < cutoff).unwrap_or(false))
            .map(|(k, _)| k)
            .collect();
        for key in stale_keys {
            samples_tree.remove(key)?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Final synchronous flush, then stop the background flusher.
    pub async fn close(self) -> CoreResult<()> {
        self.cancel.cancel();
        let _ = self.flusher.await;
        let db = self.db.read().await;
        db.flush_async().await?;
        Ok(())
    }
}
