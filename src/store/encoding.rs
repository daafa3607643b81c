//! sled key/value encoding for the samples and meta trees.
//!
//! Keys are built so that a single prefix range-scan (`metric_bytes ++
//! 0x00 .. metric_bytes ++ 0x01`) returns every sample for a metric
//! regardless of label set, grouped contiguously by canonical label string
//! because sled iterates keys in byte-sorted order.

use crate::model::{canonical_labels, Labels, Sample};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicU32, Ordering};

static SEQ: AtomicU32 = AtomicU32::new(0);

/// Build the sled key for a sample: `metric \0 canonical_labels \0 ts_be seq_be`.
pub fn sample_key(metric: &str, labels: &Labels, ts: DateTime<Utc>) -> Vec<u8> {
    let canon = canonical_labels(labels);
    let mut key = Vec::with_capacity(metric.len() + canon.len() + 14);
    key.extend_from_slice(metric.as_bytes());
    key.push(0);
    key.extend_from_slice(canon.as_bytes());
    key.push(0);
    let nanos = ts.timestamp_nanos_opt().unwrap_or(0);
    key.extend_from_slice(&nanos.to_be_bytes());
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Lower/upper bound covering every key for `metric`, regardless of labels.
pub fn metric_range_bounds(metric: &str) -> (Vec<u8>, Vec<u8>) {
    let mut lower = metric.as_bytes().to_vec();
    lower.push(0);
    let mut upper = metric.as_bytes().to_vec();
    upper.push(1);
    (lower, upper)
}

pub fn encode_sample(sample: &Sample) -> Vec<u8> {
    serde_json::to_vec(sample).unwrap_or_default()
}

pub fn decode_sample(bytes: &[u8]) -> Option<Sample> {
    serde_json::from_slice(bytes).ok()
}

/// Extract the timestamp embedded in an arbitrary sample key without
/// decoding the whole JSON value — used by `cleanup` to scan every metric's
/// keys cheaply. Keys are `metric \0 canonical_labels \0 ts_be seq_be`; skip
/// past both NUL delimiters and read the 8-byte big-endian nanos that follow.
pub fn ts_from_key(key: &[u8]) -> Option<DateTime<Utc>> {
    let first_nul = key.iter().position(|&b| b == 0)?;
    let after_metric = key.get(first_nul + 1..)?;
    let second_nul = after_metric.iter().position(|&b| b == 0)?;
    let rest = after_metric.get(second_nul + 1..)?;
    let nanos_bytes: [u8; 8] = rest.get(0..8)?.try_into().ok()?;
    let nanos = i64::from_be_bytes(nanos_bytes);
    Some(Utc.timestamp_nanos(nanos))
}

pub fn meta_key(metric: &str) -> Vec<u8> {
    metric.as_bytes().to_vec()
}
