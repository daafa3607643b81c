//! Aggregation and bucketing logic for `Store::query` / `Store::query_range`
//! Query aggregation.

use crate::model::{Aggregation, Labels, Sample};
use crate::stats::{mean, percentile};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// One resolved series: the distinct label set plus its ordered samples
/// within the requested range, sorted by timestamp.
pub struct Group {
    pub labels: Labels,
    pub points: Vec<(DateTime<Utc>, f64)>,
}

/// Group decoded samples by their exact label set, sorting each group's
/// points by timestamp ascending (`last`/`rate` depend on this ordering —
/// open question on `last`).
pub fn group_samples(samples: Vec<Sample>) -> Vec<Group> {
    let mut groups: BTreeMap<String, Group> = BTreeMap::new();
    for sample in samples {
        let key = crate::model::canonical_labels(&sample.labels);
        let entry = groups.entry(key).or_insert_with(|| Group {
            labels: sample.labels.clone(),
            points: Vec::new(),
        });
        entry.points.push((sample.ts, sample.value));
    }
    for g in groups.values_mut() {
        g.points.sort_by_key(|(ts, _)| *ts);
    }
    groups.into_values().collect()
}

/// Apply an aggregation function over one group's `(ts, value)` points —
/// Aggregations.
pub fn aggregate(points: &[(DateTime<Utc>, f64)], agg: Aggregation) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
    match agg {
        Aggregation::Sum => values.iter().sum(),
        Aggregation::Avg => mean(&values),
        Aggregation::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
        Aggregation::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        Aggregation::Count => values.len() as f64,
        Aggregation::P50 => percentile(&sorted(&values), 50.0),
        Aggregation::P90 => percentile(&sorted(&values), 90.0),
        Aggregation::P95 => percentile(&sorted(&values), 95.0),
        Aggregation::P99 => percentile(&sorted(&values), 99.0),
        Aggregation::Rate => rate(points),
        Aggregation::Last => points.last().map(|(_, v)| *v).unwrap_or(0.0),
    }
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut v = values.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    v
}

/// `(last - first) / (last_ts - first_ts).seconds()`; zero when fewer than
/// two samples or the window spans zero time.
fn rate(points: &[(DateTime<Utc>, f64)]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let (first_ts, first_val) = points[0];
    let (last_ts, last_val) = points[points.len() - 1];
    let span = (last_ts - first_ts).num_milliseconds() as f64 / 1000.0;
    if span == 0.0 {
        return 0.0;
    }
    (last_val - first_val) / span
}

/// Bucket a group's points into fixed-width time windows starting at `from`,
/// stepping by `step`, producing one aggregated value per non-empty bucket —
/// `query_range`.
pub fn bucketize(
    points: &[(DateTime<Utc>, f64)],
    from: DateTime<Utc>,
    step: chrono::Duration,
    agg: Aggregation,
) -> Vec<(DateTime<Utc>, f64)> {
    if step.num_milliseconds() <= 0 {
        return Vec::new();
    }
    let mut buckets: BTreeMap<i64, Vec<(DateTime<Utc>, f64)>> = BTreeMap::new();
    let step_ms = step.num_milliseconds();
    for &(ts, value) in points {
        let offset_ms = (ts - from).num_milliseconds();
        if offset_ms < 0 {
            continue;
        }
        let bucket_index = offset_ms / step_ms;
        buckets.entry(bucket_index).or_default().push((ts, value));
    }
    buckets
        .into_iter()
        .map(|(idx, pts)| {
            let bucket_start = from + chrono::Duration::milliseconds(idx * step_ms);
            (bucket_start, aggregate(&pts, agg))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(secs: i64, v: f64) -> (DateTime<Utc>, f64) {
        (DateTime::from_timestamp(secs, 0).unwrap(), v)
    }

    #[test]
    fn rate_needs_two_points() {
        assert_eq!(rate(&[pt(0, 10.0)]), 0.0);
    }

    #[test]
    fn rate_computes_per_second_delta() {
        let points = vec![pt(0, 10.0), pt(10, 30.0)];
        assert_eq!(rate(&points), 2.0);
    }

    #[test]
    fn last_is_value_at_greatest_timestamp() {
        let points = vec![pt(5, 1.0), pt(0, 2.0), pt(10, 3.0)];
        let mut sorted_pts = points.clone();
        sorted_pts.sort_by_key(|(ts, _)| *ts);
        assert_eq!(aggregate(&sorted_pts, Aggregation::Last), 3.0);
    }

    #[test]
    fn bucketize_groups_by_step() {
        let points = vec![pt(0, 1.0), pt(5, 2.0), pt(10, 3.0), pt(11, 4.0)];
        let buckets = bucketize(
            &points,
            DateTime::from_timestamp(0, 0).unwrap(),
            chrono::Duration::seconds(10),
            Aggregation::Avg,
        );
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].1, 1.5);
        assert_eq!(buckets[1].1, 3.5);
    }
}
