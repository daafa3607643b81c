//! Core data model.
//!
//! Types here are shared by every subsystem (`store`, `ingestor`, `baseline`,
//! `detector`, `alerts`); all derive `Serialize`/`Deserialize` the way the
//! teacher's `HealthAssessment`/`AdvisoryTicket` do, since they cross the
//! sled-encoding and config/event-JSON boundaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Labels are unordered key-value pairs; stored as a sorted map so two label
/// sets with identical content always compare and hash equal (the canonical
/// encoding invariant).
pub type Labels = BTreeMap<String, String>;

/// Build a canonical, injective string encoding of a label set.
///
/// Keys are already sorted by virtue of `Labels` being a `BTreeMap`; this
/// just needs to separate entries unambiguously. `\x1f`/`\x1e` (ASCII
/// unit/record separators) cannot appear in normal label text, so encode/
/// decode never collide across differently-shaped label sets.
pub fn canonical_labels(labels: &Labels) -> String {
    let mut out = String::new();
    for (k, v) in labels {
        out.push_str(k);
        out.push('\u{1f}');
        out.push_str(v);
        out.push('\u{1e}');
    }
    out
}

/// A single recorded data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub metric: String,
    pub ts: DateTime<Utc>,
    pub value: f64,
    pub labels: Labels,
}

/// Per-metric bookkeeping, created on first write and updated monotonically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricMeta {
    pub metric: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub sample_count: u64,
    pub label_keys: Vec<String>,
}

impl MetricMeta {
    pub fn observe(&mut self, sample: &Sample) {
        if sample.ts < self.first_seen {
            self.first_seen = sample.ts;
        }
        if sample.ts > self.last_seen {
            self.last_seen = sample.ts;
        }
        self.sample_count += 1;
        for key in sample.labels.keys() {
            if !self.label_keys.iter().any(|k| k == key) {
                self.label_keys.push(key.clone());
            }
        }
    }

    pub fn new(sample: &Sample) -> Self {
        Self {
            metric: sample.metric.clone(),
            first_seen: sample.ts,
            last_seen: sample.ts,
            sample_count: 1,
            label_keys: sample.labels.keys().cloned().collect(),
        }
    }
}

/// `(metric, canonical(labels))` — the grouping key for range queries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesKey {
    pub metric: String,
    pub canonical_labels: String,
}

impl SeriesKey {
    pub fn new(metric: &str, labels: &Labels) -> Self {
        Self {
            metric: metric.to_string(),
            canonical_labels: canonical_labels(labels),
        }
    }
}

/// Aggregation functions supported by `Store::query` / `query_range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    P50,
    P90,
    P95,
    P99,
    Rate,
    Last,
}

impl Aggregation {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Some(Self::Sum),
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "count" => Some(Self::Count),
            "p50" => Some(Self::P50),
            "p90" => Some(Self::P90),
            "p95" => Some(Self::P95),
            "p99" => Some(Self::P99),
            "rate" => Some(Self::Rate),
            "last" => Some(Self::Last),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
            Self::P50 => "p50",
            Self::P90 => "p90",
            Self::P95 => "p95",
            Self::P99 => "p99",
            Self::Rate => "rate",
            Self::Last => "last",
        }
    }
}

/// A rolling statistical summary over a metric's baseline window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub metric: String,
    pub window: chrono::Duration,
    pub mean: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
    pub sample_count: usize,
    pub seasonal: Option<SeasonalBaseline>,
}

impl Baseline {
    pub fn is_ready(&self, min_samples: usize) -> bool {
        self.sample_count >= min_samples
    }
}

/// Per-hour/per-weekday mean buckets used by the seasonal detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonalBaseline {
    pub hourly: [f64; 24],
    pub hourly_counts: [u64; 24],
    pub daily: [f64; 7],
    pub daily_counts: [u64; 7],
    pub has_seasonality: bool,
}

/// Anomaly kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyKind {
    Spike,
    Drop,
    Trend,
    Seasonal,
    Missing,
    Outlier,
}

/// Severity levels shared by anomalies and alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    High,
    Critical,
}

impl Severity {
    /// Severity mapping from an anomaly/deviation score.
    pub fn from_score(score: f64) -> Self {
        if score < 0.5 {
            Severity::Info
        } else if score < 0.7 {
            Severity::Warning
        } else if score < 0.9 {
            Severity::High
        } else {
            Severity::Critical
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnomalyId(pub Uuid);

impl AnomalyId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AnomalyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AnomalyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A confirmed anomaly, created by the Detector and never mutated afterward
/// except for ack fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: AnomalyId,
    pub metric: String,
    pub labels: Labels,
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub score: f64,
    pub value: f64,
    pub expected_range: (f64, f64),
    pub detected_at: DateTime<Utc>,
    pub description: String,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl Anomaly {
    pub fn acknowledge(&mut self, user: &str, at: DateTime<Utc>) {
        self.acknowledged = true;
        self.acknowledged_by = Some(user.to_string());
        self.acknowledged_at = Some(at);
    }
}

/// Comparison operators for a `Condition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl Operator {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            ">" => Some(Self::Gt),
            ">=" | "\u{2265}" => Some(Self::Ge),
            "<" => Some(Self::Lt),
            "<=" | "\u{2264}" => Some(Self::Le),
            "=" | "==" => Some(Self::Eq),
            "!=" | "\u{2260}" => Some(Self::Ne),
            _ => None,
        }
    }

    pub fn evaluate(self, value: f64, threshold: f64) -> bool {
        match self {
            Operator::Gt => value > threshold,
            Operator::Ge => value >= threshold,
            Operator::Lt => value < threshold,
            Operator::Le => value <= threshold,
            Operator::Eq => (value - threshold).abs() < f64::EPSILON,
            Operator::Ne => (value - threshold).abs() >= f64::EPSILON,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Eq => "=",
            Operator::Ne => "!=",
        }
    }
}

/// What a rule's value is compared against before applying the operator —
/// What an alert condition is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareWith {
    None,
    PreviousHour,
    SameHourLastWeek,
    Baseline,
}

impl CompareWith {
    /// Baseline window implied by this comparison mode.
    pub fn window(self) -> Option<chrono::Duration> {
        match self {
            CompareWith::None => None,
            CompareWith::PreviousHour => Some(chrono::Duration::hours(1)),
            CompareWith::SameHourLastWeek => Some(chrono::Duration::hours(168)),
            CompareWith::Baseline => Some(chrono::Duration::hours(24)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub operator: Operator,
    pub threshold: f64,
    pub compare_with: CompareWith,
    pub change_percent: f64,
}

impl Condition {
    /// Effective threshold: `change_percent` if set, else `threshold`.
    pub fn effective_threshold(&self) -> f64 {
        if self.change_percent > 0.0 {
            self.change_percent
        } else {
            self.threshold
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleId(pub Uuid);

impl RuleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user-defined alerting rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    pub metric: String,
    pub condition: Condition,
    pub duration: chrono::Duration,
    pub severity: Severity,
    pub channels: Vec<ChannelId>,
    pub enabled: bool,
    pub labels: Labels,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
    Snoozed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertId(pub Uuid);

impl AlertId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alert_{}", self.0.simple())
    }
}

/// One notifier delivery attempt recorded onto an alert's log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub channel: ChannelId,
    pub sent_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

/// A triggered instance of a rule (or a manually-fired alert).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub rule_id: Option<RuleId>,
    pub alert_type: String,
    pub severity: Severity,
    pub status: AlertStatus,
    pub title: String,
    pub message: String,
    pub metric: String,
    pub current_value: f64,
    pub threshold_value: f64,
    pub labels: Labels,
    pub fired_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub snoozed_until: Option<DateTime<Utc>>,
    pub notification_log: Vec<NotificationRecord>,
}

/// Channel transport kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Slack,
    Email,
    Pagerduty,
    Webhook,
    Teams,
    Discord,
}

/// A notification destination, referenced by rules via id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub kind: ChannelKind,
    pub enabled: bool,
    pub config: serde_json::Map<String, serde_json::Value>,
}

/// CDC operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CdcOp {
    Insert,
    Update,
    Delete,
    Ddl,
}

/// A row-level (or DDL) change-data-capture event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdcEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub op: CdcOp,
    pub schema: String,
    pub table: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub before: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub after: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}
