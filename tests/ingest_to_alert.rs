//! End-to-end flow: CDC events -> Ingestor -> Store -> Detector/AlertEngine.

use observatory::alerts::{AlertEngine, AlertFilter, Notifier, StoreMetricProvider};
use observatory::baseline::Baselines;
use observatory::clock::FakeClock;
use observatory::config::{Algorithm, DetectorConfig, Sensitivity};
use observatory::detector::Detector;
use observatory::ingestor::Ingestor;
use observatory::model::{
    Alert, AlertStatus, CdcEvent, CdcOp, Channel, ChannelId, ChannelKind, CompareWith, Condition,
    Labels, Operator, Rule, RuleId, Severity,
};
use observatory::store::Store;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn insert_event(table: &str, amount: f64, status: &str, ts: chrono::DateTime<chrono::Utc>) -> CdcEvent {
    let mut after = serde_json::Map::new();
    after.insert("total_amount".to_string(), serde_json::json!(amount));
    after.insert("status".to_string(), serde_json::json!(status));
    CdcEvent {
        id: Uuid::new_v4(),
        op: CdcOp::Insert,
        schema: "public".to_string(),
        table: table.to_string(),
        timestamp: ts,
        before: None,
        after: Some(after),
        metadata: None,
    }
}

#[tokio::test]
async fn cdc_stream_drives_metrics_queryable_from_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path(), 1000, Duration::from_millis(10)).unwrap());
    let cancel = CancellationToken::new();
    let ingestor = Ingestor::new(store.clone(), 1000, cancel.clone());

    let now = chrono::Utc::now();
    for v in [10.0, 20.0, 30.0, 40.0, 50.0] {
        ingestor.process(insert_event("orders", v, "pending", now));
    }
    tokio::time::sleep(Duration::from_millis(60)).await;
    cancel.cancel();
    ingestor.shutdown().await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    let from = now - chrono::Duration::seconds(5);
    let to = now + chrono::Duration::seconds(5);
    let avg = store
        .query("orders_total_amount", from, to, observatory::model::Aggregation::Avg)
        .await
        .unwrap();
    assert_eq!(avg.series[0].data_points[0].value, 30.0);

    let total = store
        .query("orders_events_total", from, to, observatory::model::Aggregation::Count)
        .await
        .unwrap();
    assert_eq!(total.series[0].data_points[0].value, 5.0);
}

#[tokio::test]
async fn stable_series_then_spike_is_flagged_by_detector() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path(), 1000, Duration::from_millis(10)).unwrap());
    let cancel = CancellationToken::new();
    let ingestor = Ingestor::new(store.clone(), 1000, cancel.clone());

    let now = chrono::Utc::now();
    for i in 0..60 {
        ingestor.process(insert_event(
            "orders",
            50.0 + (i % 3) as f64,
            "pending",
            now - chrono::Duration::seconds(60 - i),
        ));
    }
    tokio::time::sleep(Duration::from_millis(80)).await;

    let baselines = Arc::new(Baselines::new(
        store.clone(),
        chrono::Duration::hours(24),
        5,
        chrono::Duration::seconds(60),
    ));
    let config = DetectorConfig {
        algorithms: vec![Algorithm::Statistical, Algorithm::Iqr],
        sensitivity: Sensitivity::Medium,
        baseline_window_secs: 86_400,
        min_data_points: 20,
        min_samples_per_bucket: 5,
        seasonal_threshold_factor: 0.8,
        baseline_cache_ttl_secs: 60,
    };
    let detector = Detector::new(store.clone(), baselines, &config);

    let result = detector
        .detect("orders_total_amount", 5_000.0, now, &Labels::new())
        .await;
    assert!(result.is_anomaly);
    assert!(!result.algorithms_triggered.is_empty());

    cancel.cancel();
    ingestor.shutdown().await;
}

struct CapturingNotifier {
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl Notifier for CapturingNotifier {
    async fn send(&self, alert: &Alert, _channel: &Channel) -> Result<(), String> {
        self.sent.lock().unwrap().push(alert.message.clone());
        Ok(())
    }
}

#[tokio::test]
async fn high_metric_value_fires_rule_and_dispatches_notification() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path(), 1000, Duration::from_millis(10)).unwrap());
    let now = chrono::Utc::now();
    store.record("orders_events_total", 5000.0, Labels::new(), now);
    tokio::time::sleep(Duration::from_millis(40)).await;

    let clock = FakeClock::new(now + chrono::Duration::seconds(1));
    let provider = Arc::new(StoreMetricProvider::new(store.clone(), clock.clone()));
    let cancel = CancellationToken::new();
    let engine = AlertEngine::new(provider, clock, Duration::from_secs(3600), 100, cancel.clone());

    let sent = Arc::new(Mutex::new(Vec::new()));
    engine
        .register_notifier(ChannelKind::Webhook, Arc::new(CapturingNotifier { sent: sent.clone() }))
        .await;
    let channel_id = engine
        .add_channel(Channel {
            id: ChannelId::new(),
            kind: ChannelKind::Webhook,
            enabled: true,
            config: Default::default(),
        })
        .await;

    let rule = Rule {
        id: RuleId::new(),
        name: "orders volume too high".to_string(),
        metric: "orders_events_total".to_string(),
        condition: Condition {
            operator: Operator::Gt,
            threshold: 1000.0,
            compare_with: CompareWith::None,
            change_percent: 0.0,
        },
        duration: chrono::Duration::zero(),
        severity: Severity::Critical,
        channels: vec![channel_id],
        enabled: true,
        labels: Labels::new(),
        created_at: now,
        updated_at: now,
    };
    let rule_id = engine.add_rule(rule).await;

    engine.evaluate_now().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let alerts = engine.get_alerts(&AlertFilter { rule_id: Some(rule_id), ..Default::default() }).await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].status, AlertStatus::Open);
    assert_eq!(sent.lock().unwrap().len(), 1);

    cancel.cancel();
}
