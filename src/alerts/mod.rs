//! AlertEngine.
//! Rule evaluation, the alert state machine, and notification dispatch,
//! grounded on `background/self_healer.rs`'s ticker-plus-trait-object-registry
//! shape: one evaluator task on a timer, one notifier task draining a bounded
//! queue, both taking a `CancellationToken`, both reading capabilities
//! (`MetricProvider`, `Notifier`) injected rather than a concrete dependency.
//! The engine is built with `Arc::new_cyclic` so its own background tasks can
//! hold a `Weak<Self>` back-reference instead of leaking a strong cycle.

pub mod notifier;
pub mod provider;

pub use notifier::{LogNotifier, Notifier, WebhookNotifier};
pub use provider::{MetricProvider, StoreMetricProvider};

use crate::clock::SharedClock;
use crate::error::{CoreError, CoreResult};
use crate::model::{
    Alert, AlertId, AlertStatus, Channel, ChannelId, ChannelKind, CompareWith, NotificationRecord,
    Rule, RuleId, Severity,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Engine state: rules, channels, and alerts, behind one lock.
#[derive(Default)]
struct AlertEngineState {
    rules: HashMap<RuleId, Rule>,
    channels: HashMap<ChannelId, Channel>,
    alerts: HashMap<AlertId, Alert>,
}

/// One rule's outcome for an evaluation pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EvaluationResult {
    pub rule_id: RuleId,
    pub metric: String,
    pub value: Option<f64>,
    pub triggered: bool,
    pub fired_alert: Option<AlertId>,
    pub error: Option<String>,
}

/// Filter fields for `get_alerts`.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub severity: Option<Severity>,
    pub alert_type: Option<String>,
    pub rule_id: Option<RuleId>,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    pub limit: Option<usize>,
}

/// `get_summary()`'s response shape.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AlertSummary {
    pub total: usize,
    pub open: usize,
    pub acknowledged: usize,
    pub resolved: usize,
    pub by_severity: HashMap<String, usize>,
    pub by_type: HashMap<String, usize>,
    pub recent_fired_1h: usize,
}

pub struct AlertEngine {
    state: RwLock<AlertEngineState>,
    provider: Arc<dyn MetricProvider>,
    notifiers: RwLock<HashMap<ChannelKind, Arc<dyn Notifier>>>,
    clock: SharedClock,
    notify_tx: mpsc::Sender<AlertId>,
    notify_dropped: AtomicU64,
    cancel: CancellationToken,
}

impl AlertEngine {
    /// Spawns the evaluator and notifier workers.
    pub fn new(
        provider: Arc<dyn MetricProvider>,
        clock: SharedClock,
        evaluation_interval: std::time::Duration,
        notification_queue_capacity: usize,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (notify_tx, notify_rx) = mpsc::channel(notification_queue_capacity);

        Arc::new_cyclic(|me| {
            spawn_evaluator(me.clone(), evaluation_interval, cancel.clone());
            spawn_notifier(me.clone(), notify_rx, cancel.clone());
            Self {
                state: RwLock::new(AlertEngineState::default()),
                provider,
                notifiers: RwLock::new(HashMap::new()),
                clock,
                notify_tx,
                notify_dropped: AtomicU64::new(0),
                cancel,
            }
        })
    }

    /// Registers a `Notifier` for a channel kind; pluggable notifier kinds
    /// can be added without changing the engine.
    pub async fn register_notifier(&self, kind: ChannelKind, notifier: Arc<dyn Notifier>) {
        self.notifiers.write().await.insert(kind, notifier);
    }

    pub async fn add_rule(&self, rule: Rule) -> RuleId {
        let id = rule.id;
        self.state.write().await.rules.insert(id, rule);
        id
    }

    pub async fn remove_rule(&self, id: RuleId) {
        self.state.write().await.rules.remove(&id);
    }

    pub async fn get_rule(&self, id: RuleId) -> Option<Rule> {
        self.state.read().await.rules.get(&id).cloned()
    }

    pub async fn list_rules(&self) -> Vec<Rule> {
        self.state.read().await.rules.values().cloned().collect()
    }

    pub async fn add_channel(&self, channel: Channel) -> ChannelId {
        let id = channel.id;
        self.state.write().await.channels.insert(id, channel);
        id
    }

    pub async fn remove_channel(&self, id: ChannelId) {
        self.state.write().await.channels.remove(&id);
    }

    pub async fn get_channel(&self, id: ChannelId) -> Option<Channel> {
        self.state.read().await.channels.get(&id).cloned()
    }

    pub async fn list_channels(&self) -> Vec<Channel> {
        self.state.read().await.channels.values().cloned().collect()
    }

    /// Manual / Detector-callback alert creation.
    pub async fn fire_manual(&self, mut alert: Alert) -> AlertId {
        let now = self.clock.now();
        alert.id = AlertId::new();
        alert.fired_at = now;
        alert.status = AlertStatus::Open;
        let id = alert.id;
        self.state.write().await.alerts.insert(id, alert);
        self.enqueue_notification(id);
        id
    }

    /// `fire_test(alert)`: identical contract, distinct name for callers
    /// that want to exercise dispatch without a real trigger.
    pub async fn fire_test(&self, alert: Alert) -> AlertId {
        self.fire_manual(alert).await
    }

    /// `open -> acknowledged`.
    pub async fn acknowledge(&self, id: AlertId, user: &str) -> CoreResult<()> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let alert = state
            .alerts
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("alert {id}")))?;
        alert.status = AlertStatus::Acknowledged;
        alert.acknowledged_at = Some(now);
        alert.acknowledged_by = Some(user.to_string());
        Ok(())
    }

    /// `open -> snoozed`.
    pub async fn snooze(&self, id: AlertId, duration: chrono::Duration) -> CoreResult<()> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let alert = state
            .alerts
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("alert {id}")))?;
        alert.status = AlertStatus::Snoozed;
        alert.snoozed_until = Some(now + duration);
        Ok(())
    }

    /// `open | acknowledged -> resolved`; idempotent on an already
    /// resolved alert.
    pub async fn resolve(&self, id: AlertId, user: &str) -> CoreResult<()> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let alert = state
            .alerts
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("alert {id}")))?;
        if alert.status == AlertStatus::Resolved {
            return Ok(());
        }
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(now);
        alert.resolved_by = Some(user.to_string());
        Ok(())
    }

    pub async fn get_alert(&self, id: AlertId) -> Option<Alert> {
        self.state.read().await.alerts.get(&id).cloned()
    }

    /// `get_alerts(filter)`.
    pub async fn get_alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        let state = self.state.read().await;
        let mut alerts: Vec<Alert> = state
            .alerts
            .values()
            .filter(|a| filter.status.is_none_or(|s| a.status == s))
            .filter(|a| filter.severity.is_none_or(|s| a.severity == s))
            .filter(|a| filter.alert_type.as_deref().is_none_or(|t| a.alert_type == t))
            .filter(|a| filter.rule_id.is_none_or(|r| a.rule_id == Some(r)))
            .filter(|a| filter.start_time.is_none_or(|s| a.fired_at >= s))
            .filter(|a| filter.end_time.is_none_or(|e| a.fired_at <= e))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.fired_at.cmp(&a.fired_at));
        if let Some(limit) = filter.limit {
            alerts.truncate(limit);
        }
        alerts
    }

    /// Most recent alerts for a rule, newest first.
    pub async fn get_history(&self, rule_id: RuleId, limit: usize) -> Vec<Alert> {
        self.get_alerts(&AlertFilter {
            rule_id: Some(rule_id),
            limit: Some(limit),
            ..Default::default()
        })
        .await
    }

    /// `get_summary()`.
    pub async fn get_summary(&self) -> AlertSummary {
        let state = self.state.read().await;
        let now = self.clock.now();
        let mut by_severity = HashMap::new();
        let mut by_type = HashMap::new();
        let mut open = 0;
        let mut acknowledged = 0;
        let mut resolved = 0;
        let mut recent_fired_1h = 0;
        for alert in state.alerts.values() {
            *by_severity.entry(alert.severity.to_string()).or_insert(0) += 1;
            *by_type.entry(alert.alert_type.clone()).or_insert(0) += 1;
            match alert.status {
                AlertStatus::Open => open += 1,
                AlertStatus::Acknowledged => acknowledged += 1,
                AlertStatus::Resolved => resolved += 1,
                AlertStatus::Snoozed => {}
            }
            if now - alert.fired_at <= chrono::Duration::hours(1) {
                recent_fired_1h += 1;
            }
        }
        AlertSummary {
            total: state.alerts.len(),
            open,
            acknowledged,
            resolved,
            by_severity,
            by_type,
            recent_fired_1h,
        }
    }

    /// One evaluation pass over every enabled rule, in rule-id order.
    /// Exposed directly so tests don't need to wait on a timer.
    pub async fn evaluate_now(&self) -> Vec<EvaluationResult> {
        self.reopen_due_snoozes().await;

        let mut rules: Vec<Rule> = {
            let state = self.state.read().await;
            state.rules.values().filter(|r| r.enabled).cloned().collect()
        };
        rules.sort_by_key(|r| r.id.0);

        let mut results = Vec::with_capacity(rules.len());
        for rule in &rules {
            results.push(self.evaluate_rule(rule).await);
        }
        results
    }

    async fn reopen_due_snoozes(&self) {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        for alert in state.alerts.values_mut() {
            if alert.status == AlertStatus::Snoozed {
                if let Some(until) = alert.snoozed_until {
                    if now >= until {
                        alert.status = AlertStatus::Open;
                        alert.snoozed_until = None;
                    }
                }
            }
        }
    }

    async fn evaluate_rule(&self, rule: &Rule) -> EvaluationResult {
        let raw_value = match self.provider.metric_value(&rule.metric).await {
            Ok(v) => v,
            Err(e) => {
                return EvaluationResult {
                    rule_id: rule.id,
                    metric: rule.metric.clone(),
                    value: None,
                    triggered: false,
                    fired_alert: None,
                    error: Some(e.to_string()),
                }
            }
        };

        let mut value = raw_value;
        if rule.condition.compare_with != CompareWith::None {
            if let Some(window) = rule.condition.compare_with.window() {
                match self.provider.metric_baseline(&rule.metric, window).await {
                    Ok(baseline) if baseline > 0.0 => {
                        value = (raw_value - baseline) / baseline * 100.0;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return EvaluationResult {
                            rule_id: rule.id,
                            metric: rule.metric.clone(),
                            value: None,
                            triggered: false,
                            fired_alert: None,
                            error: Some(e.to_string()),
                        }
                    }
                }
            }
        }

        let threshold = rule.condition.effective_threshold();
        let triggered = rule.condition.operator.evaluate(value, threshold);
        let fired_alert = self.apply_evaluation(rule, value, threshold, triggered).await;

        EvaluationResult {
            rule_id: rule.id,
            metric: rule.metric.clone(),
            value: Some(value),
            triggered,
            fired_alert,
            error: None,
        }
    }

    /// Mutates alert state for one rule's outcome, enqueues a notification
    /// on fresh trigger, and auto-resolves when the condition clears. Returns
    /// the id of the open alert, new or already open.
    async fn apply_evaluation(&self, rule: &Rule, value: f64, threshold: f64, triggered: bool) -> Option<AlertId> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let existing_open = state
            .alerts
            .values()
            .find(|a| a.rule_id == Some(rule.id) && a.status == AlertStatus::Open)
            .map(|a| a.id);

        if !triggered {
            if let Some(id) = existing_open {
                if let Some(alert) = state.alerts.get_mut(&id) {
                    alert.status = AlertStatus::Resolved;
                    alert.resolved_at = Some(now);
                    alert.resolved_by = Some("system".to_string());
                }
            }
            return None;
        }

        if let Some(id) = existing_open {
            return Some(id);
        }

        let alert = Alert {
            id: AlertId::new(),
            rule_id: Some(rule.id),
            alert_type: "metric_threshold".to_string(),
            severity: rule.severity,
            status: AlertStatus::Open,
            title: format!("[{}] {}", rule.severity, rule.name),
            message: format!(
                "Alert '{}' triggered: {} is {:.2} (threshold: {} {:.2})",
                rule.name,
                rule.metric,
                value,
                rule.condition.operator.as_str(),
                threshold
            ),
            metric: rule.metric.clone(),
            current_value: value,
            threshold_value: threshold,
            labels: rule.labels.clone(),
            fired_at: now,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            snoozed_until: None,
            notification_log: Vec::new(),
        };
        let id = alert.id;
        state.alerts.insert(id, alert);
        drop(state);
        self.enqueue_notification(id);
        Some(id)
    }

    fn enqueue_notification(&self, id: AlertId) {
        if self.notify_tx.try_send(id).is_err() {
            self.notify_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(alert_id = %id, "notification queue full, dropping enqueue");
        }
    }

    pub fn dropped_notifications(&self) -> u64 {
        self.notify_dropped.load(Ordering::Relaxed)
    }

    /// One notification attempt per enabled channel, in declared order.
    /// Each send runs on its own task so a panicking `Notifier` surfaces as
    /// a `JoinError` instead of taking the dispatch task down with it.
    async fn dispatch(&self, id: AlertId) {
        let (alert, channels) = {
            let state = self.state.read().await;
            let Some(alert) = state.alerts.get(&id).cloned() else { return };
            let Some(rule_id) = alert.rule_id else {
                return self.record_no_channels(id).await;
            };
            let Some(rule) = state.rules.get(&rule_id) else {
                return self.record_no_channels(id).await;
            };
            let channels: Vec<Channel> = rule
                .channels
                .iter()
                .filter_map(|cid| state.channels.get(cid))
                .filter(|c| c.enabled)
                .cloned()
                .collect();
            (alert, channels)
        };

        for channel in channels {
            let notifier = self.notifiers.read().await.get(&channel.kind).cloned();
            let Some(notifier) = notifier else {
                self.record(id, &channel, false, Some("no notifier registered for channel kind".to_string())).await;
                continue;
            };

            let alert_clone = alert.clone();
            let channel_clone = channel.clone();
            let send_result = tokio::spawn(async move { notifier.send(&alert_clone, &channel_clone).await }).await;

            match send_result {
                Ok(Ok(())) => self.record(id, &channel, true, None).await,
                Ok(Err(e)) => self.record(id, &channel, false, Some(e)).await,
                Err(join_error) => {
                    self.record(id, &channel, false, Some(format!("notifier panicked: {join_error}"))).await;
                }
            }
        }
    }

    async fn record_no_channels(&self, _id: AlertId) {}

    async fn record(&self, id: AlertId, channel: &Channel, success: bool, error: Option<String>) {
        let sent_at = self.clock.now();
        let mut state = self.state.write().await;
        if let Some(alert) = state.alerts.get_mut(&id) {
            alert.notification_log.push(NotificationRecord {
                channel: channel.id,
                sent_at,
                success,
                error,
            });
        }
    }

}

fn spawn_evaluator(me: Weak<AlertEngine>, interval: std::time::Duration, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(engine) = me.upgrade() else { break };
                    let results = engine.evaluate_now().await;
                    debug!(rules_evaluated = results.len(), "alert evaluation tick complete");
                }
            }
        }
    });
}

fn spawn_notifier(me: Weak<AlertEngine>, mut receiver: mpsc::Receiver<AlertId>, cancel: CancellationToken) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = receiver.recv() => {
                    match next {
                        Some(id) => {
                            if let Some(engine) = me.upgrade() {
                                engine.dispatch(id).await;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::model::{Condition, Operator};
    use std::sync::Mutex as StdMutex;

    struct FixedProvider {
        value: StdMutex<f64>,
        baseline: f64,
    }

    #[async_trait::async_trait]
    impl MetricProvider for FixedProvider {
        async fn metric_value(&self, _metric: &str) -> CoreResult<f64> {
            Ok(*self.value.lock().unwrap())
        }
        async fn metric_baseline(&self, _metric: &str, _window: chrono::Duration) -> CoreResult<f64> {
            Ok(self.baseline)
        }
    }

    struct RecordingNotifier {
        sent: Arc<StdMutex<Vec<AlertId>>>,
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, alert: &Alert, _channel: &Channel) -> Result<(), String> {
            self.sent.lock().unwrap().push(alert.id);
            Ok(())
        }
    }

    fn rule(metric: &str, threshold: f64, channels: Vec<ChannelId>) -> Rule {
        Rule {
            id: RuleId::new(),
            name: "high value".to_string(),
            metric: metric.to_string(),
            condition: Condition {
                operator: Operator::Gt,
                threshold,
                compare_with: CompareWith::None,
                change_percent: 0.0,
            },
            duration: chrono::Duration::zero(),
            severity: Severity::Critical,
            channels,
            enabled: true,
            labels: Default::default(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn triggered_rule_fires_exactly_one_open_alert() {
        let provider = Arc::new(FixedProvider { value: StdMutex::new(100.0), baseline: 0.0 });
        let clock = FakeClock::new(chrono::Utc::now());
        let cancel = CancellationToken::new();
        let engine = AlertEngine::new(provider, clock, std::time::Duration::from_secs(3600), 100, cancel.clone());

        let r = rule("cpu", 50.0, vec![]);
        engine.add_rule(r.clone()).await;

        engine.evaluate_now().await;
        engine.evaluate_now().await;

        let alerts = engine.get_alerts(&AlertFilter { rule_id: Some(r.id), ..Default::default() }).await;
        assert_eq!(alerts.len(), 1, "must dedup to at most one open alert per rule");
        assert_eq!(alerts[0].status, AlertStatus::Open);
        cancel.cancel();
    }

    #[tokio::test]
    async fn clearing_condition_auto_resolves() {
        let provider = Arc::new(FixedProvider { value: StdMutex::new(100.0), baseline: 0.0 });
        let clock = FakeClock::new(chrono::Utc::now());
        let cancel = CancellationToken::new();
        let engine = AlertEngine::new(provider.clone(), clock, std::time::Duration::from_secs(3600), 100, cancel.clone());

        let r = rule("cpu", 50.0, vec![]);
        engine.add_rule(r.clone()).await;
        engine.evaluate_now().await;

        *provider.value.lock().unwrap() = 10.0;
        engine.evaluate_now().await;

        let alerts = engine.get_alerts(&AlertFilter { rule_id: Some(r.id), ..Default::default() }).await;
        assert_eq!(alerts[0].status, AlertStatus::Resolved);
        assert_eq!(alerts[0].resolved_by.as_deref(), Some("system"));
        cancel.cancel();
    }

    #[tokio::test]
    async fn manual_fire_dispatches_to_registered_notifier() {
        let provider = Arc::new(FixedProvider { value: StdMutex::new(0.0), baseline: 0.0 });
        let clock = FakeClock::new(chrono::Utc::now());
        let cancel = CancellationToken::new();
        let engine = AlertEngine::new(provider, clock, std::time::Duration::from_secs(3600), 100, cancel.clone());

        let sent = Arc::new(StdMutex::new(Vec::new()));
        engine.register_notifier(ChannelKind::Slack, Arc::new(RecordingNotifier { sent: sent.clone() })).await;

        let channel = Channel {
            id: ChannelId::new(),
            kind: ChannelKind::Slack,
            enabled: true,
            config: Default::default(),
        };
        let channel_id = engine.add_channel(channel).await;

        let mut r = rule("cpu", 1.0, vec![channel_id]);
        r.enabled = true;
        let rule_id = engine.add_rule(r).await;

        let alert = Alert {
            id: AlertId::new(),
            rule_id: Some(rule_id),
            alert_type: "manual".to_string(),
            severity: Severity::Warning,
            status: AlertStatus::Open,
            title: "manual test".to_string(),
            message: "manual test".to_string(),
            metric: "cpu".to_string(),
            current_value: 1.0,
            threshold_value: 1.0,
            labels: Default::default(),
            fired_at: chrono::Utc::now(),
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            snoozed_until: None,
            notification_log: Vec::new(),
        };
        let id = engine.fire_manual(alert).await;

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(sent.lock().unwrap().contains(&id));
        let stored = engine.get_alert(id).await.unwrap();
        assert_eq!(stored.notification_log.len(), 1);
        assert!(stored.notification_log[0].success);
        cancel.cancel();
    }

    #[tokio::test]
    async fn acknowledge_unknown_alert_errors() {
        let provider = Arc::new(FixedProvider { value: StdMutex::new(0.0), baseline: 0.0 });
        let clock = FakeClock::new(chrono::Utc::now());
        let cancel = CancellationToken::new();
        let engine = AlertEngine::new(provider, clock, std::time::Duration::from_secs(3600), 100, cancel.clone());
        let result = engine.acknowledge(AlertId::new(), "alice").await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
        cancel.cancel();
    }

    #[tokio::test]
    async fn resolve_is_idempotent() {
        let provider = Arc::new(FixedProvider { value: StdMutex::new(100.0), baseline: 0.0 });
        let clock = FakeClock::new(chrono::Utc::now());
        let cancel = CancellationToken::new();
        let engine = AlertEngine::new(provider, clock, std::time::Duration::from_secs(3600), 100, cancel.clone());
        let r = rule("cpu", 50.0, vec![]);
        engine.add_rule(r.clone()).await;
        engine.evaluate_now().await;
        let alerts = engine.get_alerts(&AlertFilter { rule_id: Some(r.id), ..Default::default() }).await;
        let id = alerts[0].id;
        engine.resolve(id, "bob").await.unwrap();
        engine.resolve(id, "carol").await.unwrap();
        let alert = engine.get_alert(id).await.unwrap();
        assert_eq!(alert.resolved_by.as_deref(), Some("bob"), "second resolve must be a no-op");
        cancel.cancel();
    }
}
