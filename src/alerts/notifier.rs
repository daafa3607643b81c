//! `Notifier` — the capability `AlertEngine` dispatches alerts through,
//! registered per `ChannelKind` at construction time so new transports are
//! pluggable without the engine hard-coding the built-in set.

use crate::model::{Alert, Channel};
use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `alert` over `channel`. Errors are reported as a value, never
    /// a panic; the engine guards each call regardless.
    async fn send(&self, alert: &Alert, channel: &Channel) -> Result<(), String>;
}

/// Always succeeds; logs at `info`. The zero-config default and useful in
/// tests.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, alert: &Alert, channel: &Channel) -> Result<(), String> {
        info!(alert_id = %alert.id, channel_id = %channel.id, severity = %alert.severity, "{}", alert.message);
        Ok(())
    }
}

/// POSTs a JSON payload to `channel.config["url"]` — the shared transport
/// behind `webhook`/`slack`/`teams`/`discord` channel kinds.
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, alert: &Alert, channel: &Channel) -> Result<(), String> {
        let url = channel
            .config
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "channel config missing 'url'".to_string())?;

        let payload = serde_json::json!({
            "alert_id": alert.id.to_string(),
            "title": alert.title,
            "message": alert.message,
            "severity": alert.severity,
            "metric": alert.metric,
            "current_value": alert.current_value,
            "threshold_value": alert.threshold_value,
            "fired_at": alert.fired_at,
        });

        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("webhook endpoint returned {}", response.status()))
        }
    }
}
