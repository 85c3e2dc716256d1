//! Notifier (C10): sends human-facing alerts on open, close, unwind, and
//! fatal events. A chat-notification webhook is the out-of-scope
//! collaborator named in §1; this crate depends only on the [`Notifier`]
//! interface plus one concrete webhook sink, matching the "log lines for
//! every decision" and "notifications on open/close/unwind/fatal"
//! requirements in §7.

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Critical,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, level: NotificationLevel, message: &str);
}

/// Writes to the tracing log only. Used when no webhook is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, level: NotificationLevel, message: &str) {
        match level {
            NotificationLevel::Info => tracing::info!(%message, "notification"),
            NotificationLevel::Warning => tracing::warn!(%message, "notification"),
            NotificationLevel::Critical => tracing::error!(%message, "notification"),
        }
    }
}

/// Posts a JSON payload to a chat webhook (Slack/Discord-compatible
/// `{"text": ...}` shape). Best-effort: a failed POST is logged, never
/// propagated, since notification delivery must not block trading.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        WebhookNotifier { client: reqwest::Client::new(), url: url.into() }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, level: NotificationLevel, message: &str) {
        let prefix = match level {
            NotificationLevel::Info => "ℹ️",
            NotificationLevel::Warning => "⚠️",
            NotificationLevel::Critical => "🚨",
        };
        let body = serde_json::json!({ "text": format!("{prefix} {message}") });
        if let Err(err) = self.client.post(&self.url).json(&body).send().await {
            tracing::warn!(%err, "notification webhook delivery failed");
        }
    }
}
