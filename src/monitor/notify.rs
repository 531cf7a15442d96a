//! Outbound notifications for monitor events.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub text: String,
    /// Time-sensitive delivery with sound.
    pub urgent: bool,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("notification rejected: HTTP {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Pushcut webhook: `{title, text, isTimeSensitive, sound}`.
pub struct PushcutNotifier {
    client: Client,
    webhook: String,
}

impl PushcutNotifier {
    pub fn new(client: Client, webhook: impl Into<String>) -> Self {
        Self {
            client,
            webhook: webhook.into(),
        }
    }
}

#[async_trait]
impl Notifier for PushcutNotifier {
    async fn notify(&self, n: &Notification) -> Result<(), NotifyError> {
        let mut body = json!({
            "title": n.title,
            "text": n.text,
            "isTimeSensitive": n.urgent,
        });
        if n.urgent {
            body["sound"] = json!("vibes");
        }
        // The webhook URL embeds the Pushcut secret.
        let response = self
            .client
            .post(&self.webhook)
            .json(&body)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }
        tracing::info!(title = %n.title, "notify: pushcut alert sent");
        Ok(())
    }
}

/// Fallback when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, n: &Notification) -> Result<(), NotifyError> {
        if n.urgent {
            tracing::warn!(title = %n.title, "notify: {}", n.text);
        } else {
            tracing::info!(title = %n.title, "notify: {}", n.text);
        }
        Ok(())
    }
}
