use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use super::{Message, Notifier};
use crate::error::{EngineError, EngineResult};

/// Posts notifications to the chat gateway's webhook endpoint.
pub struct WebhookNotifier {
    client: reqwest::Client,
    base_url: String,
}

impl WebhookNotifier {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> EngineResult<()> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::NotificationFailed(format!("webhook unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(EngineError::NotificationFailed(format!(
                "webhook rejected notification with {}",
                response.status()
            )));
        }
        debug!(url = %url, "Notification delivered");
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_user(&self, user_id: &str, message: &Message) -> EngineResult<()> {
        self.post("users", json!({ "user_id": user_id, "message": message }))
            .await
    }

    async fn notify_channel(&self, channel_id: &str, message: &Message) -> EngineResult<()> {
        self.post("channels", json!({ "channel_id": channel_id, "message": message }))
            .await
    }
}

/// Used when no webhook is configured: notifications only reach the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_user(&self, user_id: &str, message: &Message) -> EngineResult<()> {
        info!(user_id, message = %message.plain(), "notify user");
        Ok(())
    }

    async fn notify_channel(&self, channel_id: &str, message: &Message) -> EngineResult<()> {
        info!(channel_id, message = %message.plain(), "notify channel");
        Ok(())
    }
}
