use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Message, ModerationQueue, Notifier};
use crate::error::{EngineError, EngineResult};
use crate::models::DisputeRecord;

/// Keeps every notification in memory. Users listed in `blocked` reject
/// delivery, mimicking closed DMs.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub user_messages: Mutex<Vec<(String, Message)>>,
    pub channel_messages: Mutex<Vec<(String, Message)>>,
    blocked: Vec<String>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blocked(blocked: Vec<String>) -> Self {
        Self {
            blocked,
            ..Self::default()
        }
    }

    pub async fn messages_for(&self, user_id: &str) -> Vec<Message> {
        self.user_messages
            .lock()
            .await
            .iter()
            .filter(|(u, _)| u == user_id)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub async fn channel_messages_for(&self, channel_id: &str) -> Vec<Message> {
        self.channel_messages
            .lock()
            .await
            .iter()
            .filter(|(c, _)| c == channel_id)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_user(&self, user_id: &str, message: &Message) -> EngineResult<()> {
        if self.blocked.iter().any(|b| b == user_id) {
            return Err(EngineError::NotificationFailed(format!("{} has DMs disabled", user_id)));
        }
        self.user_messages
            .lock()
            .await
            .push((user_id.to_string(), message.clone()));
        Ok(())
    }

    async fn notify_channel(&self, channel_id: &str, message: &Message) -> EngineResult<()> {
        self.channel_messages
            .lock()
            .await
            .push((channel_id.to_string(), message.clone()));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingModerationQueue {
    pub items: Mutex<Vec<DisputeRecord>>,
}

#[async_trait]
impl ModerationQueue for RecordingModerationQueue {
    async fn enqueue(&self, dispute: &DisputeRecord) -> EngineResult<()> {
        self.items.lock().await.push(dispute.clone());
        Ok(())
    }
}
