//! Outbound collaborators: user/channel notifications and the moderation queue.
//!
//! Notification delivery is best-effort. Callers go through [`Notifications`],
//! which logs and swallows failures so a user with DMs disabled can never
//! block reconciliation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::error::EngineResult;
use crate::models::DisputeRecord;

pub mod moderation;
pub mod recording;
pub mod webhook;

pub use moderation::StoreModerationQueue;
pub use recording::{RecordingModerationQueue, RecordingNotifier};
pub use webhook::{LogNotifier, WebhookNotifier};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub fields: Vec<EmbedField>,
}

impl Embed {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.to_string(),
        });
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Message {
    Text(String),
    Embed(Embed),
}

impl Message {
    pub fn text(body: impl Into<String>) -> Self {
        Message::Text(body.into())
    }

    /// Flattened text, handy for logs and assertions.
    pub fn plain(&self) -> String {
        match self {
            Message::Text(t) => t.clone(),
            Message::Embed(e) => {
                let mut out = format!("{}: {}", e.title, e.description);
                for f in &e.fields {
                    out.push_str(&format!(" | {}: {}", f.name, f.value));
                }
                out
            }
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_user(&self, user_id: &str, message: &Message) -> EngineResult<()>;
    async fn notify_channel(&self, channel_id: &str, message: &Message) -> EngineResult<()>;
}

#[async_trait]
pub trait ModerationQueue: Send + Sync {
    async fn enqueue(&self, dispute: &DisputeRecord) -> EngineResult<()>;
}

/// Best-effort fan-out wrapper around a [`Notifier`].
#[derive(Clone)]
pub struct Notifications {
    inner: Arc<dyn Notifier>,
    admin_channel_id: String,
}

impl Notifications {
    pub fn new(inner: Arc<dyn Notifier>, admin_channel_id: impl Into<String>) -> Self {
        Self {
            inner,
            admin_channel_id: admin_channel_id.into(),
        }
    }

    pub async fn user(&self, user_id: &str, message: Message) {
        if let Err(e) = self.inner.notify_user(user_id, &message).await {
            warn!(user_id, error = %e, "User notification dropped");
        }
    }

    pub async fn channel(&self, channel_id: &str, message: Message) {
        if let Err(e) = self.inner.notify_channel(channel_id, &message).await {
            warn!(channel_id, error = %e, "Channel notification dropped");
        }
    }

    pub async fn admin(&self, message: Message) {
        let channel = self.admin_channel_id.clone();
        self.channel(&channel, message).await;
    }
}
