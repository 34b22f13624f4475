use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::{Embed, Message, ModerationQueue, Notifications};
use crate::error::EngineResult;
use crate::models::DisputeRecord;
use crate::store::Store;

/// Persists disputes and pings the moderation channel.
pub struct StoreModerationQueue {
    store: Arc<dyn Store>,
    notifications: Notifications,
    channel_id: String,
}

impl StoreModerationQueue {
    pub fn new(store: Arc<dyn Store>, notifications: Notifications, channel_id: impl Into<String>) -> Self {
        Self {
            store,
            notifications,
            channel_id: channel_id.into(),
        }
    }
}

#[async_trait]
impl ModerationQueue for StoreModerationQueue {
    async fn enqueue(&self, dispute: &DisputeRecord) -> EngineResult<()> {
        self.store.insert_dispute(dispute).await?;
        info!(match_id = %dispute.match_id, dispute_id = %dispute.id, "Dispute queued for moderation");

        let mut embed = Embed::new(
            "Score dispute",
            format!("Match {} needs a moderator decision", dispute.match_id),
        );
        let mut reporters: Vec<_> = dispute.reports.iter().collect();
        reporters.sort_by(|a, b| a.0.cmp(b.0));
        for (user_id, report) in reporters {
            embed = embed.field(
                format!("Reported by {}", user_id),
                format!("{} - {}", report.own_score, report.opponent_score),
            );
        }
        self.notifications
            .channel(&self.channel_id, Message::Embed(embed))
            .await;
        Ok(())
    }
}
