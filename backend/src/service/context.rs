use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::locks::{user_key, KeyedLocks};
use crate::models::{ChallengeCompletedEvent, MatchResultEvent, PlayerRecord, SeasonResetReport};
use crate::notify::{Message, Notifications};
use crate::store::Store;

/// Events published to whoever renders results (embeds, announcements).
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    MatchResolved(MatchResultEvent),
    ChallengeCompleted(ChallengeCompletedEvent),
    ChallengeArchived { challenge_id: Uuid, forced: bool },
    SeasonReset(SeasonResetReport),
}

/// Dependencies shared by every service.
#[derive(Clone)]
pub struct ServiceContext {
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub locks: Arc<KeyedLocks>,
    pub notifications: Notifications,
    pub config: Arc<EngineConfig>,
    pub events: broadcast::Sender<EngineEvent>,
}

impl ServiceContext {
    pub fn publish(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Loads a player, creating a fresh record on first sight.
    pub async fn load_player(&self, user_id: &str) -> EngineResult<PlayerRecord> {
        Ok(self
            .store
            .get_player(user_id)
            .await?
            .unwrap_or_else(|| PlayerRecord::new(user_id, self.config.season_tickets)))
    }

    /// Out-of-match rep change (completion bonus, compensation, penalty).
    /// Serialized with match settlement through the user's lock.
    pub async fn adjust_rep(&self, user_id: &str, delta: i64, reason: &str) -> EngineResult<i64> {
        let _guard = self.locks.lock(&user_key(user_id)).await;
        let mut player = self.load_player(user_id).await?;
        let applied = player.adjust_rep(delta);
        self.store.save_player(&player).await?;
        info!(user_id, delta, applied, rep = player.rep, reason, "Rep adjusted");
        Ok(applied)
    }

    /// Credits an award once per `award_key`. The key is written in the same
    /// player save as the rep, so a retry after a later failure is a no-op.
    /// Returns `false` when the award was already paid.
    pub async fn pay_award(&self, user_id: &str, award_key: Uuid, amount: i64, reason: &str) -> EngineResult<bool> {
        let _guard = self.locks.lock(&user_key(user_id)).await;
        let mut player = self.load_player(user_id).await?;
        if player.paid_awards.contains(&award_key) {
            debug!(user_id, award = %award_key, "Award already paid");
            return Ok(false);
        }
        let applied = player.adjust_rep(amount);
        player.paid_awards.push(award_key);
        self.store.save_player(&player).await?;
        info!(user_id, amount, applied, rep = player.rep, reason, "Award paid");
        Ok(true)
    }

    /// Drops replay guards for a fully settled match or award. Best effort.
    pub async fn forget_settled(&self, user_id: &str, key: &Uuid) {
        let _guard = self.locks.lock(&user_key(user_id)).await;
        if let Err(e) = self.prune_guard(user_id, key).await {
            warn!(user_id, key = %key, error = %e, "Replay guard not pruned");
        }
    }

    async fn prune_guard(&self, user_id: &str, key: &Uuid) -> EngineResult<()> {
        let Some(mut player) = self.store.get_player(user_id).await? else {
            return Ok(());
        };
        if player.forget_settled(key) {
            self.store.save_player(&player).await?;
        }
        Ok(())
    }

    /// Logs critical failures and forwards them to the admin channel.
    pub async fn report_failure(&self, operation: &str, err: &EngineError) {
        if err.is_critical() {
            error!(operation, error = %err, "Critical engine failure");
            self.notifications
                .admin(Message::text(format!("[{}] {}", operation, err)))
                .await;
        }
    }
}
