//! Persistence boundary.
//!
//! The engine only relies on atomic single-document writes, simple filtered
//! reads, a few conditional writes for work that several instances may race
//! on, and a compare-and-set marker used for idempotent jobs. Every
//! document is a typed struct from `crate::models`, so malformed documents
//! fail at this boundary instead of deep inside the engine.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::models::*;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait Store: Send + Sync {
    // ----- matches -----
    async fn insert_match(&self, m: &Match) -> EngineResult<()>;
    async fn get_match(&self, id: Uuid) -> EngineResult<Option<Match>>;
    async fn save_match(&self, m: &Match) -> EngineResult<()>;
    async fn list_matches(&self, statuses: &[MatchStatus]) -> EngineResult<Vec<Match>>;

    // ----- players -----
    async fn get_player(&self, user_id: &str) -> EngineResult<Option<PlayerRecord>>;
    async fn save_player(&self, player: &PlayerRecord) -> EngineResult<()>;
    async fn list_players(&self) -> EngineResult<Vec<PlayerRecord>>;
    /// Sets `tickets` and `last_reset_season = season_key` in one atomic
    /// write unless the player was already refilled for `season_key`.
    /// Returns `true` when this call did the refill.
    async fn refill_tickets(&self, user_id: &str, season_key: &str, tickets: u32) -> EngineResult<bool>;

    // ----- challenges -----
    async fn get_challenge(&self, id: Uuid) -> EngineResult<Option<Challenge>>;
    async fn save_challenge(&self, challenge: &Challenge) -> EngineResult<()>;
    async fn list_challenges(&self, statuses: &[ChallengeStatus]) -> EngineResult<Vec<Challenge>>;

    // ----- challenge participants -----
    async fn get_participant(
        &self,
        challenge_id: Uuid,
        user_id: &str,
    ) -> EngineResult<Option<ChallengeParticipant>>;
    async fn save_participant(&self, participant: &ChallengeParticipant) -> EngineResult<()>;
    async fn list_participants(&self, challenge_id: Uuid) -> EngineResult<Vec<ChallengeParticipant>>;
    async fn find_participations(
        &self,
        user_id: &str,
        statuses: &[ParticipantStatus],
    ) -> EngineResult<Vec<ChallengeParticipant>>;

    // ----- clubs -----
    async fn get_club(&self, id: Uuid) -> EngineResult<Option<Club>>;
    async fn save_club(&self, club: &Club) -> EngineResult<()>;
    async fn list_clubs(&self) -> EngineResult<Vec<Club>>;
    /// Replaces the stored club with `updated` only if it still equals
    /// `expected`. Returns `false` when another writer got there first.
    async fn replace_club_if(&self, expected: &Club, updated: &Club) -> EngineResult<bool>;
    async fn find_club_of(&self, user_id: &str) -> EngineResult<Option<Club>>;

    // ----- abuse metrics -----
    async fn get_abuse_metric(&self, user_id: &str) -> EngineResult<Option<AbuseMetric>>;
    async fn save_abuse_metric(&self, metric: &AbuseMetric) -> EngineResult<()>;
    async fn list_abuse_metrics(&self) -> EngineResult<Vec<AbuseMetric>>;
    async fn archive_abuse_metric(&self, archived: &ArchivedAbuseMetric) -> EngineResult<()>;

    // ----- disputes -----
    async fn insert_dispute(&self, dispute: &DisputeRecord) -> EngineResult<()>;
    async fn list_disputes(&self) -> EngineResult<Vec<DisputeRecord>>;

    // ----- idempotency markers -----
    async fn get_marker(&self, key: &str) -> EngineResult<Option<String>>;
    /// Sets `key` to `value` unless it already holds `value`. Returns `true`
    /// when this call changed the marker, i.e. the caller owns the run.
    async fn claim_marker(&self, key: &str, value: &str) -> EngineResult<bool>;
    async fn set_marker(&self, key: &str, value: &str) -> EngineResult<()>;
}
