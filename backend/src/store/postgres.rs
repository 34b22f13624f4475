use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use super::Store;
use crate::db::DbPool;
use crate::error::EngineResult;
use crate::models::*;

const MATCHES: &str = "matches";
const PLAYERS: &str = "players";
const CHALLENGES: &str = "challenges";
const PARTICIPANTS: &str = "challenge_participants";
const CLUBS: &str = "clubs";
const ABUSE: &str = "abuse_metrics";
const ABUSE_ARCHIVE: &str = "abuse_metrics_archive";
const DISPUTES: &str = "disputes";
const MARKERS: &str = "markers";

/// Postgres-backed document store: one JSONB row per entity in `documents`.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn get_doc<T: DeserializeOwned>(&self, collection: &str, id: &str) -> EngineResult<Option<T>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT doc FROM documents WHERE collection = $1 AND id = $2")
                .bind(collection)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((doc,)) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    async fn put_doc<T: Serialize + Sync>(&self, collection: &str, id: &str, doc: &T) -> EngineResult<()> {
        let value = serde_json::to_value(doc)?;
        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, doc, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (collection, id)
            DO UPDATE SET doc = EXCLUDED.doc, updated_at = NOW()
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(value)
        .execute(&self.pool)
        .await?;

        debug!(collection, id, "Document written");
        Ok(())
    }

    /// Documents in `collection` containing `filter` (JSONB `@>`).
    async fn find_docs<T: DeserializeOwned>(
        &self,
        collection: &str,
        filter: serde_json::Value,
    ) -> EngineResult<Vec<T>> {
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
            "SELECT doc FROM documents WHERE collection = $1 AND doc @> $2 ORDER BY updated_at ASC",
        )
        .bind(collection)
        .bind(filter)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(doc,)| serde_json::from_value(doc).map_err(Into::into))
            .collect()
    }

    async fn find_any_status<T: DeserializeOwned, S: Serialize>(
        &self,
        collection: &str,
        base: serde_json::Value,
        statuses: &[S],
    ) -> EngineResult<Vec<T>> {
        let mut out = Vec::new();
        for status in statuses {
            let mut filter = base.clone();
            filter["status"] = serde_json::to_value(status)?;
            out.extend(self.find_docs(collection, filter).await?);
        }
        Ok(out)
    }
}

fn participant_id(challenge_id: Uuid, user_id: &str) -> String {
    format!("{}:{}", challenge_id, user_id)
}

#[async_trait]
impl Store for PgStore {
    async fn insert_match(&self, m: &Match) -> EngineResult<()> {
        self.put_doc(MATCHES, &m.id.to_string(), m).await
    }

    async fn get_match(&self, id: Uuid) -> EngineResult<Option<Match>> {
        self.get_doc(MATCHES, &id.to_string()).await
    }

    async fn save_match(&self, m: &Match) -> EngineResult<()> {
        self.put_doc(MATCHES, &m.id.to_string(), m).await
    }

    async fn list_matches(&self, statuses: &[MatchStatus]) -> EngineResult<Vec<Match>> {
        self.find_any_status(MATCHES, json!({}), statuses).await
    }

    async fn get_player(&self, user_id: &str) -> EngineResult<Option<PlayerRecord>> {
        self.get_doc(PLAYERS, user_id).await
    }

    async fn save_player(&self, player: &PlayerRecord) -> EngineResult<()> {
        self.put_doc(PLAYERS, &player.user_id, player).await
    }

    async fn list_players(&self) -> EngineResult<Vec<PlayerRecord>> {
        self.find_docs(PLAYERS, json!({})).await
    }

    async fn refill_tickets(&self, user_id: &str, season_key: &str, tickets: u32) -> EngineResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET doc = jsonb_set(
                    jsonb_set(doc, '{tickets}', to_jsonb($3::bigint)),
                    '{last_reset_season}', to_jsonb($4::text)
                ),
                updated_at = NOW()
            WHERE collection = $1 AND id = $2
              AND doc->>'last_reset_season' IS DISTINCT FROM $4
            "#,
        )
        .bind(PLAYERS)
        .bind(user_id)
        .bind(i64::from(tickets))
        .bind(season_key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_challenge(&self, id: Uuid) -> EngineResult<Option<Challenge>> {
        self.get_doc(CHALLENGES, &id.to_string()).await
    }

    async fn save_challenge(&self, challenge: &Challenge) -> EngineResult<()> {
        self.put_doc(CHALLENGES, &challenge.id.to_string(), challenge).await
    }

    async fn list_challenges(&self, statuses: &[ChallengeStatus]) -> EngineResult<Vec<Challenge>> {
        self.find_any_status(CHALLENGES, json!({}), statuses).await
    }

    async fn get_participant(
        &self,
        challenge_id: Uuid,
        user_id: &str,
    ) -> EngineResult<Option<ChallengeParticipant>> {
        self.get_doc(PARTICIPANTS, &participant_id(challenge_id, user_id))
            .await
    }

    async fn save_participant(&self, participant: &ChallengeParticipant) -> EngineResult<()> {
        let id = participant_id(participant.challenge_id, &participant.user_id);
        self.put_doc(PARTICIPANTS, &id, participant).await
    }

    async fn list_participants(&self, challenge_id: Uuid) -> EngineResult<Vec<ChallengeParticipant>> {
        self.find_docs(PARTICIPANTS, json!({ "challenge_id": challenge_id }))
            .await
    }

    async fn find_participations(
        &self,
        user_id: &str,
        statuses: &[ParticipantStatus],
    ) -> EngineResult<Vec<ChallengeParticipant>> {
        self.find_any_status(PARTICIPANTS, json!({ "user_id": user_id }), statuses)
            .await
    }

    async fn get_club(&self, id: Uuid) -> EngineResult<Option<Club>> {
        self.get_doc(CLUBS, &id.to_string()).await
    }

    async fn save_club(&self, club: &Club) -> EngineResult<()> {
        self.put_doc(CLUBS, &club.id.to_string(), club).await
    }

    async fn list_clubs(&self) -> EngineResult<Vec<Club>> {
        self.find_docs(CLUBS, json!({})).await
    }

    async fn replace_club_if(&self, expected: &Club, updated: &Club) -> EngineResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET doc = $4, updated_at = NOW()
            WHERE collection = $1 AND id = $2 AND doc = $3
            "#,
        )
        .bind(CLUBS)
        .bind(expected.id.to_string())
        .bind(serde_json::to_value(expected)?)
        .bind(serde_json::to_value(updated)?)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_club_of(&self, user_id: &str) -> EngineResult<Option<Club>> {
        let clubs: Vec<Club> = self
            .find_docs(CLUBS, json!({ "members": [{ "user_id": user_id }] }))
            .await?;
        Ok(clubs.into_iter().next())
    }

    async fn get_abuse_metric(&self, user_id: &str) -> EngineResult<Option<AbuseMetric>> {
        self.get_doc(ABUSE, user_id).await
    }

    async fn save_abuse_metric(&self, metric: &AbuseMetric) -> EngineResult<()> {
        self.put_doc(ABUSE, &metric.user_id, metric).await
    }

    async fn list_abuse_metrics(&self) -> EngineResult<Vec<AbuseMetric>> {
        self.find_docs(ABUSE, json!({})).await
    }

    async fn archive_abuse_metric(&self, archived: &ArchivedAbuseMetric) -> EngineResult<()> {
        let id = format!(
            "{}:{}",
            archived.metric.user_id,
            archived.archived_at.timestamp()
        );
        self.put_doc(ABUSE_ARCHIVE, &id, archived).await
    }

    async fn insert_dispute(&self, dispute: &DisputeRecord) -> EngineResult<()> {
        self.put_doc(DISPUTES, &dispute.id.to_string(), dispute).await
    }

    async fn list_disputes(&self) -> EngineResult<Vec<DisputeRecord>> {
        self.find_docs(DISPUTES, json!({})).await
    }

    async fn get_marker(&self, key: &str) -> EngineResult<Option<String>> {
        let doc: Option<serde_json::Value> = self.get_doc(MARKERS, key).await?;
        Ok(doc.and_then(|d| d["value"].as_str().map(str::to_string)))
    }

    async fn claim_marker(&self, key: &str, value: &str) -> EngineResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO documents (collection, id, doc, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (collection, id)
            DO UPDATE SET doc = EXCLUDED.doc, updated_at = NOW()
            WHERE documents.doc IS DISTINCT FROM EXCLUDED.doc
            "#,
        )
        .bind(MARKERS)
        .bind(key)
        .bind(json!({ "value": value }))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_marker(&self, key: &str, value: &str) -> EngineResult<()> {
        self.put_doc(MARKERS, key, &json!({ "value": value })).await
    }
}
