use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::Store;
use crate::error::EngineResult;
use crate::models::*;

/// In-process store. Good for tests and single-node dry runs; nothing
/// survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    matches: RwLock<HashMap<Uuid, Match>>,
    players: RwLock<HashMap<String, PlayerRecord>>,
    challenges: RwLock<HashMap<Uuid, Challenge>>,
    participants: RwLock<HashMap<(Uuid, String), ChallengeParticipant>>,
    clubs: RwLock<HashMap<Uuid, Club>>,
    abuse: RwLock<HashMap<String, AbuseMetric>>,
    abuse_archive: RwLock<Vec<ArchivedAbuseMetric>>,
    disputes: RwLock<Vec<DisputeRecord>>,
    markers: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn archived_abuse_metrics(&self) -> Vec<ArchivedAbuseMetric> {
        self.abuse_archive.read().await.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_match(&self, m: &Match) -> EngineResult<()> {
        self.matches.write().await.insert(m.id, m.clone());
        Ok(())
    }

    async fn get_match(&self, id: Uuid) -> EngineResult<Option<Match>> {
        Ok(self.matches.read().await.get(&id).cloned())
    }

    async fn save_match(&self, m: &Match) -> EngineResult<()> {
        self.matches.write().await.insert(m.id, m.clone());
        Ok(())
    }

    async fn list_matches(&self, statuses: &[MatchStatus]) -> EngineResult<Vec<Match>> {
        Ok(self
            .matches
            .read()
            .await
            .values()
            .filter(|m| statuses.contains(&m.status))
            .cloned()
            .collect())
    }

    async fn get_player(&self, user_id: &str) -> EngineResult<Option<PlayerRecord>> {
        Ok(self.players.read().await.get(user_id).cloned())
    }

    async fn save_player(&self, player: &PlayerRecord) -> EngineResult<()> {
        self.players
            .write()
            .await
            .insert(player.user_id.clone(), player.clone());
        Ok(())
    }

    async fn list_players(&self) -> EngineResult<Vec<PlayerRecord>> {
        Ok(self.players.read().await.values().cloned().collect())
    }

    async fn refill_tickets(&self, user_id: &str, season_key: &str, tickets: u32) -> EngineResult<bool> {
        let mut players = self.players.write().await;
        match players.get_mut(user_id) {
            Some(p) if p.last_reset_season.as_deref() != Some(season_key) => {
                p.tickets = tickets;
                p.last_reset_season = Some(season_key.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_challenge(&self, id: Uuid) -> EngineResult<Option<Challenge>> {
        Ok(self.challenges.read().await.get(&id).cloned())
    }

    async fn save_challenge(&self, challenge: &Challenge) -> EngineResult<()> {
        self.challenges
            .write()
            .await
            .insert(challenge.id, challenge.clone());
        Ok(())
    }

    async fn list_challenges(&self, statuses: &[ChallengeStatus]) -> EngineResult<Vec<Challenge>> {
        Ok(self
            .challenges
            .read()
            .await
            .values()
            .filter(|c| statuses.contains(&c.status))
            .cloned()
            .collect())
    }

    async fn get_participant(
        &self,
        challenge_id: Uuid,
        user_id: &str,
    ) -> EngineResult<Option<ChallengeParticipant>> {
        Ok(self
            .participants
            .read()
            .await
            .get(&(challenge_id, user_id.to_string()))
            .cloned())
    }

    async fn save_participant(&self, participant: &ChallengeParticipant) -> EngineResult<()> {
        self.participants.write().await.insert(
            (participant.challenge_id, participant.user_id.clone()),
            participant.clone(),
        );
        Ok(())
    }

    async fn list_participants(&self, challenge_id: Uuid) -> EngineResult<Vec<ChallengeParticipant>> {
        Ok(self
            .participants
            .read()
            .await
            .values()
            .filter(|p| p.challenge_id == challenge_id)
            .cloned()
            .collect())
    }

    async fn find_participations(
        &self,
        user_id: &str,
        statuses: &[ParticipantStatus],
    ) -> EngineResult<Vec<ChallengeParticipant>> {
        Ok(self
            .participants
            .read()
            .await
            .values()
            .filter(|p| p.user_id == user_id && statuses.contains(&p.status))
            .cloned()
            .collect())
    }

    async fn get_club(&self, id: Uuid) -> EngineResult<Option<Club>> {
        Ok(self.clubs.read().await.get(&id).cloned())
    }

    async fn save_club(&self, club: &Club) -> EngineResult<()> {
        self.clubs.write().await.insert(club.id, club.clone());
        Ok(())
    }

    async fn list_clubs(&self) -> EngineResult<Vec<Club>> {
        Ok(self.clubs.read().await.values().cloned().collect())
    }

    async fn replace_club_if(&self, expected: &Club, updated: &Club) -> EngineResult<bool> {
        let mut clubs = self.clubs.write().await;
        if clubs.get(&expected.id) != Some(expected) {
            return Ok(false);
        }
        clubs.insert(updated.id, updated.clone());
        Ok(true)
    }

    async fn find_club_of(&self, user_id: &str) -> EngineResult<Option<Club>> {
        Ok(self
            .clubs
            .read()
            .await
            .values()
            .find(|c| c.member(user_id).is_some())
            .cloned())
    }

    async fn get_abuse_metric(&self, user_id: &str) -> EngineResult<Option<AbuseMetric>> {
        Ok(self.abuse.read().await.get(user_id).cloned())
    }

    async fn save_abuse_metric(&self, metric: &AbuseMetric) -> EngineResult<()> {
        self.abuse
            .write()
            .await
            .insert(metric.user_id.clone(), metric.clone());
        Ok(())
    }

    async fn list_abuse_metrics(&self) -> EngineResult<Vec<AbuseMetric>> {
        Ok(self.abuse.read().await.values().cloned().collect())
    }

    async fn archive_abuse_metric(&self, archived: &ArchivedAbuseMetric) -> EngineResult<()> {
        self.abuse_archive.write().await.push(archived.clone());
        Ok(())
    }

    async fn insert_dispute(&self, dispute: &DisputeRecord) -> EngineResult<()> {
        let mut disputes = self.disputes.write().await;
        match disputes.iter_mut().find(|d| d.id == dispute.id) {
            Some(existing) => *existing = dispute.clone(),
            None => disputes.push(dispute.clone()),
        }
        Ok(())
    }

    async fn list_disputes(&self) -> EngineResult<Vec<DisputeRecord>> {
        Ok(self.disputes.read().await.clone())
    }

    async fn get_marker(&self, key: &str) -> EngineResult<Option<String>> {
        Ok(self.markers.read().await.get(key).cloned())
    }

    async fn claim_marker(&self, key: &str, value: &str) -> EngineResult<bool> {
        let mut markers = self.markers.write().await;
        if markers.get(key).map(String::as_str) == Some(value) {
            return Ok(false);
        }
        markers.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn set_marker(&self, key: &str, value: &str) -> EngineResult<()> {
        self.markers
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
