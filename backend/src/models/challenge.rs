use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Challenge lifecycle - SCHEDULED -> ACTIVE <-> PAUSED -> ARCHIVED
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeStatus {
    Scheduled,
    Active,
    Paused,
    Archived,
}

impl ChallengeStatus {
    /// Check if transition to another state is valid
    pub fn can_transition_to(&self, to: &ChallengeStatus) -> bool {
        match (self, to) {
            (ChallengeStatus::Scheduled, ChallengeStatus::Active) => true,
            (ChallengeStatus::Active, ChallengeStatus::Paused) => true,
            (ChallengeStatus::Paused, ChallengeStatus::Active) => true,
            (ChallengeStatus::Scheduled, ChallengeStatus::Archived) => true,
            (ChallengeStatus::Active, ChallengeStatus::Archived) => true,
            (ChallengeStatus::Paused, ChallengeStatus::Archived) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChallengeStatus::Archived)
    }
}

/// Time-boxed rep multiplier. Never cleared on expiry; readers compare
/// against `expires_at` themselves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hypercharge {
    pub multiplier: f64,
    pub expires_at: DateTime<Utc>,
}

impl Hypercharge {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Challenge {
    pub id: Uuid,
    pub name: String,
    pub lives: u32,
    pub wins_required: u32,
    pub reward_badge: String,
    pub status: ChallengeStatus,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub hypercharge: Option<Hypercharge>,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl Challenge {
    /// Multiplier in effect at `now`, if any.
    pub fn active_multiplier(&self, now: DateTime<Utc>) -> Option<f64> {
        self.hypercharge
            .as_ref()
            .filter(|h| h.is_active(now))
            .map(|h| h.multiplier)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantStatus {
    Active,
    Completed,
    Failed,
    Dnf,
    Paused,
}

impl ParticipantStatus {
    pub const ALL: [ParticipantStatus; 5] = [
        ParticipantStatus::Active,
        ParticipantStatus::Completed,
        ParticipantStatus::Failed,
        ParticipantStatus::Dnf,
        ParticipantStatus::Paused,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ParticipantStatus::Completed | ParticipantStatus::Failed | ParticipantStatus::Dnf
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchResultKind {
    Win,
    Loss,
    Tie,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchEntry {
    pub match_id: Uuid,
    pub result: MatchResultKind,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChallengeParticipant {
    pub challenge_id: Uuid,
    pub user_id: String,
    pub wins: u32,
    pub lives: u32,
    pub attempts: u32,
    pub status: ParticipantStatus,
    pub matches: Vec<MatchEntry>,
    pub joined_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completion_bonus: Option<i64>,
    /// Rep owed to the player but not yet credited; cleared once paid.
    pub pending_award: Option<i64>,
    pub status_reason: Option<String>,
}

impl ChallengeParticipant {
    pub fn new(challenge: &Challenge, user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            challenge_id: challenge.id,
            user_id: user_id.into(),
            wins: 0,
            lives: challenge.lives,
            attempts: 1,
            status: ParticipantStatus::Active,
            matches: Vec::new(),
            joined_at: now,
            completed_at: None,
            completion_bonus: None,
            pending_award: None,
            status_reason: None,
        }
    }

    pub fn has_recorded(&self, match_id: &Uuid) -> bool {
        self.matches.iter().any(|m| &m.match_id == match_id)
    }

    pub fn losses(&self) -> u32 {
        self.matches
            .iter()
            .filter(|m| m.result == MatchResultKind::Loss)
            .count() as u32
    }

    pub fn recorded_wins(&self) -> u32 {
        self.matches
            .iter()
            .filter(|m| m.result == MatchResultKind::Win)
            .count() as u32
    }
}

/// Definition submitted by an admin to schedule a challenge.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateChallengeRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(range(min = 1, max = 50))]
    pub lives: u32,
    #[validate(range(min = 1, max = 500))]
    pub wins_required: u32,
    #[validate(length(min = 1, max = 100))]
    pub reward_badge: String,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChallengeCompletedEvent {
    pub challenge_id: Uuid,
    pub user_id: String,
    pub badge: String,
    pub bonus: i64,
}

/// What happened to a participant as the result of one reconciled match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressUpdate {
    NotParticipating,
    AlreadyRecorded,
    Won { wins: u32, wins_required: u32 },
    Lost { lives: u32 },
    Tied,
    Completed(ChallengeCompletedEvent),
    Reset { attempts: u32 },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: String,
    pub wins: u32,
    pub lives: u32,
    pub attempts: u32,
    pub status: ParticipantStatus,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardPage {
    pub challenge_id: Uuid,
    pub page: usize,
    pub total_pages: usize,
    pub total_participants: usize,
    pub entries: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChallengeStats {
    pub challenge_id: Uuid,
    pub total_participants: usize,
    pub active: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
    pub dnf: usize,
    pub completion_rate: f64,
    pub average_wins: f64,
    pub average_attempts: f64,
    pub total_matches: usize,
}
