use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Match lifecycle. COMPLETED and DISPUTED are final for reconciliation
/// purposes; CANCELLED is only reachable before both reports are in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Pregame,
    InProgress,
    Completed,
    Disputed,
    Cancelled,
}

impl MatchStatus {
    pub fn can_transition_to(&self, to: &MatchStatus) -> bool {
        match (self, to) {
            (MatchStatus::Pregame, MatchStatus::InProgress) => true,
            (MatchStatus::Pregame | MatchStatus::InProgress, MatchStatus::Completed) => true,
            (MatchStatus::Pregame | MatchStatus::InProgress, MatchStatus::Disputed) => true,
            (MatchStatus::Pregame | MatchStatus::InProgress, MatchStatus::Cancelled) => true,
            _ => false,
        }
    }

    /// Reports are accepted only while the match is still open.
    pub fn accepts_reports(&self) -> bool {
        matches!(self, MatchStatus::Pregame | MatchStatus::InProgress)
    }

    pub fn is_reconciled(&self) -> bool {
        matches!(self, MatchStatus::Completed | MatchStatus::Disputed)
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchStatus::Pregame => write!(f, "pregame"),
            MatchStatus::InProgress => write!(f, "in_progress"),
            MatchStatus::Completed => write!(f, "completed"),
            MatchStatus::Disputed => write!(f, "disputed"),
            MatchStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One player's self-reported result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportedScore {
    pub own_score: u32,
    pub opponent_score: u32,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub user_id: String,
    pub report: Option<ReportedScore>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Match,
    Mismatch,
}

/// Tracks the second phase of a reconciled match: effects are applied
/// after the outcome is persisted and re-applied by the repair job if
/// the process dies in between.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementState {
    Pending,
    Applied,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepDelta {
    pub user_id: String,
    pub score: u32,
    pub opponent_score: u32,
    pub delta: i64,
    pub rep_before: i64,
    pub hypercharge_multiplier: Option<f64>,
}

impl RepDelta {
    pub fn is_win(&self) -> bool {
        self.score > self.opponent_score
    }

    pub fn is_tie(&self) -> bool {
        self.score == self.opponent_score
    }
}

/// Cached result of reconciliation; returned verbatim on every retry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconciledOutcome {
    pub outcome: Outcome,
    pub rep_deltas: Vec<RepDelta>,
    pub reconciled_at: DateTime<Utc>,
    pub settlement: SettlementState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: Uuid,
    pub players: [Participant; 2],
    pub status: MatchStatus,
    pub outcome: Option<ReconciledOutcome>,
    pub report_deadline: Option<DateTime<Utc>>,
    pub abandoned_pending: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Match {
    pub fn new(player_a: impl Into<String>, player_b: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            players: [
                Participant {
                    user_id: player_a.into(),
                    report: None,
                },
                Participant {
                    user_id: player_b.into(),
                    report: None,
                },
            ],
            status: MatchStatus::Pregame,
            outcome: None,
            report_deadline: None,
            abandoned_pending: false,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    pub fn side_of(&self, user_id: &str) -> Option<usize> {
        self.players.iter().position(|p| p.user_id == user_id)
    }

    pub fn both_reported(&self) -> bool {
        self.players.iter().all(|p| p.report.is_some())
    }

    pub fn player_ids(&self) -> [String; 2] {
        [self.players[0].user_id.clone(), self.players[1].user_id.clone()]
    }

    /// The player that still owes a report, if exactly one side has reported.
    pub fn missing_reporter(&self) -> Option<&Participant> {
        match (&self.players[0].report, &self.players[1].report) {
            (Some(_), None) => Some(&self.players[1]),
            (None, Some(_)) => Some(&self.players[0]),
            _ => None,
        }
    }

    pub fn settlement_pending(&self) -> bool {
        matches!(
            self.outcome,
            Some(ReconciledOutcome {
                outcome: Outcome::Match,
                settlement: SettlementState::Pending,
                ..
            })
        )
    }
}

/// Both raw reports of a disputed match, handed to moderators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisputeRecord {
    pub id: Uuid,
    pub match_id: Uuid,
    pub reports: HashMap<String, ReportedScore>,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
}

/// Event emitted once per reconciled match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchResultEvent {
    pub match_id: Uuid,
    pub outcome: Outcome,
    pub rep_deltas: Vec<RepDelta>,
}

/// What `submit_report` hands back to the command layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Waiting { match_id: Uuid, deadline: DateTime<Utc> },
    Resolved(MatchResultEvent),
}
