use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const MAX_CLUB_MEMBERS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClubMember {
    pub user_id: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Club {
    pub id: Uuid,
    pub name: String,
    pub members: Vec<ClubMember>,
    pub current_season_rep: i64,
    pub total_trophies: i64,
    /// Trophies earned per season key (`YYYY-MM`).
    pub season_trophies: BTreeMap<String, i64>,
    /// Matches already credited this season; cleared on reset.
    pub season_matches: Vec<Uuid>,
    pub last_reset_season: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Club {
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            members: Vec::new(),
            current_season_rep: 0,
            total_trophies: 0,
            season_trophies: BTreeMap::new(),
            season_matches: Vec::new(),
            last_reset_season: None,
            created_at: now,
        }
    }

    pub fn member(&self, user_id: &str) -> Option<&ClubMember> {
        self.members.iter().find(|m| m.user_id == user_id)
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= MAX_CLUB_MEMBERS
    }
}

/// Derived view of the current club league season.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeasonInfo {
    pub season_key: String,
    pub active: bool,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub next_starts_at: DateTime<Utc>,
}

/// Result of feeding one reconciled match into the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LeagueResult {
    SeasonInactive,
    NotApplicable { reason: String },
    Disqualified { reason: String, tickets_spent: Vec<String> },
    Credited {
        winner_club: Uuid,
        loser_club: Uuid,
        winner_gain: i64,
        loser_loss: i64,
    },
    Tie,
    AlreadyCredited,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeasonResetReport {
    pub season_key: String,
    pub clubs_converted: usize,
    pub trophies_awarded: i64,
    pub players_refilled: usize,
}
