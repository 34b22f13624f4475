use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rating and club-league state for one user.
///
/// `rep` never goes negative. `rated_matches`, `ticket_matches` and
/// `paid_awards` hold the keys of effects already applied whose settlement is
/// still open, so a repaired settlement cannot apply them twice. Keys are
/// dropped once the owning match or award is fully settled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerRecord {
    pub user_id: String,
    pub rep: i64,
    pub win_streak: u32,
    pub last_match_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rated_matches: Vec<Uuid>,
    pub tickets: u32,
    #[serde(default)]
    pub ticket_matches: Vec<Uuid>,
    #[serde(default)]
    pub paid_awards: Vec<Uuid>,
    pub last_reset_season: Option<String>,
    pub notifications_enabled: bool,
}

impl PlayerRecord {
    pub fn new(user_id: impl Into<String>, tickets: u32) -> Self {
        Self {
            user_id: user_id.into(),
            rep: 0,
            win_streak: 0,
            last_match_at: None,
            rated_matches: Vec::new(),
            tickets,
            ticket_matches: Vec::new(),
            paid_awards: Vec::new(),
            last_reset_season: None,
            notifications_enabled: true,
        }
    }

    /// Adds `delta`, clamping at zero. Returns the applied change.
    pub fn adjust_rep(&mut self, delta: i64) -> i64 {
        let before = self.rep;
        self.rep = (self.rep + delta).max(0);
        self.rep - before
    }

    /// Drops `key` from every replay guard. Returns whether anything changed.
    pub fn forget_settled(&mut self, key: &Uuid) -> bool {
        let before = self.rated_matches.len() + self.ticket_matches.len() + self.paid_awards.len();
        self.rated_matches.retain(|id| id != key);
        self.ticket_matches.retain(|id| id != key);
        self.paid_awards.retain(|id| id != key);
        before != self.rated_matches.len() + self.ticket_matches.len() + self.paid_awards.len()
    }
}
