use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Actions guarded by a sliding-window rate limit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAction {
    Command,
    ChallengeStart,
    Report,
    Match,
    QueueJoin,
}

impl RateLimitAction {
    pub const ALL: [RateLimitAction; 5] = [
        RateLimitAction::Command,
        RateLimitAction::ChallengeStart,
        RateLimitAction::Report,
        RateLimitAction::Match,
        RateLimitAction::QueueJoin,
    ];

    /// (window, max events inside the window)
    pub fn window(&self) -> (Duration, u32) {
        match self {
            RateLimitAction::Command => (Duration::from_secs(60), 20),
            RateLimitAction::ChallengeStart => (Duration::from_secs(3600), 3),
            RateLimitAction::Report => (Duration::from_secs(3600), 5),
            RateLimitAction::Match => (Duration::from_secs(3600), 10),
            RateLimitAction::QueueJoin => (Duration::from_secs(300), 15),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitAction::Command => "command",
            RateLimitAction::ChallengeStart => "challenge_start",
            RateLimitAction::Report => "report",
            RateLimitAction::Match => "match",
            RateLimitAction::QueueJoin => "queue_join",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    Disputes,
    Leaves,
    Reports,
    ScoreMismatches,
}

impl ViolationType {
    pub const ALL: [ViolationType; 4] = [
        ViolationType::Disputes,
        ViolationType::Leaves,
        ViolationType::Reports,
        ViolationType::ScoreMismatches,
    ];

    pub fn penalty(&self) -> i64 {
        match self {
            ViolationType::Disputes => 50,
            ViolationType::Leaves => 75,
            ViolationType::Reports => 100,
            ViolationType::ScoreMismatches => 50,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ViolationType::Disputes => "disputes",
            ViolationType::Leaves => "match abandonment",
            ViolationType::Reports => "player reports",
            ViolationType::ScoreMismatches => "score mismatches",
        }
    }
}

/// Rolling per-user abuse counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AbuseMetric {
    pub user_id: String,
    pub disputes: u32,
    pub reports: u32,
    pub leaves: u32,
    pub score_mismatches: u32,
    pub total_matches: u32,
    pub last_penalized: HashMap<ViolationType, DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl AbuseMetric {
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            disputes: 0,
            reports: 0,
            leaves: 0,
            score_mismatches: 0,
            total_matches: 0,
            last_penalized: HashMap::new(),
            updated_at: now,
        }
    }

    pub fn count(&self, violation: ViolationType) -> u32 {
        match violation {
            ViolationType::Disputes => self.disputes,
            ViolationType::Leaves => self.leaves,
            ViolationType::Reports => self.reports,
            ViolationType::ScoreMismatches => self.score_mismatches,
        }
    }

    pub fn ratio(&self, violation: ViolationType) -> f64 {
        if self.total_matches == 0 {
            return 0.0;
        }
        self.count(violation) as f64 / self.total_matches as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchivedAbuseMetric {
    pub metric: AbuseMetric,
    pub archived_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AbuseAction {
    Flagged,
    Penalized,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AbuseFinding {
    pub user_id: String,
    pub violation: ViolationType,
    pub ratio: f64,
    pub action: AbuseAction,
    pub penalty: Option<i64>,
}
