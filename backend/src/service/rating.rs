//! Rep rating formula.
//!
//! Pure functions only: callers load player state, compute, and persist
//! while holding the per-user locks.

use chrono::{DateTime, Utc};

use crate::models::PlayerRecord;

pub const WIN_BASE: f64 = 75.0;
pub const TIE_BASE: f64 = 37.5;
pub const LOSS_BASE: f64 = -75.0;
pub const RANK_DIFF_STEP: i64 = 225;
pub const RANK_DIFF_CAP: i64 = 20;
pub const SCORE_DIFF_FACTOR: i64 = 3;
pub const SCORE_DIFF_CAP: i64 = 30;
pub const STREAK_FACTOR: i64 = 2;
pub const STREAK_CAP: i64 = 20;

/// Inputs for one side of a match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingInput {
    pub rep: i64,
    pub opponent_rep: i64,
    pub score: u32,
    pub opponent_score: u32,
    pub win_streak: u32,
    /// Active hypercharge multiplier (0.5 for +50%), if any.
    pub hypercharge: Option<f64>,
}

/// Breakdown of a computed delta, kept for display and audit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingBreakdown {
    pub base: f64,
    pub rank_diff_rep: i64,
    pub score_diff_rep: i64,
    pub streak_rep: i64,
    pub delta: i64,
}

pub fn rank_diff_rep(rep: i64, opponent_rep: i64) -> i64 {
    ((rep - opponent_rep).abs() / RANK_DIFF_STEP).min(RANK_DIFF_CAP)
}

pub fn score_diff_rep(score: u32, opponent_score: u32) -> i64 {
    ((score as i64 - opponent_score as i64).abs() * SCORE_DIFF_FACTOR).min(SCORE_DIFF_CAP)
}

pub fn streak_rep(win_streak: u32) -> i64 {
    (win_streak as i64 * STREAK_FACTOR).min(STREAK_CAP)
}

/// Signed rep delta for one player.
pub fn compute_delta(input: &RatingInput) -> RatingBreakdown {
    let is_win = input.score > input.opponent_score;
    let is_tie = input.score == input.opponent_score;

    let rank = rank_diff_rep(input.rep, input.opponent_rep);
    let rd = score_diff_rep(input.score, input.opponent_score);
    let streak = if is_win { streak_rep(input.win_streak) } else { 0 };

    let base = if is_win {
        WIN_BASE
    } else if is_tie {
        TIE_BASE
    } else {
        LOSS_BASE
    };

    let adjustments = if is_win {
        (rank + rd + streak) as f64
    } else if is_tie {
        0.0
    } else {
        -((rank + rd) as f64)
    };

    let mut total = base + adjustments;
    if let Some(multiplier) = input.hypercharge {
        total *= 1.0 + multiplier;
    }

    RatingBreakdown {
        base,
        rank_diff_rep: rank,
        score_diff_rep: rd,
        streak_rep: streak,
        delta: total.round() as i64,
    }
}

/// Applies a computed delta: rep clamps at zero, streak grows on a win and
/// resets otherwise.
pub fn apply_result(player: &mut PlayerRecord, delta: i64, is_win: bool, at: DateTime<Utc>) {
    player.adjust_rep(delta);
    player.win_streak = if is_win { player.win_streak + 1 } else { 0 };
    player.last_match_at = Some(at);
}
