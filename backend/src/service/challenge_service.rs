use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::cache::TtlCache;
use crate::config::LivesExhaustedPolicy;
use crate::error::{EngineError, EngineResult};
use crate::models::*;
use crate::notify::{Embed, Message};
use crate::service::abuse_monitor::AbuseMonitor;
use crate::service::context::{EngineEvent, ServiceContext};
use crate::service::hypercharge;

pub const LEADERBOARD_PAGE_SIZE: usize = 10;
pub const COMPLETION_BASE_BONUS: i64 = 100;
pub const COMPLETION_SPEED_BONUS: i64 = 50;
pub const COMPLETION_SPEED_WINDOW_HOURS: i64 = 24;
pub const COMPLETION_REP_PER_LIFE: i64 = 10;
pub const COMPLETION_WIN_RATE_BONUS: f64 = 50.0;

const LIFECYCLE_LOCK: &str = "challenge:lifecycle";

fn challenge_key(id: &Uuid) -> String {
    format!("challenge:{}", id)
}

fn participant_key(challenge_id: &Uuid, user_id: &str) -> String {
    format!("participant:{}:{}", challenge_id, user_id)
}

/// Completion bonus before any hypercharge.
pub fn completion_bonus(participant: &ChallengeParticipant, completed_at: DateTime<Utc>) -> i64 {
    let speed = if completed_at - participant.joined_at <= Duration::hours(COMPLETION_SPEED_WINDOW_HOURS) {
        COMPLETION_SPEED_BONUS
    } else {
        0
    };
    let lives = COMPLETION_REP_PER_LIFE * participant.lives as i64;

    let wins = participant.recorded_wins();
    let decided = wins + participant.losses();
    let win_rate_bonus = if decided == 0 {
        0
    } else {
        (COMPLETION_WIN_RATE_BONUS * wins as f64 / decided as f64).round() as i64
    };

    COMPLETION_BASE_BONUS + speed + lives + win_rate_bonus
}

/// Challenge lifecycle and per-participant progression.
pub struct ChallengeService {
    ctx: ServiceContext,
    abuse: Arc<AbuseMonitor>,
    leaderboards: TtlCache<LeaderboardPage>,
    stats: TtlCache<ChallengeStats>,
}

impl ChallengeService {
    pub fn new(ctx: ServiceContext, abuse: Arc<AbuseMonitor>) -> Self {
        Self {
            ctx,
            abuse,
            leaderboards: TtlCache::new(std::time::Duration::from_secs(30)),
            stats: TtlCache::new(std::time::Duration::from_secs(30)),
        }
    }

    // =============================================================================
    // LIFECYCLE
    // =============================================================================

    pub async fn create_challenge(&self, req: CreateChallengeRequest) -> EngineResult<Challenge> {
        req.validate()?;
        if let (Some(start), Some(end)) = (req.starts_at, req.ends_at) {
            if end <= start {
                return Err(EngineError::Validation("challenge must end after it starts".into()));
            }
        }

        let challenge = Challenge {
            id: Uuid::new_v4(),
            name: req.name,
            lives: req.lives,
            wins_required: req.wins_required,
            reward_badge: req.reward_badge,
            status: ChallengeStatus::Scheduled,
            starts_at: req.starts_at,
            ends_at: req.ends_at,
            hypercharge: None,
            created_at: self.ctx.clock.now(),
            activated_at: None,
            archived_at: None,
        };
        self.ctx.store.save_challenge(&challenge).await?;
        info!(challenge_id = %challenge.id, name = %challenge.name, "Challenge scheduled");
        Ok(challenge)
    }

    pub async fn get_challenge(&self, id: Uuid) -> EngineResult<Challenge> {
        self.ctx
            .store
            .get_challenge(id)
            .await?
            .ok_or(EngineError::ChallengeNotFound)
    }

    /// SCHEDULED -> ACTIVE. Any other ACTIVE challenge is force-archived first.
    pub async fn start_challenge(&self, id: Uuid) -> EngineResult<Challenge> {
        let _lifecycle = self.ctx.locks.lock(LIFECYCLE_LOCK).await;
        let challenge = self.get_challenge(id).await?;
        validate_transition(&challenge.status, &ChallengeStatus::Active)?;
        if challenge.status != ChallengeStatus::Scheduled {
            return Err(EngineError::invalid_transition(challenge.status, ChallengeStatus::Active));
        }
        self.activate(challenge).await
    }

    /// PAUSED -> ACTIVE, keeping the single-active invariant.
    pub async fn resume_challenge(&self, id: Uuid) -> EngineResult<Challenge> {
        let _lifecycle = self.ctx.locks.lock(LIFECYCLE_LOCK).await;
        let challenge = self.get_challenge(id).await?;
        if challenge.status != ChallengeStatus::Paused {
            return Err(EngineError::invalid_transition(challenge.status, ChallengeStatus::Active));
        }
        self.activate(challenge).await
    }

    async fn activate(&self, mut challenge: Challenge) -> EngineResult<Challenge> {
        let now = self.ctx.clock.now();
        for other in self.ctx.store.list_challenges(&[ChallengeStatus::Active]).await? {
            if other.id != challenge.id {
                warn!(
                    previous = %other.id,
                    next = %challenge.id,
                    "Force-archiving active challenge"
                );
                self.archive(other, true).await?;
            }
        }

        let resuming = challenge.status == ChallengeStatus::Paused;
        {
            let _guard = self.ctx.locks.lock(&challenge_key(&challenge.id)).await;
            challenge.status = ChallengeStatus::Active;
            if challenge.activated_at.is_none() {
                challenge.activated_at = Some(now);
            }
            self.ctx.store.save_challenge(&challenge).await?;
        }

        if resuming {
            self.set_participant_status(challenge.id, ParticipantStatus::Paused, ParticipantStatus::Active)
                .await?;
        }
        self.invalidate(challenge.id).await;
        info!(challenge_id = %challenge.id, resuming, "Challenge active");
        Ok(challenge)
    }

    pub async fn pause_challenge(&self, id: Uuid) -> EngineResult<Challenge> {
        let _lifecycle = self.ctx.locks.lock(LIFECYCLE_LOCK).await;
        let mut challenge = self.get_challenge(id).await?;
        validate_transition(&challenge.status, &ChallengeStatus::Paused)?;
        {
            let _guard = self.ctx.locks.lock(&challenge_key(&id)).await;
            challenge.status = ChallengeStatus::Paused;
            self.ctx.store.save_challenge(&challenge).await?;
        }
        self.set_participant_status(id, ParticipantStatus::Active, ParticipantStatus::Paused)
            .await?;
        self.invalidate(id).await;
        info!(challenge_id = %id, "Challenge paused");
        Ok(challenge)
    }

    /// Ends a challenge normally: ARCHIVED, unfinished participants become DNF.
    pub async fn end_challenge(&self, id: Uuid) -> EngineResult<Challenge> {
        let _lifecycle = self.ctx.locks.lock(LIFECYCLE_LOCK).await;
        let challenge = self.get_challenge(id).await?;
        validate_transition(&challenge.status, &ChallengeStatus::Archived)?;
        self.archive(challenge, false).await
    }

    /// Archives `challenge`. When `forced`, every ACTIVE participant is
    /// compensated because a newer challenge pre-empted theirs.
    async fn archive(&self, mut challenge: Challenge, forced: bool) -> EngineResult<Challenge> {
        let now = self.ctx.clock.now();
        {
            let _guard = self.ctx.locks.lock(&challenge_key(&challenge.id)).await;
            challenge.status = ChallengeStatus::Archived;
            challenge.archived_at = Some(now);
            self.ctx.store.save_challenge(&challenge).await?;
        }

        let compensation = self.ctx.config.challenge_compensation_rep;
        for participant in self.ctx.store.list_participants(challenge.id).await? {
            if participant.status.is_terminal() {
                continue;
            }
            let _guard = self
                .ctx
                .locks
                .lock(&participant_key(&challenge.id, &participant.user_id))
                .await;
            let Some(mut p) = self
                .ctx
                .store
                .get_participant(challenge.id, &participant.user_id)
                .await?
            else {
                continue;
            };
            if p.status.is_terminal() {
                continue;
            }
            let was_active = p.status == ParticipantStatus::Active;
            p.status = ParticipantStatus::Dnf;
            p.status_reason = Some(if forced {
                "challenge replaced by a new challenge".to_string()
            } else {
                "challenge ended".to_string()
            });
            if forced && was_active && compensation > 0 {
                p.pending_award = Some(compensation);
            }
            self.ctx.store.save_participant(&p).await?;
            self.pay_pending_award(&mut p).await?;

            if forced && was_active {
                self.ctx
                    .notifications
                    .user(
                        &p.user_id,
                        Message::text(format!(
                            "Challenge '{}' was ended early to make room for a new one. You received {} rep as compensation.",
                            challenge.name, compensation
                        )),
                    )
                    .await;
            }
        }

        self.invalidate(challenge.id).await;
        self.ctx.publish(EngineEvent::ChallengeArchived {
            challenge_id: challenge.id,
            forced,
        });
        info!(challenge_id = %challenge.id, forced, "Challenge archived");
        Ok(challenge)
    }

    async fn set_participant_status(
        &self,
        challenge_id: Uuid,
        from: ParticipantStatus,
        to: ParticipantStatus,
    ) -> EngineResult<usize> {
        let mut changed = 0;
        for participant in self.ctx.store.list_participants(challenge_id).await? {
            if participant.status != from {
                continue;
            }
            let _guard = self
                .ctx
                .locks
                .lock(&participant_key(&challenge_id, &participant.user_id))
                .await;
            if let Some(mut p) = self
                .ctx
                .store
                .get_participant(challenge_id, &participant.user_id)
                .await?
            {
                if p.status == from {
                    p.status = to;
                    self.ctx.store.save_participant(&p).await?;
                    changed += 1;
                }
            }
        }
        debug!(challenge_id = %challenge_id, ?from, ?to, changed, "Participants moved");
        Ok(changed)
    }

    // =============================================================================
    // PARTICIPATION
    // =============================================================================

    pub async fn join_challenge(&self, user_id: &str, challenge_id: Uuid) -> EngineResult<ChallengeParticipant> {
        let challenge = self.get_challenge(challenge_id).await?;
        if challenge.status != ChallengeStatus::Active {
            return Err(EngineError::ChallengeNotActive);
        }
        self.abuse
            .check_rate(user_id, RateLimitAction::ChallengeStart)
            .await?;

        let _guard = self
            .ctx
            .locks
            .lock(&participant_key(&challenge_id, user_id))
            .await;
        if self
            .ctx
            .store
            .get_participant(challenge_id, user_id)
            .await?
            .is_some()
        {
            return Err(EngineError::AlreadyJoined);
        }

        let participant = ChallengeParticipant::new(&challenge, user_id, self.ctx.clock.now());
        self.ctx.store.save_participant(&participant).await?;
        self.invalidate(challenge_id).await;
        info!(challenge_id = %challenge_id, user_id, "Joined challenge");
        Ok(participant)
    }

    // =============================================================================
    // HYPERCHARGE
    // =============================================================================

    /// Attaches (or replaces) a hypercharge on the challenge.
    pub async fn apply_hypercharge(
        &self,
        challenge_id: Uuid,
        multiplier_percent: u32,
        duration: &str,
    ) -> EngineResult<Challenge> {
        let now = self.ctx.clock.now();
        let charge = hypercharge::build(multiplier_percent, duration, now)?;

        let _guard = self.ctx.locks.lock(&challenge_key(&challenge_id)).await;
        let mut challenge = self.get_challenge(challenge_id).await?;
        if challenge.status.is_terminal() {
            return Err(EngineError::ChallengeNotActive);
        }
        challenge.hypercharge = Some(charge);
        self.ctx.store.save_challenge(&challenge).await?;
        info!(
            challenge_id = %challenge_id,
            multiplier_percent,
            duration,
            "Hypercharge applied"
        );
        Ok(challenge)
    }

    /// Pushes the challenge end forward by `duration`.
    pub async fn extend_challenge(&self, challenge_id: Uuid, duration: &str) -> EngineResult<Challenge> {
        let by = hypercharge::parse_duration(duration)?;
        let now = self.ctx.clock.now();

        let _guard = self.ctx.locks.lock(&challenge_key(&challenge_id)).await;
        let mut challenge = self.get_challenge(challenge_id).await?;
        if challenge.status.is_terminal() {
            return Err(EngineError::ChallengeNotActive);
        }
        let base = challenge.ends_at.filter(|end| *end > now).unwrap_or(now);
        challenge.ends_at = Some(base + by);
        self.ctx.store.save_challenge(&challenge).await?;
        info!(challenge_id = %challenge_id, ends_at = ?challenge.ends_at, "Challenge extended");
        Ok(challenge)
    }

    /// Hypercharge multiplier that applies to `user_id` right now.
    pub async fn hypercharge_for_user(&self, user_id: &str) -> EngineResult<Option<f64>> {
        let now = self.ctx.clock.now();
        let active = self
            .ctx
            .store
            .find_participations(user_id, &[ParticipantStatus::Active])
            .await?;
        for participant in active {
            if let Some(challenge) = self.ctx.store.get_challenge(participant.challenge_id).await? {
                if challenge.status == ChallengeStatus::Active {
                    return Ok(challenge.active_multiplier(now));
                }
            }
        }
        Ok(None)
    }

    // =============================================================================
    // PROGRESSION
    // =============================================================================

    /// Feeds one reconciled match into the user's active participation.
    /// Safe to call again for the same match: repeats are detected by match id.
    pub async fn record_match_result(
        &self,
        user_id: &str,
        match_id: Uuid,
        result: MatchResultKind,
    ) -> EngineResult<ProgressUpdate> {
        let participations = self
            .ctx
            .store
            .find_participations(user_id, &ParticipantStatus::ALL)
            .await?;
        if let Some(seen) = participations.iter().find(|p| p.has_recorded(&match_id)) {
            let _guard = self
                .ctx
                .locks
                .lock(&participant_key(&seen.challenge_id, user_id))
                .await;
            if let Some(mut p) = self.ctx.store.get_participant(seen.challenge_id, user_id).await? {
                // Finishes a payout an interrupted run left behind.
                self.pay_pending_award(&mut p).await?;
            }
            return Ok(ProgressUpdate::AlreadyRecorded);
        }
        let Some(candidate) = participations
            .into_iter()
            .filter(|p| p.status == ParticipantStatus::Active)
            .max_by_key(|p| p.joined_at)
        else {
            return Ok(ProgressUpdate::NotParticipating);
        };

        let challenge_id = candidate.challenge_id;
        let _guard = self
            .ctx
            .locks
            .lock(&participant_key(&challenge_id, user_id))
            .await;
        let Some(mut participant) = self.ctx.store.get_participant(challenge_id, user_id).await? else {
            return Ok(ProgressUpdate::NotParticipating);
        };
        if participant.has_recorded(&match_id) {
            self.pay_pending_award(&mut participant).await?;
            return Ok(ProgressUpdate::AlreadyRecorded);
        }
        if participant.status != ParticipantStatus::Active {
            return Ok(ProgressUpdate::NotParticipating);
        }

        let now = self.ctx.clock.now();
        let challenge = self.ctx.store.get_challenge(challenge_id).await?;
        let challenge = match challenge {
            Some(c) if c.status == ChallengeStatus::Active => c,
            _ => {
                let reason = "challenge is no longer active".to_string();
                participant.status = ParticipantStatus::Failed;
                participant.status_reason = Some(reason.clone());
                self.ctx.store.save_participant(&participant).await?;
                self.invalidate(challenge_id).await;
                warn!(challenge_id = %challenge_id, user_id, "Participant failed: challenge not active");
                return Ok(ProgressUpdate::Failed { reason });
            }
        };

        participant.matches.push(MatchEntry {
            match_id,
            result,
            recorded_at: now,
        });

        let update = match result {
            MatchResultKind::Tie => ProgressUpdate::Tied,
            MatchResultKind::Win => {
                participant.wins += 1;
                if participant.wins >= challenge.wins_required {
                    participant.wins = challenge.wins_required;
                    let event = self.complete(&mut participant, &challenge, now);
                    ProgressUpdate::Completed(event)
                } else {
                    ProgressUpdate::Won {
                        wins: participant.wins,
                        wins_required: challenge.wins_required,
                    }
                }
            }
            MatchResultKind::Loss => {
                participant.lives = participant.lives.saturating_sub(1);
                if participant.lives > 0 {
                    ProgressUpdate::Lost {
                        lives: participant.lives,
                    }
                } else {
                    match self.ctx.config.lives_exhausted_policy {
                        LivesExhaustedPolicy::ResetProgress => {
                            participant.wins = 0;
                            participant.lives = challenge.lives;
                            participant.attempts += 1;
                            ProgressUpdate::Reset {
                                attempts: participant.attempts,
                            }
                        }
                        LivesExhaustedPolicy::Fail => {
                            let reason = "ran out of lives".to_string();
                            participant.status = ParticipantStatus::Failed;
                            participant.status_reason = Some(reason.clone());
                            ProgressUpdate::Failed { reason }
                        }
                    }
                }
            }
        };

        self.ctx.store.save_participant(&participant).await?;
        self.invalidate(challenge_id).await;
        debug!(challenge_id = %challenge_id, user_id, match_id = %match_id, ?update, "Progress recorded");

        match &update {
            ProgressUpdate::Completed(event) => {
                self.pay_pending_award(&mut participant).await?;
                self.ctx.publish(EngineEvent::ChallengeCompleted(event.clone()));
                let embed = Embed::new(
                    "Challenge complete!",
                    format!("You finished '{}' and earned the {} badge.", challenge.name, event.badge),
                )
                .field("Bonus rep", event.bonus)
                .field("Lives left", participant.lives);
                self.ctx
                    .notifications
                    .user(user_id, Message::Embed(embed))
                    .await;
            }
            ProgressUpdate::Reset { attempts } => {
                self.ctx
                    .notifications
                    .user(
                        user_id,
                        Message::text(format!(
                            "Out of lives in '{}'. Progress reset, attempt #{} starts now.",
                            challenge.name, attempts
                        )),
                    )
                    .await;
            }
            ProgressUpdate::Failed { reason } => {
                self.ctx
                    .notifications
                    .user(
                        user_id,
                        Message::text(format!("Challenge '{}' failed: {}", challenge.name, reason)),
                    )
                    .await;
            }
            _ => {}
        }
        Ok(update)
    }

    fn complete(
        &self,
        participant: &mut ChallengeParticipant,
        challenge: &Challenge,
        now: DateTime<Utc>,
    ) -> ChallengeCompletedEvent {
        let mut bonus = completion_bonus(participant, now);
        if let Some(multiplier) = challenge.active_multiplier(now) {
            bonus = (bonus as f64 * (1.0 + multiplier)).round() as i64;
        }
        participant.status = ParticipantStatus::Completed;
        participant.completed_at = Some(now);
        participant.completion_bonus = Some(bonus);
        participant.pending_award = Some(bonus);
        info!(
            challenge_id = %challenge.id,
            user_id = %participant.user_id,
            bonus,
            "Challenge completed"
        );
        ChallengeCompletedEvent {
            challenge_id: challenge.id,
            user_id: participant.user_id.clone(),
            badge: challenge.reward_badge.clone(),
            bonus,
        }
    }

    /// Credits a saved-but-unpaid award. Callers hold the participant lock.
    /// The player record remembers the challenge id until `pending_award` is
    /// cleared, so a failed participant save never leads to a second payout.
    async fn pay_pending_award(&self, participant: &mut ChallengeParticipant) -> EngineResult<()> {
        let Some(amount) = participant.pending_award else {
            return Ok(());
        };
        let user_id = participant.user_id.clone();
        let award_key = participant.challenge_id;
        self.ctx.pay_award(&user_id, award_key, amount, "challenge award").await?;
        participant.pending_award = None;
        self.ctx.store.save_participant(participant).await?;
        self.ctx.forget_settled(&user_id, &award_key).await;
        Ok(())
    }

    /// Pays awards left unpaid by an interrupted run.
    pub async fn settle_pending_awards(&self) -> EngineResult<usize> {
        let mut paid = 0;
        let challenges = self
            .ctx
            .store
            .list_challenges(&[ChallengeStatus::Active, ChallengeStatus::Paused, ChallengeStatus::Archived])
            .await?;
        for challenge in challenges {
            for p in self.ctx.store.list_participants(challenge.id).await? {
                if p.pending_award.is_none() {
                    continue;
                }
                let _guard = self
                    .ctx
                    .locks
                    .lock(&participant_key(&challenge.id, &p.user_id))
                    .await;
                if let Some(mut fresh) = self.ctx.store.get_participant(challenge.id, &p.user_id).await? {
                    if fresh.pending_award.is_some() {
                        self.pay_pending_award(&mut fresh).await?;
                        paid += 1;
                    }
                }
            }
        }
        Ok(paid)
    }

    // =============================================================================
    // SCHEDULE
    // =============================================================================

    /// Starts due SCHEDULED challenges and archives expired ACTIVE ones.
    pub async fn run_schedule(&self) -> EngineResult<(usize, usize)> {
        let now = self.ctx.clock.now();
        let mut ended = 0;
        for challenge in self
            .ctx
            .store
            .list_challenges(&[ChallengeStatus::Active, ChallengeStatus::Paused])
            .await?
        {
            if challenge.ends_at.is_some_and(|end| end <= now) {
                self.end_challenge(challenge.id).await?;
                ended += 1;
            }
        }

        let mut due: Vec<Challenge> = self
            .ctx
            .store
            .list_challenges(&[ChallengeStatus::Scheduled])
            .await?
            .into_iter()
            .filter(|c| c.starts_at.is_some_and(|start| start <= now))
            .collect();
        due.sort_by_key(|c| c.starts_at);

        let mut started = 0;
        // Only the most recently due challenge stays active; earlier ones would be
        // archived straight away by the single-active rule anyway.
        if let Some(latest) = due.pop() {
            for stale in due {
                self.end_challenge(stale.id).await?;
            }
            if latest.ends_at.is_some_and(|end| end <= now) {
                self.end_challenge(latest.id).await?;
            } else {
                self.start_challenge(latest.id).await?;
                started += 1;
            }
        }
        Ok((started, ended))
    }

    // =============================================================================
    // QUERIES
    // =============================================================================

    pub async fn generate_leaderboard(&self, challenge_id: Uuid, page: usize) -> EngineResult<LeaderboardPage> {
        let page = page.max(1);
        let cache_key = format!("{}:{}", challenge_id, page);
        if let Some(cached) = self.leaderboards.get(&cache_key).await {
            return Ok(cached);
        }

        self.get_challenge(challenge_id).await?;
        let mut participants = self.ctx.store.list_participants(challenge_id).await?;
        participants.sort_by(|a, b| {
            let a_done = a.status == ParticipantStatus::Completed;
            let b_done = b.status == ParticipantStatus::Completed;
            b_done
                .cmp(&a_done)
                .then_with(|| a.completed_at.cmp(&b.completed_at))
                .then_with(|| b.wins.cmp(&a.wins))
                .then_with(|| b.lives.cmp(&a.lives))
                .then_with(|| a.attempts.cmp(&b.attempts))
                .then_with(|| a.joined_at.cmp(&b.joined_at))
                .then_with(|| a.user_id.cmp(&b.user_id))
        });

        let total = participants.len();
        let total_pages = total.div_ceil(LEADERBOARD_PAGE_SIZE).max(1);
        let offset = (page - 1) * LEADERBOARD_PAGE_SIZE;
        let entries = participants
            .into_iter()
            .enumerate()
            .skip(offset)
            .take(LEADERBOARD_PAGE_SIZE)
            .map(|(i, p)| LeaderboardEntry {
                rank: i + 1,
                user_id: p.user_id,
                wins: p.wins,
                lives: p.lives,
                attempts: p.attempts,
                status: p.status,
                completed_at: p.completed_at,
            })
            .collect();

        let board = LeaderboardPage {
            challenge_id,
            page,
            total_pages,
            total_participants: total,
            entries,
        };
        self.leaderboards.insert(cache_key, board.clone()).await;
        Ok(board)
    }

    pub async fn calculate_challenge_stats(&self, challenge_id: Uuid) -> EngineResult<ChallengeStats> {
        let cache_key = challenge_id.to_string();
        if let Some(cached) = self.stats.get(&cache_key).await {
            return Ok(cached);
        }

        self.get_challenge(challenge_id).await?;
        let participants = self.ctx.store.list_participants(challenge_id).await?;
        let count = |status: ParticipantStatus| participants.iter().filter(|p| p.status == status).count();

        let total = participants.len();
        let completed = count(ParticipantStatus::Completed);
        let (wins, attempts, matches) = participants.iter().fold((0u64, 0u64, 0usize), |acc, p| {
            (acc.0 + p.wins as u64, acc.1 + p.attempts as u64, acc.2 + p.matches.len())
        });
        let avg = |sum: u64| if total == 0 { 0.0 } else { sum as f64 / total as f64 };

        let stats = ChallengeStats {
            challenge_id,
            total_participants: total,
            active: count(ParticipantStatus::Active),
            paused: count(ParticipantStatus::Paused),
            completed,
            failed: count(ParticipantStatus::Failed),
            dnf: count(ParticipantStatus::Dnf),
            completion_rate: if total == 0 { 0.0 } else { completed as f64 / total as f64 },
            average_wins: avg(wins),
            average_attempts: avg(attempts),
            total_matches: matches,
        };
        self.stats.insert(cache_key, stats.clone()).await;
        Ok(stats)
    }

    async fn invalidate(&self, challenge_id: Uuid) {
        let prefix = challenge_id.to_string();
        self.leaderboards.invalidate_prefix(&prefix).await;
        self.stats.invalidate_prefix(&prefix).await;
    }

    pub async fn purge_caches(&self) -> usize {
        self.leaderboards.purge_expired().await + self.stats.purge_expired().await
    }
}

fn validate_transition(from: &ChallengeStatus, to: &ChallengeStatus) -> EngineResult<()> {
    if !from.can_transition_to(to) {
        return Err(EngineError::invalid_transition(from, to));
    }
    Ok(())
}
