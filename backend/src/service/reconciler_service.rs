use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::locks::{match_key, user_key};
use crate::models::*;
use crate::notify::{Embed, Message, ModerationQueue};
use crate::scheduler::TimeoutRegistry;
use crate::service::abuse_monitor::{AbuseMonitor, ResolutionFlags};
use crate::service::challenge_service::ChallengeService;
use crate::service::club_league_service::{ClubLeagueService, LeagueSide};
use crate::service::context::{EngineEvent, ServiceContext};
use crate::service::rating::{self, RatingInput};

/// Report store and reconciler: turns two self-reports into one result and
/// settles it into rating, challenge progression and the club ledger.
pub struct ReconcilerService {
    ctx: ServiceContext,
    moderation: Arc<dyn ModerationQueue>,
    challenges: Arc<ChallengeService>,
    league: Arc<ClubLeagueService>,
    abuse: Arc<AbuseMonitor>,
    timeouts: TimeoutRegistry,
}

impl ReconcilerService {
    pub fn new(
        ctx: ServiceContext,
        moderation: Arc<dyn ModerationQueue>,
        challenges: Arc<ChallengeService>,
        league: Arc<ClubLeagueService>,
        abuse: Arc<AbuseMonitor>,
    ) -> Self {
        Self {
            ctx,
            moderation,
            challenges,
            league,
            abuse,
            timeouts: TimeoutRegistry::new(),
        }
    }

    // =============================================================================
    // MATCH LIFECYCLE
    // =============================================================================

    /// Create a new match (PREGAME state)
    pub async fn create_match(&self, player_a: &str, player_b: &str) -> EngineResult<Match> {
        let (a, b) = (player_a.trim(), player_b.trim());
        if a.is_empty() || b.is_empty() {
            return Err(EngineError::Validation("both players are required".into()));
        }
        if a == b {
            return Err(EngineError::Validation("a player cannot face themselves".into()));
        }

        let m = Match::new(a, b, self.ctx.clock.now());
        self.ctx.store.insert_match(&m).await?;
        info!(match_id = %m.id, player_a = a, player_b = b, "Match created");
        Ok(m)
    }

    pub async fn get_match(&self, match_id: Uuid) -> EngineResult<Match> {
        self.ctx
            .store
            .get_match(match_id)
            .await?
            .ok_or(EngineError::MatchNotFound)
    }

    /// PREGAME -> IN_PROGRESS
    pub async fn start_match(&self, match_id: Uuid) -> EngineResult<Match> {
        let _guard = self.ctx.locks.lock(&match_key(&match_id)).await;
        let mut m = self.get_match(match_id).await?;
        validate_transition(&m.status, &MatchStatus::InProgress)?;
        let now = self.ctx.clock.now();
        m.status = MatchStatus::InProgress;
        m.started_at = Some(now);
        m.updated_at = now;
        self.ctx.store.save_match(&m).await?;
        info!(match_id = %match_id, "Match started");
        Ok(m)
    }

    /// Cancels an unreconciled match and its pending timeout.
    pub async fn cancel_match(&self, match_id: Uuid) -> EngineResult<Match> {
        let _guard = self.ctx.locks.lock(&match_key(&match_id)).await;
        let mut m = self.get_match(match_id).await?;
        if !m.status.accepts_reports() {
            return Err(EngineError::MatchClosed(m.status.to_string()));
        }
        validate_transition(&m.status, &MatchStatus::Cancelled)?;
        let now = self.ctx.clock.now();
        m.status = MatchStatus::Cancelled;
        m.report_deadline = None;
        m.updated_at = now;
        self.ctx.store.save_match(&m).await?;
        self.timeouts.cancel(&match_id);
        info!(match_id = %match_id, "Match cancelled");
        Ok(m)
    }

    // =============================================================================
    // REPORTS
    // =============================================================================

    /// Stores one player's self-report. Reconciles once both sides are in.
    pub async fn submit_report(
        self: &Arc<Self>,
        match_id: Uuid,
        user_id: &str,
        own_score: u32,
        opponent_score: u32,
    ) -> EngineResult<SubmitOutcome> {
        self.abuse.check_rate(user_id, RateLimitAction::Match).await?;

        match self.submit_report_inner(match_id, user_id, own_score, opponent_score).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if e.is_critical() {
                    self.ctx.report_failure("submit_report", &e).await;
                    self.ctx
                        .notifications
                        .user(
                            user_id,
                            Message::text(format!(
                                "Your report for match {} could not be processed. Staff have been notified; please try again shortly.",
                                match_id
                            )),
                        )
                        .await;
                }
                Err(e)
            }
        }
    }

    async fn submit_report_inner(
        self: &Arc<Self>,
        match_id: Uuid,
        user_id: &str,
        own_score: u32,
        opponent_score: u32,
    ) -> EngineResult<SubmitOutcome> {
        let _guard = self.ctx.locks.lock(&match_key(&match_id)).await;
        let mut m = self.get_match(match_id).await?;

        let side = m.side_of(user_id).ok_or(EngineError::NotParticipant)?;
        if m.players[side].report.is_some() {
            return Err(EngineError::AlreadyReported);
        }
        if !m.status.accepts_reports() {
            return Err(EngineError::MatchClosed(m.status.to_string()));
        }

        let now = self.ctx.clock.now();
        m.players[side].report = Some(ReportedScore {
            own_score,
            opponent_score,
            submitted_at: now,
        });
        m.updated_at = now;
        debug!(match_id = %match_id, user_id, own_score, opponent_score, "Report stored");

        if !m.both_reported() {
            let deadline = now + Duration::minutes(self.ctx.config.report_timeout_minutes);
            m.report_deadline = Some(deadline);
            self.ctx.store.save_match(&m).await?;
            self.arm_timeout(match_id, deadline);
            info!(match_id = %match_id, user_id, deadline = %deadline, "Waiting for opponent report");
            return Ok(SubmitOutcome::Waiting { match_id, deadline });
        }

        let event = self.reconcile_locked(&mut m).await?;
        Ok(SubmitOutcome::Resolved(event))
    }

    /// Re-runs reconciliation for a match. Already-reconciled matches return
    /// their cached outcome; a pending settlement is completed first.
    pub async fn reconcile(&self, match_id: Uuid) -> EngineResult<MatchResultEvent> {
        let _guard = self.ctx.locks.lock(&match_key(&match_id)).await;
        let mut m = self.get_match(match_id).await?;
        if !m.status.is_reconciled() && !m.both_reported() {
            return Err(EngineError::Validation("match is still waiting for reports".into()));
        }
        self.reconcile_locked(&mut m).await
    }

    /// Caller holds the match lock.
    async fn reconcile_locked(&self, m: &mut Match) -> EngineResult<MatchResultEvent> {
        if let Some(cached) = m.outcome.clone() {
            debug!(match_id = %m.id, outcome = ?cached.outcome, "Returning cached outcome");
            if cached.settlement == SettlementState::Pending {
                self.apply_settlement(m).await?;
            }
            return Ok(MatchResultEvent {
                match_id: m.id,
                outcome: cached.outcome,
                rep_deltas: cached.rep_deltas,
            });
        }

        let (a, b) = match (&m.players[0].report, &m.players[1].report) {
            (Some(a), Some(b)) => (a.clone(), b.clone()),
            _ => return Err(EngineError::Validation("both reports are required".into())),
        };

        if a.own_score == b.opponent_score && b.own_score == a.opponent_score {
            self.resolve_match(m, &a).await
        } else {
            self.resolve_mismatch(m).await
        }
    }

    async fn resolve_match(&self, m: &mut Match, a: &ReportedScore) -> EngineResult<MatchResultEvent> {
        validate_transition(&m.status, &MatchStatus::Completed)?;
        let now = self.ctx.clock.now();
        let [user_a, user_b] = m.player_ids();
        let scores = [(a.own_score, a.opponent_score), (a.opponent_score, a.own_score)];

        let mut rep_deltas = Vec::with_capacity(2);
        {
            let _guards = self
                .ctx
                .locks
                .lock_many(&[user_key(&user_a), user_key(&user_b)])
                .await;
            let players = [
                self.ctx.load_player(&user_a).await?,
                self.ctx.load_player(&user_b).await?,
            ];
            for side in 0..2 {
                let (score, opponent_score) = scores[side];
                let hypercharge = self.challenges.hypercharge_for_user(&players[side].user_id).await?;
                let breakdown = rating::compute_delta(&RatingInput {
                    rep: players[side].rep,
                    opponent_rep: players[1 - side].rep,
                    score,
                    opponent_score,
                    win_streak: players[side].win_streak,
                    hypercharge,
                });
                rep_deltas.push(RepDelta {
                    user_id: players[side].user_id.clone(),
                    score,
                    opponent_score,
                    delta: breakdown.delta,
                    rep_before: players[side].rep,
                    hypercharge_multiplier: hypercharge,
                });
            }
        }

        m.status = MatchStatus::Completed;
        m.completed_at = Some(now);
        m.report_deadline = None;
        m.updated_at = now;
        m.outcome = Some(ReconciledOutcome {
            outcome: Outcome::Match,
            rep_deltas: rep_deltas.clone(),
            reconciled_at: now,
            settlement: SettlementState::Pending,
        });
        self.ctx.store.save_match(m).await?;
        self.timeouts.cancel(&m.id);
        info!(
            match_id = %m.id,
            score = %format!("{}-{}", a.own_score, a.opponent_score),
            "Reports agree, match completed"
        );

        self.apply_settlement(m).await?;
        Ok(MatchResultEvent {
            match_id: m.id,
            outcome: Outcome::Match,
            rep_deltas,
        })
    }

    async fn resolve_mismatch(&self, m: &mut Match) -> EngineResult<MatchResultEvent> {
        validate_transition(&m.status, &MatchStatus::Disputed)?;
        let now = self.ctx.clock.now();
        let reports: HashMap<String, ReportedScore> = m
            .players
            .iter()
            .filter_map(|p| p.report.clone().map(|r| (p.user_id.clone(), r)))
            .collect();
        let dispute = DisputeRecord {
            // One dispute per match, so a retried enqueue overwrites instead of duplicating.
            id: m.id,
            match_id: m.id,
            reports,
            created_at: now,
            resolved: false,
        };
        self.moderation.enqueue(&dispute).await?;

        m.status = MatchStatus::Disputed;
        m.report_deadline = None;
        m.updated_at = now;
        m.outcome = Some(ReconciledOutcome {
            outcome: Outcome::Mismatch,
            rep_deltas: Vec::new(),
            reconciled_at: now,
            settlement: SettlementState::Applied,
        });
        self.ctx.store.save_match(m).await?;
        self.timeouts.cancel(&m.id);
        warn!(match_id = %m.id, "Reports disagree, match disputed");

        let event = MatchResultEvent {
            match_id: m.id,
            outcome: Outcome::Mismatch,
            rep_deltas: Vec::new(),
        };
        self.ctx.publish(EngineEvent::MatchResolved(event.clone()));

        for (side, player) in m.players.iter().enumerate() {
            let theirs = m.players[1 - side].report.as_ref();
            let mine = player.report.as_ref();
            let text = match (mine, theirs) {
                (Some(mine), Some(theirs)) => format!(
                    "Match {} is disputed: you reported {}-{}, your opponent reported {}-{}. A moderator will review it; no rep was changed.",
                    m.id, mine.own_score, mine.opponent_score, theirs.opponent_score, theirs.own_score
                ),
                _ => format!("Match {} is disputed and sent to moderation.", m.id),
            };
            self.ctx.notifications.user(&player.user_id, Message::text(text)).await;
        }

        let flags = mismatch_flags(m.players[0].report.as_ref(), m.players[1].report.as_ref());
        for user in m.player_ids() {
            if let Err(e) = self.abuse.record_resolution(&user, flags).await {
                warn!(user_id = %user, error = %e, "Abuse tracking failed");
            }
        }
        Ok(event)
    }

    // =============================================================================
    // SETTLEMENT
    // =============================================================================

    /// Second phase of a MATCH outcome. Every effect carries its own replay
    /// guard, so this runs safely any number of times; the match is marked
    /// APPLIED only once all effects went through.
    async fn apply_settlement(&self, m: &mut Match) -> EngineResult<()> {
        let Some(mut outcome) = m.outcome.clone() else {
            return Ok(());
        };
        if outcome.outcome != Outcome::Match || outcome.settlement == SettlementState::Applied {
            return Ok(());
        }

        // Rating
        {
            let keys: Vec<String> = outcome.rep_deltas.iter().map(|d| user_key(&d.user_id)).collect();
            let _guards = self.ctx.locks.lock_many(&keys).await;
            for d in &outcome.rep_deltas {
                let mut player = self.ctx.load_player(&d.user_id).await?;
                if player.rated_matches.contains(&m.id) {
                    continue;
                }
                rating::apply_result(&mut player, d.delta, d.is_win(), outcome.reconciled_at);
                player.rated_matches.push(m.id);
                self.ctx.store.save_player(&player).await?;
                info!(
                    match_id = %m.id,
                    user_id = %d.user_id,
                    delta = d.delta,
                    rep = player.rep,
                    streak = player.win_streak,
                    "Rep applied"
                );
            }
        }

        // Challenge progression and club ledger take their own locks.
        let mut progress = HashMap::new();
        for d in &outcome.rep_deltas {
            let kind = if d.is_win() {
                MatchResultKind::Win
            } else if d.is_tie() {
                MatchResultKind::Tie
            } else {
                MatchResultKind::Loss
            };
            let update = self.challenges.record_match_result(&d.user_id, m.id, kind).await?;
            progress.insert(d.user_id.clone(), update);
        }

        let sides: Vec<LeagueSide> = outcome
            .rep_deltas
            .iter()
            .map(|d| LeagueSide {
                user_id: d.user_id.clone(),
                score: d.score,
            })
            .collect();
        let league = match sides.as_slice() {
            [a, b] => Some(self.league.record_match(m.id, outcome.reconciled_at, a, b).await?),
            _ => None,
        };
        debug!(match_id = %m.id, ?league, "League ledger updated");

        outcome.settlement = SettlementState::Applied;
        m.outcome = Some(outcome.clone());
        m.updated_at = self.ctx.clock.now();
        self.ctx.store.save_match(m).await?;
        for d in &outcome.rep_deltas {
            self.ctx.forget_settled(&d.user_id, &m.id).await;
        }

        let event = MatchResultEvent {
            match_id: m.id,
            outcome: Outcome::Match,
            rep_deltas: outcome.rep_deltas.clone(),
        };
        self.ctx.publish(EngineEvent::MatchResolved(event));

        for d in &outcome.rep_deltas {
            self.ctx
                .notifications
                .user(&d.user_id, Message::Embed(result_embed(m.id, d, progress.get(&d.user_id), league.as_ref())))
                .await;
            if let Err(e) = self.abuse.record_resolution(&d.user_id, ResolutionFlags::default()).await {
                warn!(user_id = %d.user_id, error = %e, "Abuse tracking failed");
            }
        }
        Ok(())
    }

    /// Finishes settlements left PENDING by a crash or a failed store write.
    pub async fn repair_pending_settlements(&self) -> EngineResult<usize> {
        let mut repaired = 0;
        for candidate in self.ctx.store.list_matches(&[MatchStatus::Completed]).await? {
            if !candidate.settlement_pending() {
                continue;
            }
            let _guard = self.ctx.locks.lock(&match_key(&candidate.id)).await;
            let mut m = self.get_match(candidate.id).await?;
            if !m.settlement_pending() {
                continue;
            }
            warn!(match_id = %m.id, "Repairing pending settlement");
            match self.apply_settlement(&mut m).await {
                Ok(()) => repaired += 1,
                Err(e) => {
                    error!(match_id = %m.id, error = %e, "Settlement repair failed");
                    self.ctx.report_failure("repair_settlement", &e).await;
                }
            }
        }
        Ok(repaired)
    }

    // =============================================================================
    // TIMEOUTS
    // =============================================================================

    fn arm_timeout(self: &Arc<Self>, match_id: Uuid, deadline: DateTime<Utc>) {
        let delay = (deadline - self.ctx.clock.now()).to_std().unwrap_or_default();
        let weak = Arc::downgrade(self);
        self.timeouts.schedule(match_id, delay, async move {
            if let Some(svc) = weak.upgrade() {
                svc.timeouts.forget(&match_id);
                if let Err(e) = svc.handle_report_timeout(match_id).await {
                    error!(match_id = %match_id, error = %e, "Report timeout handling failed");
                    svc.ctx.report_failure("report_timeout", &e).await;
                }
            }
        });
    }

    /// Fired when only one side reported in time. Flags the match as
    /// abandoned-pending and nudges the missing reporter; it never resolves.
    pub async fn handle_report_timeout(&self, match_id: Uuid) -> EngineResult<bool> {
        let (reporter, missing) = {
            let _guard = self.ctx.locks.lock(&match_key(&match_id)).await;
            let mut m = self.get_match(match_id).await?;
            if !m.status.accepts_reports() || m.abandoned_pending {
                return Ok(false);
            }
            let Some(missing) = m.missing_reporter().map(|p| p.user_id.clone()) else {
                return Ok(false);
            };
            let reporter = m
                .players
                .iter()
                .find(|p| p.user_id != missing)
                .map(|p| p.user_id.clone())
                .unwrap_or_default();

            m.abandoned_pending = true;
            m.report_deadline = None;
            m.updated_at = self.ctx.clock.now();
            self.ctx.store.save_match(&m).await?;
            (reporter, missing)
        };

        warn!(match_id = %match_id, missing_reporter = %missing, "Report window expired");
        self.ctx
            .notifications
            .user(
                &missing,
                Message::text(format!(
                    "Your opponent reported match {} but you have not. Please submit your score so the result can be recorded.",
                    match_id
                )),
            )
            .await;
        self.ctx
            .notifications
            .user(
                &reporter,
                Message::text(format!(
                    "Your opponent has not reported match {} yet. It stays open until they do or a moderator steps in.",
                    match_id
                )),
            )
            .await;

        if let Err(e) = self.abuse.record_leave(&missing).await {
            warn!(user_id = %missing, error = %e, "Abuse tracking failed");
        }
        Ok(true)
    }

    /// Re-arms report timeouts after a restart. Returns how many were armed.
    pub async fn rearm_timeouts(self: &Arc<Self>) -> EngineResult<usize> {
        let mut armed = 0;
        let open = self
            .ctx
            .store
            .list_matches(&[MatchStatus::Pregame, MatchStatus::InProgress])
            .await?;
        for m in open {
            if m.abandoned_pending || m.missing_reporter().is_none() {
                continue;
            }
            if let Some(deadline) = m.report_deadline {
                self.arm_timeout(m.id, deadline);
                armed += 1;
            }
        }
        info!(armed, "Report timeouts re-armed");
        Ok(armed)
    }

    pub fn pending_timeouts(&self) -> usize {
        self.timeouts.pending()
    }
}

/// A disagreement is counted once: as a dispute when the two reports name
/// different winners, as a score mismatch when only the scoreline differs.
fn mismatch_flags(a: Option<&ReportedScore>, b: Option<&ReportedScore>) -> ResolutionFlags {
    let same_winner = match (a, b) {
        (Some(a), Some(b)) => a.own_score.cmp(&a.opponent_score) == b.opponent_score.cmp(&b.own_score),
        _ => false,
    };
    ResolutionFlags {
        disputed: !same_winner,
        score_mismatch: same_winner,
    }
}

fn validate_transition(from: &MatchStatus, to: &MatchStatus) -> EngineResult<()> {
    if !from.can_transition_to(to) {
        return Err(EngineError::invalid_transition(from, to));
    }
    Ok(())
}

fn result_embed(
    match_id: Uuid,
    delta: &RepDelta,
    progress: Option<&ProgressUpdate>,
    league: Option<&LeagueResult>,
) -> Embed {
    let verdict = if delta.is_win() {
        "Victory"
    } else if delta.is_tie() {
        "Draw"
    } else {
        "Defeat"
    };
    let mut embed = Embed::new(
        format!("{} ({}-{})", verdict, delta.score, delta.opponent_score),
        format!("Match {} has been recorded.", match_id),
    )
    .field("Rep change", format!("{:+}", delta.delta));
    if let Some(m) = delta.hypercharge_multiplier {
        embed = embed.field("Hypercharge", format!("+{:.0}%", m * 100.0));
    }
    match progress {
        Some(ProgressUpdate::Won { wins, wins_required }) => {
            embed = embed.field("Challenge", format!("{}/{} wins", wins, wins_required));
        }
        Some(ProgressUpdate::Lost { lives }) => {
            embed = embed.field("Challenge", format!("{} lives left", lives));
        }
        _ => {}
    }
    if let Some(LeagueResult::Credited { winner_gain, loser_loss, .. }) = league {
        let club_change = if delta.is_win() {
            format!("+{}", winner_gain)
        } else {
            format!("-{}", loser_loss)
        };
        embed = embed.field("Club league", club_change);
    }
    embed
}
