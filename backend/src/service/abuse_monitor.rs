use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::models::*;
use crate::notify::{Embed, Message};
use crate::service::context::ServiceContext;
use crate::service::rate_limiter::RateLimiter;

/// Metrics above this many recorded matches are archived and restarted.
pub const ARCHIVE_MATCH_THRESHOLD: u32 = 100;
pub const PENALTY_COOLDOWN_HOURS: i64 = 24;
pub const CLEANUP_MARKER: &str = "abuse_cleanup";

fn metric_key(user_id: &str) -> String {
    format!("abuse:{}", user_id)
}

/// Hour bucket used to guard the hourly cleanup.
pub fn cleanup_slot(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H").to_string()
}

/// Which counters a reconciled match bumps for one player. A mismatch sets
/// exactly one of the two flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionFlags {
    pub disputed: bool,
    pub score_mismatch: bool,
}

/// Report produced by one cleanup run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub windows_dropped: usize,
    pub metrics_archived: usize,
}

/// Sliding-window rate limits plus dispute/leave/report ratio tracking.
pub struct AbuseMonitor {
    ctx: ServiceContext,
    limiter: Arc<dyn RateLimiter>,
}

impl AbuseMonitor {
    pub fn new(ctx: ServiceContext, limiter: Arc<dyn RateLimiter>) -> Self {
        Self { ctx, limiter }
    }

    /// Fails with `RateLimited` when `user_id` has exhausted the action's window.
    pub async fn check_rate(&self, user_id: &str, action: RateLimitAction) -> EngineResult<()> {
        let now = self.ctx.clock.now();
        if let Err(e) = self.limiter.hit(user_id, action, now).await {
            debug!(user_id, action = action.as_str(), error = %e, "Action refused");
            return Err(e);
        }
        Ok(())
    }

    /// Counts one reconciled match for `user_id` and evaluates thresholds.
    pub async fn record_resolution(&self, user_id: &str, flags: ResolutionFlags) -> EngineResult<Vec<AbuseFinding>> {
        self.update_and_evaluate(user_id, |m| {
            m.total_matches += 1;
            if flags.disputed {
                m.disputes += 1;
            }
            if flags.score_mismatch {
                m.score_mismatches += 1;
            }
        })
        .await
    }

    /// Counts an abandoned match (report timeout) against `user_id`.
    pub async fn record_leave(&self, user_id: &str) -> EngineResult<Vec<AbuseFinding>> {
        self.update_and_evaluate(user_id, |m| m.leaves += 1).await
    }

    /// A player report filed by `reporter_id` against `target_id`.
    pub async fn record_player_report(&self, reporter_id: &str, target_id: &str) -> EngineResult<Vec<AbuseFinding>> {
        if reporter_id == target_id {
            return Err(EngineError::Validation(
                "players cannot report themselves".into(),
            ));
        }
        self.check_rate(reporter_id, RateLimitAction::Report).await?;
        info!(reporter_id, target_id, "Player reported");
        self.update_and_evaluate(target_id, |m| m.reports += 1).await
    }

    pub async fn get_metric(&self, user_id: &str) -> EngineResult<Option<AbuseMetric>> {
        self.ctx.store.get_abuse_metric(user_id).await
    }

    async fn update_and_evaluate<F>(&self, user_id: &str, update: F) -> EngineResult<Vec<AbuseFinding>>
    where
        F: FnOnce(&mut AbuseMetric),
    {
        let now = self.ctx.clock.now();
        let (findings, penalties) = {
            let _guard = self.ctx.locks.lock(&metric_key(user_id)).await;
            let mut metric = self
                .ctx
                .store
                .get_abuse_metric(user_id)
                .await?
                .unwrap_or_else(|| AbuseMetric::new(user_id, now));
            update(&mut metric);
            metric.updated_at = now;

            let findings = self.evaluate(&mut metric, now);
            self.ctx.store.save_abuse_metric(&metric).await?;
            let penalties: Vec<AbuseFinding> = findings
                .iter()
                .filter(|f| f.action == AbuseAction::Penalized)
                .cloned()
                .collect();
            (findings, penalties)
        };

        // Rep changes take the user lock; the metric lock is already released.
        for finding in &penalties {
            let amount = finding.penalty.unwrap_or_default();
            self.ctx
                .adjust_rep(user_id, -amount, finding.violation.label())
                .await?;
            self.ctx
                .notifications
                .user(
                    user_id,
                    Message::text(format!(
                        "You lost {} rep: your rate of {} ({:.0}%) is well above the allowed level.",
                        amount,
                        finding.violation.label(),
                        finding.ratio * 100.0
                    )),
                )
                .await;
        }

        for finding in &findings {
            let embed = Embed::new(
                "Abuse threshold exceeded",
                format!("<@{}> exceeded the {} threshold", user_id, finding.violation.label()),
            )
            .field("Ratio", format!("{:.2}", finding.ratio))
            .field(
                "Action",
                match finding.penalty {
                    Some(p) => format!("penalized {} rep", p),
                    None => "flagged for review".to_string(),
                },
            );
            self.ctx
                .notifications
                .channel(&self.ctx.config.moderation_channel_id, Message::Embed(embed))
                .await;
        }
        Ok(findings)
    }

    /// Applies thresholds to an updated metric. Marks penalty timestamps on
    /// the metric; the caller persists it and pays the penalties.
    fn evaluate(&self, metric: &mut AbuseMetric, now: DateTime<Utc>) -> Vec<AbuseFinding> {
        let threshold = self.ctx.config.abuse_ratio_threshold;
        if metric.total_matches < self.ctx.config.abuse_min_matches {
            return Vec::new();
        }

        let mut findings = Vec::new();
        for violation in ViolationType::ALL {
            let ratio = metric.ratio(violation);
            if ratio <= threshold {
                continue;
            }

            let cooled_down = metric
                .last_penalized
                .get(&violation)
                .map_or(true, |at| now - *at >= Duration::hours(PENALTY_COOLDOWN_HOURS));

            if ratio > threshold * 2.0 && cooled_down {
                let penalty = violation.penalty();
                metric.last_penalized.insert(violation, now);
                warn!(
                    user_id = %metric.user_id,
                    violation = violation.label(),
                    ratio,
                    penalty,
                    "Automatic penalty applied"
                );
                findings.push(AbuseFinding {
                    user_id: metric.user_id.clone(),
                    violation,
                    ratio,
                    action: AbuseAction::Penalized,
                    penalty: Some(penalty),
                });
            } else {
                info!(
                    user_id = %metric.user_id,
                    violation = violation.label(),
                    ratio,
                    "User flagged for moderation"
                );
                findings.push(AbuseFinding {
                    user_id: metric.user_id.clone(),
                    violation,
                    ratio,
                    action: AbuseAction::Flagged,
                    penalty: None,
                });
            }
        }
        findings
    }

    /// Hourly maintenance. Runs at most once per hour slot across restarts
    /// and instances; returns `None` when another run already claimed the slot.
    pub async fn run_cleanup(&self) -> EngineResult<Option<CleanupReport>> {
        let now = self.ctx.clock.now();
        let slot = cleanup_slot(now);
        if !self.ctx.store.claim_marker(CLEANUP_MARKER, &slot).await? {
            debug!(slot = %slot, "Abuse cleanup already ran");
            return Ok(None);
        }

        let windows_dropped = self.limiter.cleanup(now).await?;

        let mut metrics_archived = 0;
        for metric in self.ctx.store.list_abuse_metrics().await? {
            if metric.total_matches <= ARCHIVE_MATCH_THRESHOLD {
                continue;
            }
            let _guard = self.ctx.locks.lock(&metric_key(&metric.user_id)).await;
            let Some(current) = self.ctx.store.get_abuse_metric(&metric.user_id).await? else {
                continue;
            };
            if current.total_matches <= ARCHIVE_MATCH_THRESHOLD {
                continue;
            }
            self.ctx
                .store
                .archive_abuse_metric(&ArchivedAbuseMetric {
                    metric: current.clone(),
                    archived_at: now,
                })
                .await?;

            let mut fresh = AbuseMetric::new(&current.user_id, now);
            // Cooldowns outlive the archive so a reset cannot re-trigger a penalty.
            fresh.last_penalized = current.last_penalized;
            self.ctx.store.save_abuse_metric(&fresh).await?;
            metrics_archived += 1;
        }

        let report = CleanupReport {
            windows_dropped,
            metrics_archived,
        };
        info!(
            slot = %slot,
            windows_dropped,
            metrics_archived,
            "Abuse cleanup finished"
        );
        Ok(Some(report))
    }
}
