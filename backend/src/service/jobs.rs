use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::EngineResult;
use crate::scheduler::Job;
use crate::service::abuse_monitor::AbuseMonitor;
use crate::service::challenge_service::ChallengeService;
use crate::service::club_league_service::ClubLeagueService;
use crate::service::context::ServiceContext;
use crate::service::reconciler_service::ReconcilerService;

/// Runs a job body, paging the admin channel on critical failures.
async fn guarded<T, F>(ctx: &ServiceContext, name: &str, body: F) -> EngineResult<T>
where
    F: Future<Output = EngineResult<T>>,
{
    let result = body.await;
    if let Err(e) = &result {
        ctx.report_failure(name, e).await;
    }
    result
}

pub struct SeasonResetJob {
    pub ctx: ServiceContext,
    pub league: Arc<ClubLeagueService>,
}

#[async_trait]
impl Job for SeasonResetJob {
    fn name(&self) -> &'static str {
        "season_reset"
    }

    async fn run(&self) -> EngineResult<()> {
        if let Some(report) = guarded(&self.ctx, self.name(), self.league.run_season_reset()).await? {
            info!(season = %report.season_key, "Season reset job applied a reset");
        }
        Ok(())
    }
}

pub struct AbuseCleanupJob {
    pub ctx: ServiceContext,
    pub abuse: Arc<AbuseMonitor>,
}

#[async_trait]
impl Job for AbuseCleanupJob {
    fn name(&self) -> &'static str {
        "abuse_cleanup"
    }

    async fn run(&self) -> EngineResult<()> {
        guarded(&self.ctx, self.name(), self.abuse.run_cleanup()).await?;
        Ok(())
    }
}

pub struct ChallengeScheduleJob {
    pub ctx: ServiceContext,
    pub challenges: Arc<ChallengeService>,
}

#[async_trait]
impl Job for ChallengeScheduleJob {
    fn name(&self) -> &'static str {
        "challenge_schedule"
    }

    async fn run(&self) -> EngineResult<()> {
        let (started, ended) = guarded(&self.ctx, self.name(), self.challenges.run_schedule()).await?;
        let paid = guarded(&self.ctx, self.name(), self.challenges.settle_pending_awards()).await?;
        let purged = self.challenges.purge_caches().await;
        debug!(started, ended, paid, purged, "Challenge schedule tick");
        Ok(())
    }
}

pub struct SettlementRepairJob {
    pub ctx: ServiceContext,
    pub reconciler: Arc<ReconcilerService>,
}

#[async_trait]
impl Job for SettlementRepairJob {
    fn name(&self) -> &'static str {
        "settlement_repair"
    }

    async fn run(&self) -> EngineResult<()> {
        let repaired = guarded(&self.ctx, self.name(), self.reconciler.repair_pending_settlements()).await?;
        if repaired > 0 {
            info!(repaired, "Pending settlements repaired");
        }
        Ok(())
    }
}
