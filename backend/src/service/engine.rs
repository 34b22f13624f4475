use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::locks::KeyedLocks;
use crate::notify::{ModerationQueue, Notifications, Notifier, StoreModerationQueue};
use crate::scheduler::{spawn_periodic, Job};
use crate::service::abuse_monitor::AbuseMonitor;
use crate::service::challenge_service::ChallengeService;
use crate::service::club_league_service::ClubLeagueService;
use crate::service::context::{EngineEvent, ServiceContext};
use crate::service::jobs::{AbuseCleanupJob, ChallengeScheduleJob, SeasonResetJob, SettlementRepairJob};
use crate::service::rate_limiter::RateLimiter;
use crate::service::reconciler_service::ReconcilerService;
use crate::store::Store;

pub const SEASON_RESET_PERIOD: Duration = Duration::from_secs(60);
pub const ABUSE_CLEANUP_PERIOD: Duration = Duration::from_secs(3600);
pub const CHALLENGE_SCHEDULE_PERIOD: Duration = Duration::from_secs(60);
pub const SETTLEMENT_REPAIR_PERIOD: Duration = Duration::from_secs(300);

/// Collaborators the engine is built from.
pub struct EngineDeps {
    pub store: Arc<dyn Store>,
    pub notifier: Arc<dyn Notifier>,
    /// Defaults to persisting disputes and pinging the moderation channel.
    pub moderation: Option<Arc<dyn ModerationQueue>>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub clock: Arc<dyn Clock>,
    pub config: EngineConfig,
}

/// Wires every service over one shared context.
pub struct Engine {
    ctx: ServiceContext,
    pub reconciler: Arc<ReconcilerService>,
    pub challenges: Arc<ChallengeService>,
    pub league: Arc<ClubLeagueService>,
    pub abuse: Arc<AbuseMonitor>,
}

impl Engine {
    pub fn new(deps: EngineDeps) -> Self {
        let (events, _) = broadcast::channel(256);
        let notifications = Notifications::new(deps.notifier, deps.config.admin_channel_id.clone());
        let moderation = deps.moderation.unwrap_or_else(|| {
            Arc::new(StoreModerationQueue::new(
                deps.store.clone(),
                notifications.clone(),
                deps.config.moderation_channel_id.clone(),
            ))
        });

        let ctx = ServiceContext {
            store: deps.store,
            clock: deps.clock,
            locks: Arc::new(KeyedLocks::new()),
            notifications,
            config: Arc::new(deps.config),
            events,
        };

        let abuse = Arc::new(AbuseMonitor::new(ctx.clone(), deps.rate_limiter));
        let challenges = Arc::new(ChallengeService::new(ctx.clone(), abuse.clone()));
        let league = Arc::new(ClubLeagueService::new(ctx.clone()));
        let reconciler = Arc::new(ReconcilerService::new(
            ctx.clone(),
            moderation,
            challenges.clone(),
            league.clone(),
            abuse.clone(),
        ));

        Self {
            ctx,
            reconciler,
            challenges,
            league,
            abuse,
        }
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    /// Match results, completions and season resets as they happen.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.ctx.events.subscribe()
    }

    pub fn spawn_background_jobs(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let jobs: Vec<(Arc<dyn Job>, Duration)> = vec![
            (
                Arc::new(SeasonResetJob {
                    ctx: self.ctx.clone(),
                    league: self.league.clone(),
                }),
                SEASON_RESET_PERIOD,
            ),
            (
                Arc::new(AbuseCleanupJob {
                    ctx: self.ctx.clone(),
                    abuse: self.abuse.clone(),
                }),
                ABUSE_CLEANUP_PERIOD,
            ),
            (
                Arc::new(ChallengeScheduleJob {
                    ctx: self.ctx.clone(),
                    challenges: self.challenges.clone(),
                }),
                CHALLENGE_SCHEDULE_PERIOD,
            ),
            (
                Arc::new(SettlementRepairJob {
                    ctx: self.ctx.clone(),
                    reconciler: self.reconciler.clone(),
                }),
                SETTLEMENT_REPAIR_PERIOD,
            ),
        ];

        jobs.into_iter()
            .map(|(job, period)| spawn_periodic(job, period, shutdown.clone()))
            .collect()
    }
}
