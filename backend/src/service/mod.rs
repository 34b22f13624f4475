// Service layer for the outcome engine
pub mod abuse_monitor;
pub mod challenge_service;
pub mod club_league_service;
pub mod context;
pub mod engine;
pub mod hypercharge;
pub mod jobs;
pub mod rate_limiter;
pub mod rating;
pub mod reconciler_service;

#[cfg(test)]
mod challenge_service_test;
#[cfg(test)]
pub(crate) mod test_support;

pub use abuse_monitor::AbuseMonitor;
pub use challenge_service::ChallengeService;
pub use club_league_service::ClubLeagueService;
pub use context::{EngineEvent, ServiceContext};
pub use engine::{Engine, EngineDeps};
pub use rate_limiter::{MemoryRateLimiter, RateLimiter, RedisRateLimiter};
pub use reconciler_service::ReconcilerService;
