use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::models::RateLimitAction;

/// Sliding-window limiter keyed by (user, action).
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Records one event, or fails with `RateLimited` if the window is full.
    async fn hit(&self, user_id: &str, action: RateLimitAction, now: DateTime<Utc>) -> EngineResult<()>;

    /// Drops windows with no events left inside them. Returns how many were dropped.
    async fn cleanup(&self, now: DateTime<Utc>) -> EngineResult<usize>;
}

fn window_of(action: RateLimitAction) -> (Duration, u32) {
    let (window, limit) = action.window();
    (
        Duration::from_std(window).unwrap_or_else(|_| Duration::seconds(60)),
        limit,
    )
}

#[derive(Debug, Default)]
pub struct MemoryRateLimiter {
    windows: Mutex<HashMap<(String, RateLimitAction), VecDeque<DateTime<Utc>>>>,
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn hit(&self, user_id: &str, action: RateLimitAction, now: DateTime<Utc>) -> EngineResult<()> {
        let (window, limit) = window_of(action);
        let mut windows = self.windows.lock().await;
        let events = windows
            .entry((user_id.to_string(), action))
            .or_insert_with(VecDeque::new);

        while events.front().is_some_and(|t| *t <= now - window) {
            events.pop_front();
        }

        if events.len() as u32 >= limit {
            let retry_after = events
                .front()
                .map(|oldest| (*oldest + window - now).num_seconds().max(1) as u64)
                .unwrap_or(1);
            debug!(user_id, action = action.as_str(), "Rate limit hit");
            return Err(EngineError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        events.push_back(now);
        Ok(())
    }

    async fn cleanup(&self, now: DateTime<Utc>) -> EngineResult<usize> {
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|(_, action), events| {
            let (window, _) = window_of(*action);
            events.back().is_some_and(|last| *last > now - window)
        });
        Ok(before - windows.len())
    }
}

/// Redis sorted-set window. Keys expire on their own, so cleanup is a no-op.
pub struct RedisRateLimiter {
    redis: ConnectionManager,
}

impl RedisRateLimiter {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self::new(manager))
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn hit(&self, user_id: &str, action: RateLimitAction, now: DateTime<Utc>) -> EngineResult<()> {
        let (window, limit) = window_of(action);
        let key = format!("ratelimit:{}:{}", action.as_str(), user_id);
        let now_ms = now.timestamp_millis();
        let cutoff = now_ms - window.num_milliseconds();
        let mut conn = self.redis.clone();

        let (count,): (u32,) = redis::pipe()
            .atomic()
            .zrembyscore(&key, 0, cutoff)
            .ignore()
            .zcard(&key)
            .query_async(&mut conn)
            .await?;

        if count >= limit {
            return Err(EngineError::RateLimited {
                retry_after_secs: window.num_seconds().max(1) as u64,
            });
        }

        let member = format!("{}:{}", now_ms, uuid::Uuid::new_v4());
        let _: () = redis::pipe()
            .atomic()
            .zadd(&key, member, now_ms)
            .ignore()
            .expire(&key, window.num_seconds())
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn cleanup(&self, _now: DateTime<Utc>) -> EngineResult<usize> {
        Ok(0)
    }
}
