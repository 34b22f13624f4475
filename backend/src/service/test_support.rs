//! Shared fixtures for service unit tests.

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::clock::ManualClock;
use crate::config::EngineConfig;
use crate::locks::KeyedLocks;
use crate::notify::{Notifications, RecordingNotifier};
use crate::service::context::{EngineEvent, ServiceContext};
use crate::store::MemoryStore;

pub struct TestContext {
    pub ctx: ServiceContext,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub events: broadcast::Receiver<EngineEvent>,
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        admin_channel_id: "admin".into(),
        moderation_channel_id: "mods".into(),
        ..EngineConfig::default()
    }
}

/// Context over in-memory collaborators, clock parked at 2026-03-10 12:00 UTC.
pub fn test_context(config: EngineConfig) -> TestContext {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap(),
    ));
    let notifier = Arc::new(RecordingNotifier::new());
    let (tx, rx) = broadcast::channel(64);
    let ctx = ServiceContext {
        store: store.clone(),
        clock: clock.clone(),
        locks: Arc::new(KeyedLocks::new()),
        notifications: Notifications::new(notifier.clone(), config.admin_channel_id.clone()),
        config: Arc::new(config),
        events: tx,
    };
    TestContext {
        ctx,
        store,
        clock,
        notifier,
        events: rx,
    }
}
