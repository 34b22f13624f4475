//! Cancellable one-shot timers and periodic background jobs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::EngineResult;

/// One pending timer per match. Scheduling again replaces the old timer.
#[derive(Default)]
pub struct TimeoutRegistry {
    handles: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl TimeoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<F>(&self, match_id: Uuid, delay: Duration, on_fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire.await;
        });

        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        handles.retain(|_, h| !h.is_finished());
        if let Some(previous) = handles.insert(match_id, handle) {
            previous.abort();
        }
        debug!(match_id = %match_id, delay_secs = delay.as_secs(), "Report timeout armed");
    }

    /// Aborts the timer for `match_id`. Returns whether one was pending.
    pub fn cancel(&self, match_id: &Uuid) -> bool {
        let removed = self
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(match_id);
        match removed {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                if pending {
                    debug!(match_id = %match_id, "Report timeout cancelled");
                }
                pending
            }
            None => false,
        }
    }

    /// Drops bookkeeping for a timer that already fired, without aborting it.
    pub fn forget(&self, match_id: &Uuid) {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(match_id);
    }

    pub fn pending(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|h| !h.is_finished())
            .count()
    }
}

impl Drop for TimeoutRegistry {
    fn drop(&mut self) {
        if let Ok(handles) = self.handles.get_mut() {
            for (_, handle) in handles.drain() {
                handle.abort();
            }
        }
    }
}

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self) -> EngineResult<()>;
}

/// Runs `job` every `period` until `shutdown` flips to `true` or its sender
/// is dropped. The first run happens immediately.
pub fn spawn_periodic(job: Arc<dyn Job>, period: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(job = job.name(), period_secs = period.as_secs(), "Background job started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = job.run().await {
                        warn!(job = job.name(), error = %e, "Background job failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(job = job.name(), "Background job stopped");
    })
}
