use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-key async mutexes.
///
/// Serializes work on a single match or user while leaving unrelated keys
/// free to proceed. Entries are held weakly and pruned once no guard or
/// waiter references them, so the map only grows with in-flight keys.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

pub type KeyGuard = OwnedMutexGuard<()>;

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut map = match self.inner.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = map.get(key).and_then(Weak::upgrade) {
            return existing;
        }
        map.retain(|_, weak| weak.strong_count() > 0);
        let fresh = Arc::new(AsyncMutex::new(()));
        map.insert(key.to_string(), Arc::downgrade(&fresh));
        fresh
    }

    pub async fn lock(&self, key: &str) -> KeyGuard {
        self.slot(key).lock_owned().await
    }

    /// Locks several keys in sorted order so two callers asking for the same
    /// pair can never deadlock.
    pub async fn lock_many(&self, keys: &[String]) -> Vec<KeyGuard> {
        let mut sorted: Vec<&String> = keys.iter().collect();
        sorted.sort();
        sorted.dedup();
        let mut guards = Vec::with_capacity(sorted.len());
        for key in sorted {
            guards.push(self.lock(key).await);
        }
        guards
    }

    pub fn tracked_keys(&self) -> usize {
        match self.inner.lock() {
            Ok(map) => map.values().filter(|w| w.strong_count() > 0).count(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

pub fn match_key(match_id: &uuid::Uuid) -> String {
    format!("match:{}", match_id)
}

pub fn user_key(user_id: &str) -> String {
    format!("user:{}", user_id)
}
