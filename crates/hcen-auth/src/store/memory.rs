//! In-memory key-value store.
//!
//! Single-process stand-in for a Redis pool, backed by `DashMap`. Every
//! operation holds the entry's shard lock for its whole read-modify-write, so
//! `take` and `increment` are atomic across tasks.
//!
//! Expiry uses `tokio::time::Instant`, which lets tests drive TTLs with a
//! paused clock (`tokio::time::advance`) instead of sleeping.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::{KeyValueStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Instant,
}

impl StoredValue {
    fn new(value: impl Into<String>, ttl: Duration) -> Self {
        Self {
            value: value.into(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// DashMap-backed [`KeyValueStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    /// Returns `true` if the store holds no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining TTL of a live key.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.entries
            .get(key)
            .filter(|e| !e.is_expired())
            .map(|e| e.expires_at.saturating_duration_since(Instant::now()))
    }

    /// Drops expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, v| !v.is_expired());
        before - self.entries.len()
    }

    /// Spawns a task that calls [`MemoryStore::purge_expired`] every `every`.
    ///
    /// The task holds a weak reference and exits once the store is dropped.
    /// Must be called from within a Tokio runtime.
    pub fn spawn_purger(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired in-memory entries");
                }
            }
        })
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self
            .entries
            .get(key)
            .filter(|e| !e.is_expired())
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.entries
            .insert(key.to_string(), StoredValue::new(value, ttl));
        Ok(())
    }

    async fn set_if_exists(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired() => {
                *entry = StoredValue::new(value, ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, v)| !v.is_expired()))
    }

    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self
            .entries
            .remove(key)
            .filter(|(_, v)| !v.is_expired())
            .map(|(_, v)| v.value))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired() => {
                entry.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment(&self, key: &str, window: Duration) -> StoreResult<u64> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(StoredValue::new("1", window));
                    return Ok(1);
                }
                let entry = occupied.get_mut();
                let count = entry
                    .value
                    .parse::<u64>()
                    .map_err(|_| StoreError::command(format!("value at '{key}' is not a counter")))?
                    + 1;
                entry.value = count.to_string();
                Ok(count)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new("1", window));
                Ok(1)
            }
        }
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
