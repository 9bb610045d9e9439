//! Key-value store adapter.
//!
//! The broker keeps all cross-request state in three logically separate
//! key-value pools:
//!
//! - **Session** - server-side sessions (`session:{id}`)
//! - **Cache** - downstream profile and policy artifacts
//!   (`user:profile:{ci}`, `policy:cache:{ci}:{specialty}:{docType}`)
//! - **State** - OAuth state records and rate-limit counters
//!   (`oauth:state:{token}`, `ratelimit:{ip}:{endpoint}`)
//!
//! Each pool is an explicitly constructed [`KeyValueStore`] handle passed to
//! the components that need it. Implementations:
//!
//! - [`MemoryStore`] - single-process store for tests and development
//! - `RedisStore` (in `hcen-auth-redis`) - one Redis logical database per pool
//!
//! # Atomicity
//!
//! [`KeyValueStore::take`] and [`KeyValueStore::increment`] must each be a
//! single atomic store operation. State consumption and rate limiting rely on
//! them for correctness under concurrent requests.

pub mod keys;
pub mod memory;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::AuthError;

pub use memory::MemoryStore;

/// Errors raised by store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached (pool exhausted, connection refused).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected or failed a command.
    #[error("Store command failed: {0}")]
    Command(String),

    /// A stored value could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Create an `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Create a `Command` error.
    #[must_use]
    pub fn command(message: impl Into<String>) -> Self {
        Self::Command(message.into())
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::storage(err.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Uniform get/set/delete/expire interface over one pool.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the value at `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Stores `value` at `key` with the given TTL, replacing any previous value.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Replaces the value at `key` and resets its TTL only if the key exists.
    ///
    /// Returns `false` when the key was absent; nothing is written in that case.
    async fn set_if_exists(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Deletes `key`. Returns `true` if a live value was removed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Atomically reads and deletes `key`.
    ///
    /// Among concurrent callers for the same key at most one observes the value.
    async fn take(&self, key: &str) -> StoreResult<Option<String>>;

    /// Resets the TTL of an existing key. Returns `false` if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Atomically increments the counter at `key` and returns the new count.
    ///
    /// When the key is absent a new counter starts at 1 with TTL `window`;
    /// increments of an existing counter leave its TTL untouched.
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<u64>;

    /// Checks that the backend is reachable.
    async fn ping(&self) -> StoreResult<()>;
}

/// Logical pool a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorePool {
    /// Server-side sessions.
    Session,
    /// Downstream profile/policy cache.
    Cache,
    /// OAuth state and rate-limit counters.
    State,
}

impl StorePool {
    /// All pools, in a stable order.
    pub const ALL: [StorePool; 3] = [Self::Session, Self::Cache, Self::State];

    /// Pool name used in logs and health output.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Cache => "cache",
            Self::State => "state",
        }
    }
}

impl fmt::Display for StorePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three pool handles the broker is constructed with.
#[derive(Clone)]
pub struct StoreHandles {
    /// Session pool.
    pub session: Arc<dyn KeyValueStore>,
    /// Cache pool.
    pub cache: Arc<dyn KeyValueStore>,
    /// State pool.
    pub state: Arc<dyn KeyValueStore>,
}

impl StoreHandles {
    /// Creates handles from three explicit stores.
    #[must_use]
    pub fn new(
        session: Arc<dyn KeyValueStore>,
        cache: Arc<dyn KeyValueStore>,
        state: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            session,
            cache,
            state,
        }
    }

    /// Creates three independent in-memory stores.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
        )
    }

    /// Like [`StoreHandles::in_memory`], with a background task per store
    /// purging expired entries every `every`.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn in_memory_with_purge(every: Duration) -> Self {
        let stores = [
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
        ];
        for store in &stores {
            store.spawn_purger(every);
        }
        let [session, cache, state] = stores;
        Self::new(session, cache, state)
    }

    /// Returns the handle for `pool`.
    #[must_use]
    pub fn pool(&self, pool: StorePool) -> &Arc<dyn KeyValueStore> {
        match pool {
            StorePool::Session => &self.session,
            StorePool::Cache => &self.cache,
            StorePool::State => &self.state,
        }
    }
}

/// Reads and deserializes a JSON value.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> StoreResult<Option<T>> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Serializes and stores a JSON value with a TTL.
pub async fn set_json<T: Serialize + Sync>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> StoreResult<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw, ttl).await
}

/// Atomically takes and deserializes a JSON value.
pub async fn take_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> StoreResult<Option<T>> {
    match store.take(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}
