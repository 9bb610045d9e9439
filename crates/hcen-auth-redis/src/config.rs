//! Redis connection settings for the three store pools.

use std::time::Duration;

use hcen_auth::StorePool;
use serde::{Deserialize, Serialize};

/// Connection settings for one logical database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Redis logical database index.
    pub database: u8,
    /// Maximum open connections.
    pub pool_size: usize,
    /// Wait/create/recycle timeout for pooled connections.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl PoolConfig {
    fn with_database(database: u8) -> Self {
        Self {
            database,
            ..Self::default()
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            database: 0,
            pool_size: default_pool_size(),
            timeout: default_timeout(),
        }
    }
}

fn default_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_session() -> PoolConfig {
    PoolConfig::with_database(0)
}

fn default_cache() -> PoolConfig {
    PoolConfig::with_database(1)
}

fn default_state() -> PoolConfig {
    PoolConfig::with_database(2)
}

/// Settings for the Session, Cache and State pools.
///
/// All pools share one server URL and differ by logical database:
/// Session on db 0, Cache on db 1, State on db 2 unless overridden.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisPoolsConfig {
    /// Server URL without a database path, e.g. `redis://redis:6379`.
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_session")]
    pub session: PoolConfig,
    #[serde(default = "default_cache")]
    pub cache: PoolConfig,
    #[serde(default = "default_state")]
    pub state: PoolConfig,
}

impl Default for RedisPoolsConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            session: default_session(),
            cache: default_cache(),
            state: default_state(),
        }
    }
}

impl RedisPoolsConfig {
    /// Settings for `pool`.
    #[must_use]
    pub fn pool(&self, pool: StorePool) -> &PoolConfig {
        match pool {
            StorePool::Session => &self.session,
            StorePool::Cache => &self.cache,
            StorePool::State => &self.state,
        }
    }
}
