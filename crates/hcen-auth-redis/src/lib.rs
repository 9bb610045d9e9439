//! Redis backend for the `hcen-auth` store pools.
//!
//! Each pool (Session, Cache, State) gets its own `deadpool-redis` pool bound
//! to its own logical database, so a flush or eviction policy on one never
//! touches the others.
//!
//! ```ignore
//! let stores = hcen_auth_redis::connect(&RedisPoolsConfig::default()).await?;
//! let broker = AuthBroker::new(config, stores, directory, audit)?;
//! ```

pub mod config;
pub mod store;

use std::sync::Arc;

use deadpool_redis::Runtime;
use hcen_auth::{KeyValueStore, StoreError, StoreHandles, StorePool};
use url::Url;

pub use config::{PoolConfig, RedisPoolsConfig};
pub use store::RedisStore;

/// Builds the connection URL for one logical database.
///
/// # Errors
///
/// Returns `StoreError::Unavailable` if `base` is not a valid URL.
pub fn database_url(base: &str, database: u8) -> Result<String, StoreError> {
    let mut url =
        Url::parse(base).map_err(|e| StoreError::unavailable(format!("invalid redis url: {e}")))?;
    url.set_path(&format!("/{database}"));
    Ok(url.to_string())
}

/// Creates the pool for one store pool.
///
/// Pool creation is lazy; no connection is opened until first use.
///
/// # Errors
///
/// Returns `StoreError::Unavailable` if the URL is invalid or the pool
/// cannot be built.
pub fn create_store(config: &RedisPoolsConfig, kind: StorePool) -> Result<RedisStore, StoreError> {
    let settings = config.pool(kind);
    let url = database_url(&config.url, settings.database)?;

    let mut redis_config = deadpool_redis::Config::from_url(url);
    let mut pool_config = deadpool_redis::PoolConfig::new(settings.pool_size);
    pool_config.timeouts.wait = Some(settings.timeout);
    pool_config.timeouts.create = Some(settings.timeout);
    pool_config.timeouts.recycle = Some(settings.timeout);
    redis_config.pool = Some(pool_config);

    let pool = redis_config
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| StoreError::unavailable(format!("failed to create {kind} pool: {e}")))?;

    tracing::info!(
        pool = %kind,
        database = settings.database,
        pool_size = settings.pool_size,
        "Redis store pool created"
    );

    Ok(RedisStore::new(pool, kind))
}

/// Creates all three pools and verifies each one answers `PING`.
///
/// # Errors
///
/// Returns the first pool creation or connectivity error.
pub async fn connect(config: &RedisPoolsConfig) -> Result<StoreHandles, StoreError> {
    let session = create_store(config, StorePool::Session)?;
    let cache = create_store(config, StorePool::Cache)?;
    let state = create_store(config, StorePool::State)?;

    for store in [&session, &cache, &state] {
        store.ping().await.inspect_err(|e| {
            tracing::error!(pool = %store.kind(), error = %e, "Redis pool is not reachable");
        })?;
    }

    Ok(StoreHandles::new(
        Arc::new(session),
        Arc::new(cache),
        Arc::new(state),
    ))
}
