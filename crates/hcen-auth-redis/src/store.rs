//! [`KeyValueStore`] over a pooled Redis logical database.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use hcen_auth::store::{StoreResult, keys};
use hcen_auth::{KeyValueStore, StoreError, StorePool};
use redis::{AsyncCommands, RedisError, Script};

/// INCR, starting the window on the first hit. Runs atomically server-side.
const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

/// One store pool backed by one Redis database.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    kind: StorePool,
    increment: Script,
}

impl RedisStore {
    /// Wraps a connection pool that is already bound to the pool's database.
    #[must_use]
    pub fn new(pool: Pool, kind: StorePool) -> Self {
        Self {
            pool,
            kind,
            increment: Script::new(INCREMENT_SCRIPT),
        }
    }

    /// The logical pool this store serves.
    #[must_use]
    pub fn kind(&self) -> StorePool {
        self.kind
    }

    async fn connection(&self, key: &str) -> StoreResult<Connection> {
        match keys::pool_for(key) {
            Some(expected) if expected != self.kind => {
                tracing::warn!(
                    key = %key,
                    pool = %self.kind,
                    expected = %expected,
                    "Key used on unexpected store pool"
                );
            }
            _ => {}
        }

        self.pool.get().await.map_err(|e| {
            tracing::warn!(pool = %self.kind, error = %e, "Failed to get Redis connection");
            StoreError::unavailable(e.to_string())
        })
    }
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("kind", &self.kind)
            .field("status", &self.pool.status())
            .finish()
    }
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn map_error(err: RedisError) -> StoreError {
    if err.is_io_error() || err.is_connection_refusal() || err.is_timeout() {
        StoreError::unavailable(err.to_string())
    } else {
        StoreError::command(err.to_string())
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.connection(key).await?;
        let value: Option<String> = conn.get(key).await.map_err(map_error)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.connection(key).await?;
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn set_if_exists(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.connection(key).await?;
        // SET XX replies nil when the key is absent.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis(ttl))
            .arg("XX")
            .query_async(&mut conn)
            .await
            .map_err(map_error)?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.connection(key).await?;
        let removed: u64 = conn.del(key).await.map_err(map_error)?;
        Ok(removed > 0)
    }

    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.connection(key).await?;
        let value: Option<String> = redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_error)?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.connection(key).await?;
        let updated: u64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(map_error)?;
        Ok(updated == 1)
    }

    async fn increment(&self, key: &str, window: Duration) -> StoreResult<u64> {
        let mut conn = self.connection(key).await?;
        let count: u64 = self
            .increment
            .key(key)
            .arg(millis(window))
            .invoke_async(&mut conn)
            .await
            .map_err(map_error)?;
        Ok(count)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::unavailable(e.to_string()))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(map_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_clamps() {
        assert_eq!(millis(Duration::ZERO), 1);
        assert_eq!(millis(Duration::from_micros(10)), 1);
        assert_eq!(millis(Duration::from_secs(600)), 600_000);
    }

    #[test]
    fn test_map_error_kinds() {
        let io: RedisError =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused").into();
        assert!(matches!(map_error(io), StoreError::Unavailable(_)));

        let typed: RedisError = (redis::ErrorKind::TypeError, "wrong type").into();
        assert!(matches!(map_error(typed), StoreError::Command(_)));
    }
}
