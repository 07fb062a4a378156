//! Redis backend for the remote tier and the lock service.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Pool, Runtime};
use redis::AsyncCommands;
use tracing::info;

use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::remote::{LockService, RemoteStore};

/// Deletes the lock only if it still carries the caller's token.
const UNLOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

// == Redis Remote ==
/// Remote tier and lock service backed by a Redis connection pool.
#[derive(Clone)]
pub struct RedisRemote {
    pool: Pool,
}

impl RedisRemote {
    /// Builds the connection pool described by `config`.
    ///
    /// No connection is opened here; see [`RemoteStore::ping`].
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let url = connection_url(config);
        let mut redis_config = deadpool_redis::Config::from_url(url);
        redis_config.pool = Some(deadpool_redis::PoolConfig::new(config.redis_pool_size));

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::ConfigInvalid(format!("cannot build Redis pool: {e}")))?;

        info!(
            addr = %config.redis_addr,
            db = config.redis_db,
            pool_size = config.redis_pool_size,
            "Redis pool created"
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

/// Builds the Redis URL for `config`.
///
/// A `redis_addr` that already carries a scheme is used verbatim.
fn connection_url(config: &Config) -> String {
    if config.redis_addr.contains("://") {
        return config.redis_addr.clone();
    }
    match &config.redis_password {
        Some(password) => format!(
            "redis://:{}@{}/{}",
            password, config.redis_addr, config.redis_db
        ),
        None => format!("redis://{}/{}", config.redis_addr, config.redis_db),
    }
}

#[async_trait]
impl RemoteStore for RedisRemote {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.pool.get().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let ttl_secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.pool.get().await?;
        let version: i64 = conn.incr(key, 1).await?;
        Ok(version)
    }
}

#[async_trait]
impl LockService for RedisRemote {
    async fn try_lock(&self, key: &str, token: &str, lease: Duration) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let lease_ms = lease.as_millis().max(1) as u64;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(lease_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let removed: i64 = redis::Script::new(UNLOCK_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }
}
