//! Remote Tier
//!
//! The shared key-value store holding serialized values and version counters,
//! plus the lease-based lock service used to serialize refreshes.
//!
//! # Backends
//! - [`RedisRemote`]: Redis through a deadpool connection pool
//! - [`MemoryRemote`]: in-process stand-in for single-process use and tests

mod memory;
mod redis_backend;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use self::memory::MemoryRemote;
pub use self::redis_backend::RedisRemote;

// == Remote Store ==
/// Shared store for serialized values and version counters.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Connectivity probe used at construction.
    async fn ping(&self) -> Result<()>;

    /// Reads a value; an absent key is `Ok(None)`, not an error.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes a value with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Atomically increments a counter (created at 0), returning the new value.
    async fn incr(&self, key: &str) -> Result<i64>;
}

// == Lock Service ==
/// Lease-based mutual exclusion shared by every cache instance.
#[async_trait]
pub trait LockService: Send + Sync + 'static {
    /// Takes the lock if free. The lease bounds how long a crashed holder can
    /// keep it.
    async fn try_lock(&self, key: &str, token: &str, lease: Duration) -> Result<bool>;

    /// Releases the lock if `token` still holds it.
    async fn unlock(&self, key: &str, token: &str) -> Result<bool>;
}
