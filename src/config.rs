//! Configuration Module
//!
//! Handles loading and validating cache configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CacheError, Result};

// == Defaults ==
pub const DEFAULT_REDIS_POOL_SIZE: usize = 10;
pub const DEFAULT_LOCAL_EXPIRATION: Duration = Duration::from_secs(300);
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_LOCAL_MAX_ENTRIES: usize = 10_000;
pub const DEFAULT_REMOTE_EXPIRATION: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_LOCK_LEASE: Duration = Duration::from_secs(10);
pub const DEFAULT_LOCK_RETRY_INITIAL: Duration = Duration::from_millis(50);
pub const DEFAULT_LOCK_RETRY_MAX: Duration = Duration::from_secs(1);
pub const DEFAULT_LOCK_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Cache configuration parameters.
///
/// Zero values are treated as unset and replaced by the defaults in
/// [`Config::with_defaults`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Remote store address, `host:port` or a full `redis://` URL
    pub redis_addr: String,
    /// Redis logical database
    pub redis_db: i64,
    /// Redis password, if any
    pub redis_password: Option<String>,
    /// Maximum pooled connections to the remote store
    pub redis_pool_size: usize,
    /// TTL of local tier entries
    pub local_expiration: Duration,
    /// Interval of the local tier expiry sweep
    pub cleanup_interval: Duration,
    /// Local tier capacity before LRU eviction kicks in
    pub local_max_entries: usize,
    /// TTL of values written to the remote tier
    pub remote_expiration: Duration,
    /// Lease of the per-entity refresh lock
    pub lock_lease: Duration,
    /// First backoff step while the refresh lock is contended
    pub lock_retry_initial: Duration,
    /// Upper bound of a single backoff step
    pub lock_retry_max: Duration,
    /// Overall deadline for taking the refresh lock
    pub lock_wait_timeout: Duration,
    /// Capacity of the invalidation notification queue
    pub queue_capacity: usize,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `REDIS_ADDR` - Remote store address (required by `LevelCache::connect`)
    /// - `REDIS_DB` - Redis database index (default: 0)
    /// - `REDIS_PASSWORD` - Redis password (default: none)
    /// - `REDIS_POOL_SIZE` - Connection pool size (default: 10)
    /// - `LOCAL_EXPIRATION_SECS` - Local entry TTL (default: 300)
    /// - `CLEANUP_INTERVAL_SECS` - Local expiry sweep interval (default: 60)
    /// - `LOCAL_MAX_ENTRIES` - Local tier capacity (default: 10000)
    /// - `REMOTE_EXPIRATION_SECS` - Remote value TTL (default: 86400)
    /// - `LOCK_LEASE_MS` - Refresh lock lease (default: 10000)
    /// - `LOCK_RETRY_INITIAL_MS` - First lock retry delay (default: 50)
    /// - `LOCK_RETRY_MAX_MS` - Largest lock retry delay (default: 1000)
    /// - `LOCK_WAIT_TIMEOUT_MS` - Lock acquisition deadline (default: 30000)
    /// - `QUEUE_CAPACITY` - Invalidation queue capacity (default: 1000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_addr: env::var("REDIS_ADDR").unwrap_or_default(),
            redis_db: env_or("REDIS_DB", defaults.redis_db),
            redis_password: env::var("REDIS_PASSWORD").ok().filter(|p| !p.is_empty()),
            redis_pool_size: env_or("REDIS_POOL_SIZE", defaults.redis_pool_size),
            local_expiration: secs_or("LOCAL_EXPIRATION_SECS", defaults.local_expiration),
            cleanup_interval: secs_or("CLEANUP_INTERVAL_SECS", defaults.cleanup_interval),
            local_max_entries: env_or("LOCAL_MAX_ENTRIES", defaults.local_max_entries),
            remote_expiration: secs_or("REMOTE_EXPIRATION_SECS", defaults.remote_expiration),
            lock_lease: millis_or("LOCK_LEASE_MS", defaults.lock_lease),
            lock_retry_initial: millis_or("LOCK_RETRY_INITIAL_MS", defaults.lock_retry_initial),
            lock_retry_max: millis_or("LOCK_RETRY_MAX_MS", defaults.lock_retry_max),
            lock_wait_timeout: millis_or("LOCK_WAIT_TIMEOUT_MS", defaults.lock_wait_timeout),
            queue_capacity: env_or("QUEUE_CAPACITY", defaults.queue_capacity),
        }
    }

    /// Replaces every zero value with its documented default.
    pub fn with_defaults(mut self) -> Self {
        fill(&mut self.redis_pool_size, DEFAULT_REDIS_POOL_SIZE);
        fill_duration(&mut self.local_expiration, DEFAULT_LOCAL_EXPIRATION);
        fill_duration(&mut self.cleanup_interval, DEFAULT_CLEANUP_INTERVAL);
        fill(&mut self.local_max_entries, DEFAULT_LOCAL_MAX_ENTRIES);
        fill_duration(&mut self.remote_expiration, DEFAULT_REMOTE_EXPIRATION);
        fill_duration(&mut self.lock_lease, DEFAULT_LOCK_LEASE);
        fill_duration(&mut self.lock_retry_initial, DEFAULT_LOCK_RETRY_INITIAL);
        fill_duration(&mut self.lock_retry_max, DEFAULT_LOCK_RETRY_MAX);
        fill_duration(&mut self.lock_wait_timeout, DEFAULT_LOCK_WAIT_TIMEOUT);
        fill(&mut self.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        if self.lock_retry_max < self.lock_retry_initial {
            self.lock_retry_max = self.lock_retry_initial;
        }
        self
    }

    /// Checks that the connection settings needed by the Redis backend exist.
    pub fn validate(&self) -> Result<()> {
        if self.redis_addr.trim().is_empty() {
            return Err(CacheError::ConfigInvalid(
                "redis_addr is required".to_string(),
            ));
        }
        if self.redis_db < 0 {
            return Err(CacheError::ConfigInvalid(format!(
                "redis_db must not be negative, got {}",
                self.redis_db
            )));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_addr: String::new(),
            redis_db: 0,
            redis_password: None,
            redis_pool_size: DEFAULT_REDIS_POOL_SIZE,
            local_expiration: DEFAULT_LOCAL_EXPIRATION,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            local_max_entries: DEFAULT_LOCAL_MAX_ENTRIES,
            remote_expiration: DEFAULT_REMOTE_EXPIRATION,
            lock_lease: DEFAULT_LOCK_LEASE,
            lock_retry_initial: DEFAULT_LOCK_RETRY_INITIAL,
            lock_retry_max: DEFAULT_LOCK_RETRY_MAX,
            lock_wait_timeout: DEFAULT_LOCK_WAIT_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

// == Env Helpers ==
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn secs_or(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn millis_or(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn fill(value: &mut usize, default: usize) {
    if *value == 0 {
        *value = default;
    }
}

fn fill_duration(value: &mut Duration, default: Duration) {
    if value.is_zero() {
        *value = default;
    }
}
