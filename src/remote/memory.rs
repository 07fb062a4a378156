//! In-process backend for the remote tier and the lock service.
//!
//! Shared by every `LevelCache` holding the same `Arc`, which makes it a
//! stand-in for Redis when several instances live in one process.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::error::{CacheError, Result};
use crate::remote::{LockService, RemoteStore};

#[derive(Debug, Clone)]
struct Stored {
    value: String,
    expires_at: Option<Instant>,
}

impl Stored {
    fn new(value: &str, ttl: Option<Duration>) -> Self {
        Self {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self) -> bool {
        self.expires_at.map_or(true, |deadline| Instant::now() < deadline)
    }
}

// == Memory Remote ==
/// Remote tier kept in a concurrent map, with TTLs and lock leases.
///
/// Counts every call as a round trip and tracks reads per key. The offline
/// switch makes every call fail with `RemoteUnavailable`.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    entries: DashMap<String, Stored>,
    reads: DashMap<String, u64>,
    round_trips: AtomicU64,
    offline: AtomicBool,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an unreachable store.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Total calls made through the store and lock traits.
    pub fn round_trips(&self) -> u64 {
        self.round_trips.load(Ordering::SeqCst)
    }

    /// Number of `get` calls made for `key`.
    pub fn reads(&self, key: &str) -> u64 {
        self.reads.get(key).map_or(0, |count| *count)
    }

    /// Reads a live value without counting it as a round trip.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries
            .get(key)
            .filter(|stored| stored.is_live())
            .map(|stored| stored.value.clone())
    }

    fn round_trip(&self) -> Result<()> {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(CacheError::RemoteUnavailable(
                "memory remote is offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn ping(&self) -> Result<()> {
        self.round_trip()
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.round_trip()?;
        *self.reads.entry(key.to_string()).or_insert(0) += 1;
        Ok(self.peek(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.round_trip()?;
        self.entries.insert(key.to_string(), Stored::new(value, Some(ttl)));
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.round_trip()?;
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if occupied.get().is_live() => {
                let current: i64 = occupied.get().value.parse().map_err(|_| {
                    CacheError::RemoteUnavailable(format!("value at {key} is not an integer"))
                })?;
                let next = current + 1;
                occupied.get_mut().value = next.to_string();
                Ok(next)
            }
            Entry::Occupied(mut occupied) => {
                occupied.insert(Stored::new("1", None));
                Ok(1)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Stored::new("1", None));
                Ok(1)
            }
        }
    }
}

#[async_trait]
impl LockService for MemoryRemote {
    async fn try_lock(&self, key: &str, token: &str, lease: Duration) -> Result<bool> {
        self.round_trip()?;
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) if occupied.get().is_live() => Ok(false),
            Entry::Occupied(mut occupied) => {
                occupied.insert(Stored::new(token, Some(lease)));
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Stored::new(token, Some(lease)));
                Ok(true)
            }
        }
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<bool> {
        self.round_trip()?;
        let removed = self
            .entries
            .remove_if(key, |_, held| held.value == token && held.is_live());
        Ok(removed.is_some())
    }
}
