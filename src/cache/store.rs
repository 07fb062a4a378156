//! Local Store Module
//!
//! HashMap storage of serialized payloads with LRU tracking and TTL expiration.

use std::collections::HashMap;
use std::time::Duration;

use crate::cache::{LocalEntry, LruTracker};

// == Local Store ==
/// The local tier: serialized payloads keyed by the entity value key.
///
/// Absence is not an error here; callers fall through to the remote tier.
#[derive(Debug)]
pub struct LocalStore {
    /// Key to payload storage
    entries: HashMap<String, LocalEntry>,
    /// LRU access tracker
    lru: LruTracker,
    /// Maximum number of entries before eviction
    max_entries: usize,
    /// TTL applied by `set`
    default_ttl: Duration,
    /// Entries evicted by capacity pressure
    evictions: u64,
    /// Entries dropped after expiry
    expirations: u64,
}

impl LocalStore {
    // == Constructor ==
    /// Creates a LocalStore with the given capacity and entry TTL.
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            max_entries: max_entries.max(1),
            default_ttl,
            evictions: 0,
            expirations: 0,
        }
    }

    // == Set ==
    /// Stores a payload with the default TTL, overwriting any previous one.
    pub fn set(&mut self, key: String, payload: String) {
        let ttl = self.default_ttl;
        self.set_with_ttl(key, payload, ttl);
    }

    /// Stores a payload with an explicit TTL.
    ///
    /// When the store is full and the key is new, the least recently used
    /// entry is evicted first.
    pub fn set_with_ttl(&mut self, key: String, payload: String, ttl: Duration) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            if let Some(evicted) = self.lru.evict_oldest() {
                self.entries.remove(&evicted);
                self.evictions += 1;
            }
        }

        self.lru.touch(&key);
        self.entries.insert(key, LocalEntry::new(payload, ttl));
    }

    // == Get ==
    /// Returns the payload if present and not expired.
    ///
    /// An expired entry is removed on access.
    pub fn get(&mut self, key: &str) -> Option<String> {
        let expired = self.entries.get(key)?.is_expired();
        if expired {
            self.entries.remove(key);
            self.lru.remove(key);
            self.expirations += 1;
            return None;
        }

        self.lru.touch(key);
        self.entries.get(key).map(|entry| entry.payload.clone())
    }

    /// Reads a payload without touching LRU order or removing expired entries.
    pub fn peek(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.payload.as_str())
    }

    // == Cleanup Expired ==
    /// Removes all expired entries, returning how many were dropped.
    pub fn cleanup_expired(&mut self) -> usize {
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            self.entries.remove(key);
            self.lru.remove(key);
        }

        self.expirations += expired_keys.len() as u64;
        expired_keys.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn expirations(&self) -> u64 {
        self.expirations
    }
}
