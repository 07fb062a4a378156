//! Local Entry Module
//!
//! A serialized payload held by the local tier together with its deadline.

use std::time::Duration;

use tokio::time::Instant;

// == Local Entry ==
/// A serialized value held in the local tier.
#[derive(Debug, Clone)]
pub struct LocalEntry {
    /// Serialized payload, byte-for-byte what the remote tier holds or held
    pub payload: String,
    /// When the entry stops being served
    pub expires_at: Instant,
}

impl LocalEntry {
    /// Creates an entry that expires `ttl` from now.
    pub fn new(payload: String, ttl: Duration) -> Self {
        Self {
            payload,
            expires_at: Instant::now() + ttl,
        }
    }

    // == Is Expired ==
    /// An entry is expired once the current time reaches its deadline.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}
