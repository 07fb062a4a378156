//! Local Tier
//!
//! Process-local storage of serialized entries with TTL expiration and LRU eviction.

mod entry;
mod lru;
mod stats;
mod store;


// Re-export public types
pub use entry::LocalEntry;
pub use lru::LruTracker;
pub use stats::CacheStats;
pub(crate) use stats::StatsRecorder;
pub use store::LocalStore;
