//! Level Cache - A two-tier read-through cache
//!
//! Serves entities from a process-local tier backed by a shared Redis tier,
//! falling back to per-namespace loaders. Per-entity version counters in
//! Redis keep the local tiers of every instance coherent.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod keys;
pub mod loader;
pub mod models;
pub mod remote;
pub mod version;

mod tasks;

pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;

pub use cache::CacheStats;
pub use config::Config;
pub use engine::{LevelCache, RefreshHandle, RefreshOutcome};
pub use error::{CacheError, Result};
pub use keys::EntityKey;
pub use loader::{loader_fn, Cacheable, DataLoader, LoaderRegistry};
pub use remote::{LockService, MemoryRemote, RedisRemote, RemoteStore};
