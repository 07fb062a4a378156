//! Error types for the two-tier cache
//!
//! Provides unified error handling using thiserror.

use std::time::Duration;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Missing or malformed connection settings, fatal at construction
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The initial connectivity probe to the remote store failed
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    /// No loader is bound to the namespace
    #[error("Data loader not found for namespace: {0}")]
    LoaderNotFound(String),

    /// A loader is already bound to the namespace
    #[error("Data loader already registered for namespace: {0}")]
    LoaderAlreadyRegistered(String),

    /// The loader itself failed; its error is kept as-is
    #[error("Loader error: {0}")]
    Loader(anyhow::Error),

    /// Payload encode/decode failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote tier I/O failure other than an absent key
    #[error("Remote tier unavailable: {0}")]
    RemoteUnavailable(String),

    /// The distributed lock could not be taken before the deadline
    #[error("Lock acquisition timed out after {waited:?}: {key}")]
    LockAcquisitionTimeout { key: String, waited: Duration },

    /// A refresh was cancelled while waiting for its lock
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A refresh task panicked or was aborted
    #[error("Internal error: {0}")]
    Internal(String),
}

// == Backend Conversions ==
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::RemoteUnavailable(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        CacheError::RemoteUnavailable(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
