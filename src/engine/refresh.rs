//! Refresh Coordinator
//!
//! Reloads one entity from its loader under the distributed lock, writes both
//! tiers and bumps the remote version counter. This is the only path that
//! increments a version counter.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::engine::single_flight::Flight;
use crate::engine::Tiers;
use crate::error::{CacheError, Result};
use crate::keys::EntityKey;
use crate::loader::{LoaderRegistry, PayloadLoader};
use crate::remote::{LockService, RemoteStore};

/// Result of a refresh as seen by every caller sharing it: the new version
/// counter, or the error that ended the refresh.
pub type RefreshOutcome = std::result::Result<i64, Arc<CacheError>>;

// == Refresh Handle ==
/// Handle on a dispatched refresh.
///
/// The refresh runs on its own task: dropping the handle does not stop it.
pub struct RefreshHandle {
    entity: EntityKey,
    flight: Flight<RefreshOutcome>,
    joined: bool,
}

impl RefreshHandle {
    pub(crate) fn new(entity: EntityKey, flight: Flight<RefreshOutcome>, joined: bool) -> Self {
        Self {
            entity,
            flight,
            joined,
        }
    }

    pub fn entity(&self) -> &EntityKey {
        &self.entity
    }

    /// True when this call joined a refresh already in flight in this process.
    pub fn joined_existing(&self) -> bool {
        self.joined
    }

    /// Aborts the refresh if it is still waiting for the lock.
    ///
    /// Every caller sharing the flight observes the cancellation.
    pub fn cancel(&self) {
        self.flight.cancel.cancel();
    }

    /// Waits for the refresh to finish.
    pub async fn wait(self) -> RefreshOutcome {
        self.flight.future.await
    }
}

impl fmt::Debug for RefreshHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshHandle")
            .field("entity", &self.entity)
            .field("joined", &self.joined)
            .finish()
    }
}

// == Lock Retry Policy ==
/// Exponential backoff bounded by an overall deadline.
#[derive(Debug, Clone)]
pub(crate) struct LockRetry {
    pub lease: Duration,
    pub initial: Duration,
    pub max: Duration,
    pub timeout: Duration,
}

impl LockRetry {
    pub fn from_config(config: &Config) -> Self {
        Self {
            lease: config.lock_lease,
            initial: config.lock_retry_initial,
            max: config.lock_retry_max,
            timeout: config.lock_wait_timeout,
        }
    }
}

// == Refresh Coordinator ==
pub(crate) struct RefreshCoordinator {
    tiers: Arc<Tiers>,
    locker: Arc<dyn LockService>,
    loaders: Arc<LoaderRegistry>,
    retry: LockRetry,
}

impl RefreshCoordinator {
    pub fn new(
        tiers: Arc<Tiers>,
        locker: Arc<dyn LockService>,
        loaders: Arc<LoaderRegistry>,
        retry: LockRetry,
    ) -> Self {
        Self {
            tiers,
            locker,
            loaders,
            retry,
        }
    }

    /// Runs one refresh and logs its outcome; failures never reach the
    /// caller of `LevelCache::refresh` except through the handle.
    pub async fn execute(&self, entity: EntityKey, cancel: CancellationToken) -> RefreshOutcome {
        match self.run(&entity, &cancel).await {
            Ok(version) => {
                self.tiers.stats.record_refresh();
                info!(
                    namespace = entity.namespace(),
                    key = entity.key(),
                    version,
                    "refresh completed"
                );
                Ok(version)
            }
            Err(e) => {
                self.tiers.stats.record_refresh_failure();
                warn!(
                    namespace = entity.namespace(),
                    key = entity.key(),
                    error = %e,
                    "refresh failed"
                );
                Err(Arc::new(e))
            }
        }
    }

    async fn run(&self, entity: &EntityKey, cancel: &CancellationToken) -> Result<i64> {
        let loader = self.loaders.lookup(entity.namespace())?;
        let lock_key = entity.lock_key();
        let token = Uuid::new_v4().to_string();

        self.acquire(&lock_key, &token, cancel).await?;

        // on failure the lock is left to lapse with its lease
        let version = self.reload(entity, loader.as_ref()).await?;

        match self.locker.unlock(&lock_key, &token).await {
            Ok(true) => {}
            Ok(false) => warn!(lock = %lock_key, "refresh lock lapsed before release"),
            Err(e) => warn!(lock = %lock_key, error = %e, "failed to release refresh lock"),
        }
        Ok(version)
    }

    /// Takes the distributed lock, backing off exponentially until the
    /// deadline or cancellation.
    async fn acquire(&self, lock_key: &str, token: &str, cancel: &CancellationToken) -> Result<()> {
        let started = Instant::now();
        let deadline = started + self.retry.timeout;
        let mut delay = self.retry.initial;

        loop {
            match self.locker.try_lock(lock_key, token, self.retry.lease).await {
                Ok(true) => return Ok(()),
                Ok(false) => debug!(lock = %lock_key, "refresh lock contended"),
                Err(e) => warn!(lock = %lock_key, error = %e, "refresh lock attempt failed"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(CacheError::LockAcquisitionTimeout {
                    key: lock_key.to_string(),
                    waited: now - started,
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(CacheError::Cancelled(format!("refresh waiting for {lock_key}")));
                }
                _ = tokio::time::sleep(delay.min(deadline - now)) => {}
            }
            delay = (delay * 2).min(self.retry.max);
        }
    }

    /// Loads the entity and publishes it, holding the in-process entity lock
    /// so a concurrent miss-path load cannot interleave.
    async fn reload(&self, entity: &EntityKey, loader: &dyn PayloadLoader) -> Result<i64> {
        let _guard = self.tiers.entity_locks.lock(entity).await;

        let payload = loader.load_payload(entity.key()).await?;
        let value_key = entity.value_key();
        self.tiers
            .remote
            .set(&value_key, &payload, self.tiers.remote_ttl)
            .await?;
        self.tiers.local.write().await.set(value_key, payload);

        let version = self.tiers.remote.incr(&entity.version_key()).await?;
        self.tiers.versions.record(entity, version);
        Ok(version)
    }
}
