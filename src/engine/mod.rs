//! Cache Façade
//!
//! `LevelCache` composes the local tier, the remote tier, the loader registry,
//! the version tracker, the invalidation worker and the refresh coordinator.
//!
//! # Read path
//! 1. Probe the remote version counter; on mismatch with the shadow version,
//!    queue an invalidation
//! 2. Local tier hit: return
//! 3. Remote tier hit: copy into the local tier and return
//! 4. Miss: call the namespace loader, write both tiers, seed the shadow at 0

mod entity_locks;
mod refresh;
mod single_flight;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheStats, LocalStore, StatsRecorder};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::keys::EntityKey;
use crate::loader::{Cacheable, DataLoader, LoaderRegistry};
use crate::remote::{LockService, RedisRemote, RemoteStore};
use crate::tasks::{spawn_cleanup_task, spawn_invalidation_worker};
use crate::version::{parse_version, PendingInvalidation, VersionTracker};

use self::entity_locks::EntityLocks;
use self::refresh::{LockRetry, RefreshCoordinator};
use self::single_flight::SingleFlight;

pub use self::refresh::{RefreshHandle, RefreshOutcome};

// == Tiers ==
/// State shared by the read path, the invalidation worker and refreshes.
pub(crate) struct Tiers {
    pub local: Arc<RwLock<LocalStore>>,
    pub remote: Arc<dyn RemoteStore>,
    pub versions: VersionTracker,
    pub entity_locks: EntityLocks,
    pub stats: StatsRecorder,
    pub remote_ttl: Duration,
}

impl Tiers {
    pub fn new(config: &Config, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            local: Arc::new(RwLock::new(LocalStore::new(
                config.local_max_entries,
                config.local_expiration,
            ))),
            remote,
            versions: VersionTracker::new(),
            entity_locks: EntityLocks::new(),
            stats: StatsRecorder::default(),
            remote_ttl: config.remote_expiration,
        }
    }
}

type UpdateQueue = mpsc::Receiver<PendingInvalidation>;

enum Lifecycle {
    /// Worker not running; the queue waits here.
    Idle(UpdateQueue),
    Running {
        shutdown: CancellationToken,
        worker: JoinHandle<UpdateQueue>,
        cleanup: JoinHandle<()>,
    },
    /// The worker died and took the queue with it.
    Closed,
}

struct Inner {
    config: Config,
    tiers: Arc<Tiers>,
    loaders: Arc<LoaderRegistry>,
    coordinator: Arc<RefreshCoordinator>,
    flights: SingleFlight<RefreshOutcome>,
    updates: mpsc::Sender<PendingInvalidation>,
    /// True while the worker consumes the queue; senders watch it to stop waiting
    running: watch::Sender<bool>,
    lifecycle: Mutex<Lifecycle>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Lifecycle::Running { shutdown, .. } = self.lifecycle.get_mut() {
            shutdown.cancel();
        }
    }
}

// == Level Cache ==
/// Two-tier read-through cache. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct LevelCache {
    inner: Arc<Inner>,
}

impl LevelCache {
    // == Constructors ==
    /// Connects to Redis as described by `config` and probes it.
    ///
    /// Fails with `ConfigInvalid` when connection settings are missing and
    /// with `ConnectionFailure` when Redis does not answer.
    pub async fn connect(config: Config) -> Result<Self> {
        let config = config.with_defaults();
        let redis = Arc::new(RedisRemote::from_config(&config)?);
        Self::with_backends(config, redis.clone(), redis).await
    }

    /// Builds a cache over the given remote store and lock service.
    pub async fn with_backends(
        config: Config,
        remote: Arc<dyn RemoteStore>,
        locker: Arc<dyn LockService>,
    ) -> Result<Self> {
        let config = config.with_defaults();
        remote
            .ping()
            .await
            .map_err(|e| CacheError::ConnectionFailure(e.to_string()))?;

        let tiers = Arc::new(Tiers::new(&config, remote));
        let loaders = Arc::new(LoaderRegistry::new());
        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&tiers),
            locker,
            Arc::clone(&loaders),
            LockRetry::from_config(&config),
        ));
        let (updates, queue) = mpsc::channel(config.queue_capacity);

        info!(
            local_max_entries = config.local_max_entries,
            local_expiration_secs = config.local_expiration.as_secs(),
            queue_capacity = config.queue_capacity,
            "level cache initialized"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                tiers,
                loaders,
                coordinator,
                flights: SingleFlight::new(),
                updates,
                running: watch::Sender::new(false),
                lifecycle: Mutex::new(Lifecycle::Idle(queue)),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    // == Loader Registration ==
    /// Binds a loader to a namespace.
    ///
    /// The namespace must be the one of the loader's value type, otherwise
    /// `ConfigInvalid` is returned.
    pub fn register_loader<L: DataLoader>(
        &self,
        namespace: impl Into<String>,
        loader: L,
    ) -> Result<()> {
        let namespace = namespace.into();
        if namespace != L::Value::NAMESPACE {
            return Err(CacheError::ConfigInvalid(format!(
                "loader for namespace {} registered under {}",
                L::Value::NAMESPACE,
                namespace
            )));
        }
        self.inner.loaders.register(namespace.clone(), loader)?;
        debug!(namespace = %namespace, "loader registered");
        Ok(())
    }

    // == Lifecycle ==
    /// Spawns the invalidation worker and the local expiry sweep.
    ///
    /// Calling `start` on a running cache does nothing.
    pub async fn start(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let queue = match std::mem::replace(&mut *lifecycle, Lifecycle::Closed) {
            Lifecycle::Idle(queue) => queue,
            Lifecycle::Running {
                shutdown,
                worker,
                cleanup,
            } => {
                warn!("level cache already started");
                *lifecycle = Lifecycle::Running {
                    shutdown,
                    worker,
                    cleanup,
                };
                return;
            }
            Lifecycle::Closed => {
                error!("level cache cannot start: invalidation queue was lost");
                return;
            }
        };

        let shutdown = CancellationToken::new();
        let worker = spawn_invalidation_worker(
            Arc::clone(&self.inner.tiers),
            queue,
            shutdown.clone(),
        );
        let cleanup = spawn_cleanup_task(
            Arc::clone(&self.inner.tiers.local),
            self.inner.config.cleanup_interval,
            shutdown.clone(),
        );
        self.inner.running.send_replace(true);
        *lifecycle = Lifecycle::Running {
            shutdown,
            worker,
            cleanup,
        };
        info!("level cache started");
    }

    /// Stops the background tasks. Queued invalidations are applied before the
    /// worker exits; the cache can be started again afterwards.
    pub async fn stop(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let (shutdown, worker, cleanup) =
            match std::mem::replace(&mut *lifecycle, Lifecycle::Closed) {
                Lifecycle::Running {
                    shutdown,
                    worker,
                    cleanup,
                } => (shutdown, worker, cleanup),
                other => {
                    *lifecycle = other;
                    debug!("level cache not running");
                    return;
                }
            };

        self.inner.running.send_replace(false);
        shutdown.cancel();

        match worker.await {
            Ok(queue) => *lifecycle = Lifecycle::Idle(queue),
            Err(e) => error!(error = %e, "invalidation worker failed"),
        }
        if let Err(e) = cleanup.await {
            warn!(error = %e, "cleanup task failed");
        }
        info!("level cache stopped");
    }

    pub fn is_running(&self) -> bool {
        *self.inner.running.borrow()
    }

    // == Get ==
    /// Reads the entity `key` of `T`'s namespace through both tiers, falling
    /// back to the namespace loader.
    pub async fn get<T: Cacheable>(&self, key: &str) -> Result<T> {
        let entity = EntityKey::new(T::NAMESPACE, key);
        let observed = self.check_version(&entity).await;
        let payload = self.read_through(&entity, observed).await?;
        Ok(serde_json::from_str(&payload)?)
    }

    /// Compares the shadow version with the remote counter and queues an
    /// invalidation on mismatch. Returns the counter it observed.
    ///
    /// Entities never loaded here are skipped, as are probe failures.
    async fn check_version(&self, entity: &EntityKey) -> Option<i64> {
        let tiers = &self.inner.tiers;
        tiers.versions.get(entity)?;

        let raw = match tiers.remote.get(&entity.version_key()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                debug!(entity = %entity, error = %e, "version probe failed");
                return None;
            }
        };
        let latest = parse_version(&raw)?;

        if let Some(pending) = tiers.versions.check(entity, latest) {
            self.enqueue(pending).await;
        }
        Some(latest)
    }

    /// Hands a notification to the worker.
    ///
    /// Blocks while the queue is full if the worker runs; otherwise the
    /// notification is dropped when there is no room. A wait in progress is
    /// abandoned as soon as the worker stops.
    async fn enqueue(&self, pending: PendingInvalidation) {
        let tiers = &self.inner.tiers;
        debug!(entity = %pending.entity, version = pending.version, "queueing invalidation");

        let mut running = self.inner.running.subscribe();
        let queued = if *running.borrow_and_update() {
            let entity = pending.entity.clone();
            tokio::select! {
                sent = self.inner.updates.send(pending) => sent.is_ok(),
                _ = running.wait_for(|running| !*running) => {
                    debug!(entity = %entity, "worker stopped while queue was full, dropping");
                    false
                }
            }
        } else {
            match self.inner.updates.try_send(pending) {
                Ok(()) => true,
                Err(TrySendError::Full(dropped)) | Err(TrySendError::Closed(dropped)) => {
                    debug!(entity = %dropped.entity, "invalidation queue unavailable, dropping");
                    false
                }
            }
        };

        if queued {
            tiers.stats.record_invalidation_queued();
        } else {
            tiers.stats.record_invalidation_dropped();
        }
    }

    async fn read_through(&self, entity: &EntityKey, observed: Option<i64>) -> Result<String> {
        let tiers = &self.inner.tiers;
        let value_key = entity.value_key();

        let cached = tiers.local.write().await.get(&value_key);
        if let Some(payload) = cached {
            tiers.stats.record_local_hit();
            debug!(entity = %entity, "local tier hit");
            return Ok(payload);
        }

        if let Some(payload) = tiers.remote.get(&value_key).await? {
            tiers.local.write().await.set(value_key, payload.clone());
            // the value was read after the counter, so it is at least that fresh
            if let Some(version) = observed {
                tiers.versions.adopt(entity, version);
            }
            tiers.stats.record_remote_hit();
            debug!(entity = %entity, "remote tier hit");
            return Ok(payload);
        }

        self.load_through(entity).await
    }

    /// Miss path: loader call, write-through and shadow seed as one unit with
    /// respect to refreshes and invalidations of the same entity.
    async fn load_through(&self, entity: &EntityKey) -> Result<String> {
        let tiers = &self.inner.tiers;
        let loader = self.inner.loaders.lookup(entity.namespace())?;
        let _guard = tiers.entity_locks.lock(entity).await;

        let value_key = entity.value_key();
        let cached = tiers.local.write().await.get(&value_key);
        if let Some(payload) = cached {
            tiers.stats.record_local_hit();
            return Ok(payload);
        }

        let payload = match loader.load_payload(entity.key()).await {
            Ok(payload) => payload,
            Err(e) => {
                tiers.stats.record_load_failure();
                return Err(e);
            }
        };

        tiers
            .remote
            .set(&value_key, &payload, tiers.remote_ttl)
            .await?;
        tiers.local.write().await.set(value_key, payload.clone());
        tiers.versions.seed(entity);
        tiers.stats.record_load();
        debug!(entity = %entity, "loaded from source");
        Ok(payload)
    }

    // == Refresh ==
    /// Reloads an entity in the background and bumps its version.
    ///
    /// Returns at once. Must be called from within a Tokio runtime.
    pub fn refresh(&self, namespace: &str, key: &str) -> RefreshHandle {
        self.refresh_with_cancel(namespace, key, CancellationToken::new())
    }

    /// Like [`refresh`](Self::refresh), aborting the lock wait when `cancel`
    /// fires. A call that joins a refresh already in flight shares that
    /// flight's token instead.
    pub fn refresh_with_cancel(
        &self,
        namespace: &str,
        key: &str,
        cancel: CancellationToken,
    ) -> RefreshHandle {
        let entity = EntityKey::new(namespace, key);
        let coordinator = Arc::clone(&self.inner.coordinator);

        let (flight, started) = self.inner.flights.join_or_start(&entity, cancel, |cancel| {
            let entity = entity.clone();
            let task = tokio::spawn(async move { coordinator.execute(entity, cancel).await });
            async move {
                task.await.unwrap_or_else(|e| {
                    Err(Arc::new(CacheError::Internal(format!("refresh task failed: {e}"))))
                })
            }
        });

        // the flight leaves the map only once polled to completion
        if started {
            tokio::spawn(flight.future.clone());
        } else {
            debug!(entity = %entity, "joining refresh in flight");
        }
        RefreshHandle::new(entity, flight, !started)
    }

    // == Introspection ==
    /// Shadow version of an entity, `None` if never loaded in this instance.
    pub fn applied_version(&self, namespace: &str, key: &str) -> Option<i64> {
        self.inner
            .tiers
            .versions
            .get(&EntityKey::new(namespace, key))
    }

    /// Snapshot of the cache counters.
    pub async fn stats(&self) -> CacheStats {
        let mut stats = self.inner.tiers.stats.snapshot();
        let local = self.inner.tiers.local.read().await;
        stats.local_entries = local.len();
        stats.evictions = local.evictions();
        stats.expirations = local.expirations();
        stats
    }
}
