//! Integration Tests for the Level Cache
//!
//! Drives whole instances over a shared in-memory remote tier: read-through,
//! refresh under the distributed lock and cross-instance invalidation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use level_cache::models::{Dish, DishLoader};
use level_cache::{
    loader_fn, CacheError, Cacheable, Config, DataLoader, LevelCache, LockService, MemoryRemote,
    RemoteStore,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

// == Helper Functions ==

/// Loader whose dishes carry the call count in `taste`, so each load is
/// distinguishable, and `label` in `comment`. Key "404" fails.
fn counting_loader(calls: Arc<AtomicUsize>, label: &'static str) -> impl DataLoader<Value = Dish> {
    loader_fn(move |key: String| {
        let calls = Arc::clone(&calls);
        async move {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(20)).await;
            if key == "404" {
                anyhow::bail!("dish [{key}] not found");
            }
            Ok::<_, anyhow::Error>(Dish {
                id: key.parse::<i64>()?,
                name: format!("dish-{key}"),
                taste: call as i32,
                price: 10.0,
                comment: label.to_string(),
            })
        }
    })
}

/// Loader whose first call waits for `gate`; later calls return at once.
/// Dishes carry the call count in `taste`.
fn gated_loader(calls: Arc<AtomicUsize>, gate: Arc<Notify>) -> impl DataLoader<Value = Dish> {
    loader_fn(move |key: String| {
        let calls = Arc::clone(&calls);
        let gate = Arc::clone(&gate);
        async move {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == 1 {
                gate.notified().await;
            }
            Ok::<_, anyhow::Error>(Dish {
                id: key.parse::<i64>()?,
                name: format!("dish-{key}"),
                taste: call as i32,
                price: 10.0,
                comment: "gated".to_string(),
            })
        }
    })
}

async fn create_cache(remote: &Arc<MemoryRemote>) -> LevelCache {
    LevelCache::with_backends(Config::default(), remote.clone(), remote.clone())
        .await
        .unwrap()
}

async fn create_counting_cache(
    remote: &Arc<MemoryRemote>,
    label: &'static str,
) -> (LevelCache, Arc<AtomicUsize>) {
    let cache = create_cache(remote).await;
    let calls = Arc::new(AtomicUsize::new(0));
    cache
        .register_loader(Dish::NAMESPACE, counting_loader(Arc::clone(&calls), label))
        .unwrap();
    (cache, calls)
}

async fn create_gated_cache(
    remote: &Arc<MemoryRemote>,
    gate: Arc<Notify>,
) -> (LevelCache, Arc<AtomicUsize>) {
    let cache = create_cache(remote).await;
    let calls = Arc::new(AtomicUsize::new(0));
    cache
        .register_loader(Dish::NAMESPACE, gated_loader(Arc::clone(&calls), gate))
        .unwrap();
    (cache, calls)
}

async fn wait_for_calls(calls: &AtomicUsize, expected: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while calls.load(Ordering::SeqCst) < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("loader was not called in time");
}

async fn wait_for_version(cache: &LevelCache, key: &str, version: i64) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while cache.applied_version(Dish::NAMESPACE, key) != Some(version) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("invalidation was not applied in time");
}

#[derive(Debug, Serialize, Deserialize)]
struct Menu {
    id: String,
}

impl Cacheable for Menu {
    const NAMESPACE: &'static str = "menu";

    fn key(&self) -> String {
        self.id.clone()
    }
}

// == Construction ==

#[tokio::test]
async fn test_offline_remote_fails_construction() {
    let remote = Arc::new(MemoryRemote::new());
    remote.set_offline(true);

    let result = LevelCache::with_backends(Config::default(), remote.clone(), remote).await;
    assert!(matches!(result, Err(CacheError::ConnectionFailure(_))));
}

#[tokio::test]
async fn test_duplicate_loader_registration() {
    let remote = Arc::new(MemoryRemote::new());
    let cache = create_cache(&remote).await;

    cache.register_loader("dish", DishLoader).unwrap();
    let result = cache.register_loader("dish", DishLoader);
    assert!(matches!(result, Err(CacheError::LoaderAlreadyRegistered(ns)) if ns == "dish"));
}

#[tokio::test]
async fn test_loader_registered_under_foreign_namespace() {
    let remote = Arc::new(MemoryRemote::new());
    let cache = create_cache(&remote).await;

    let result = cache.register_loader("menu", DishLoader);
    assert!(matches!(result, Err(CacheError::ConfigInvalid(_))));

    let err = cache.get::<Menu>("1").await.unwrap_err();
    assert!(matches!(err, CacheError::LoaderNotFound(_)));
    assert!(remote.peek("menu#$#1").is_none());
}

// == Read Path ==

#[tokio::test]
async fn test_miss_loads_and_writes_both_tiers() {
    let remote = Arc::new(MemoryRemote::new());
    let cache = create_cache(&remote).await;
    cache.register_loader("dish", DishLoader).unwrap();

    let dish: Dish = cache.get("1").await.unwrap();
    assert_eq!(dish.name, "GongBaoJiDing");
    assert_eq!(dish.price, 40.0);

    let stored: Dish = serde_json::from_str(&remote.peek("dish#$#1").unwrap()).unwrap();
    assert_eq!(stored, dish);
    // loading never touches the counter
    assert!(remote.peek("dish#$#1#$#version").is_none());
    assert_eq!(cache.applied_version("dish", "1"), Some(0));
}

#[tokio::test]
async fn test_local_hit_skips_remote_value_read() {
    let remote = Arc::new(MemoryRemote::new());
    let (cache, calls) = create_counting_cache(&remote, "a").await;

    let first: Dish = cache.get("1").await.unwrap();
    let second: Dish = cache.get("1").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(remote.reads("dish#$#1"), 1);

    let stats = cache.stats().await;
    assert_eq!(stats.loads, 1);
    assert_eq!(stats.local_hits, 1);
    assert_eq!(stats.local_entries, 1);
}

#[tokio::test]
async fn test_remote_hit_populates_local_tier() {
    let remote = Arc::new(MemoryRemote::new());
    let (a, a_calls) = create_counting_cache(&remote, "a").await;
    let (b, b_calls) = create_counting_cache(&remote, "b").await;

    let loaded: Dish = a.get("1").await.unwrap();
    let shared: Dish = b.get("1").await.unwrap();
    let again: Dish = b.get("1").await.unwrap();

    assert_eq!(loaded, shared);
    assert_eq!(shared, again);
    assert_eq!(a_calls.load(Ordering::SeqCst), 1);
    assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    assert_eq!(remote.reads("dish#$#1"), 2);
    // only a load seeds the shadow version
    assert_eq!(b.applied_version("dish", "1"), None);
    assert_eq!(b.stats().await.remote_hits, 1);
}

#[tokio::test]
async fn test_loader_error_leaves_tiers_untouched() {
    let remote = Arc::new(MemoryRemote::new());
    let (cache, _) = create_counting_cache(&remote, "a").await;

    let err = cache.get::<Dish>("404").await.unwrap_err();
    assert!(matches!(err, CacheError::Loader(_)));
    assert!(err.to_string().contains("dish [404] not found"));

    assert!(remote.peek("dish#$#404").is_none());
    assert_eq!(cache.applied_version("dish", "404"), None);
    assert_eq!(cache.stats().await.local_entries, 0);
}

#[tokio::test]
async fn test_unknown_namespace() {
    let remote = Arc::new(MemoryRemote::new());
    let cache = create_cache(&remote).await;

    let err = cache.get::<Menu>("lunch").await.unwrap_err();
    assert!(matches!(err, CacheError::LoaderNotFound(ns) if ns == "menu"));
}

#[tokio::test]
async fn test_undecodable_remote_value() {
    let remote = Arc::new(MemoryRemote::new());
    let cache = create_cache(&remote).await;
    cache.register_loader("dish", DishLoader).unwrap();
    remote
        .set("dish#$#1", "not json", Duration::from_secs(60))
        .await
        .unwrap();

    let err = cache.get::<Dish>("1").await.unwrap_err();
    assert!(matches!(err, CacheError::Serialization(_)));
}

#[tokio::test]
async fn test_remote_outage() {
    let remote = Arc::new(MemoryRemote::new());
    let (cache, _) = create_counting_cache(&remote, "a").await;
    let cached: Dish = cache.get("1").await.unwrap();

    remote.set_offline(true);

    // a failed version probe does not fail the read
    let still_cached: Dish = cache.get("1").await.unwrap();
    assert_eq!(cached, still_cached);

    let err = cache.get::<Dish>("2").await.unwrap_err();
    assert!(matches!(err, CacheError::RemoteUnavailable(_)));
}

// == Refresh ==

#[tokio::test]
async fn test_refresh_then_get_returns_latest() {
    let remote = Arc::new(MemoryRemote::new());
    let (cache, calls) = create_counting_cache(&remote, "a").await;

    let before: Dish = cache.get("1").await.unwrap();
    assert_eq!(before.taste, 1);

    let handle = cache.refresh("dish", "1");
    assert!(!handle.joined_existing());
    assert_eq!(handle.wait().await.unwrap(), 1);

    let after: Dish = cache.get("1").await.unwrap();
    assert_eq!(after.taste, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(remote.peek("dish#$#1#$#version").as_deref(), Some("1"));
    assert_eq!(cache.applied_version("dish", "1"), Some(1));
    assert!(remote.peek("lock#$#dish#$#1").is_none());
}

#[tokio::test]
async fn test_concurrent_refreshes_share_one_reload() {
    let remote = Arc::new(MemoryRemote::new());
    let (cache, calls) = create_counting_cache(&remote, "a").await;

    let first = cache.refresh("dish", "1");
    let second = cache.refresh("dish", "1");
    assert!(second.joined_existing());

    let (a, b) = tokio::join!(first.wait(), second.wait());
    assert_eq!(a.unwrap(), 1);
    assert_eq!(b.unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // sequential refreshes each bump the counter
    assert_eq!(cache.refresh("dish", "1").wait().await.unwrap(), 2);
    assert_eq!(remote.peek("dish#$#1#$#version").as_deref(), Some("2"));
    assert_eq!(cache.stats().await.refreshes, 2);
}

#[tokio::test]
async fn test_refresh_failure_reaches_handle() {
    let remote = Arc::new(MemoryRemote::new());
    let (cache, _) = create_counting_cache(&remote, "a").await;

    let err = cache.refresh("dish", "404").wait().await.unwrap_err();
    assert!(matches!(*err, CacheError::Loader(_)));
    assert!(remote.peek("dish#$#404#$#version").is_none());

    let err = cache.refresh("menu", "1").wait().await.unwrap_err();
    assert!(matches!(&*err, CacheError::LoaderNotFound(ns) if ns == "menu"));
    assert_eq!(cache.stats().await.refresh_failures, 2);
}

#[tokio::test]
async fn test_refresh_waits_for_other_instance_lock() {
    let remote = Arc::new(MemoryRemote::new());
    let config = Config {
        lock_retry_initial: Duration::from_millis(5),
        lock_retry_max: Duration::from_millis(20),
        lock_wait_timeout: Duration::from_millis(100),
        ..Config::default()
    };
    let cache = LevelCache::with_backends(config, remote.clone(), remote.clone())
        .await
        .unwrap();
    cache.register_loader("dish", DishLoader).unwrap();

    remote
        .try_lock("lock#$#dish#$#1", "other-instance", Duration::from_secs(60))
        .await
        .unwrap();

    let err = cache.refresh("dish", "1").wait().await.unwrap_err();
    assert!(matches!(*err, CacheError::LockAcquisitionTimeout { .. }));

    let cancelled = cache.refresh("dish", "1");
    cancelled.cancel();
    let err = cancelled.wait().await.unwrap_err();
    assert!(matches!(*err, CacheError::Cancelled(_)));
}

#[tokio::test]
async fn test_refresh_during_miss_load_keeps_refreshed_version() {
    let remote = Arc::new(MemoryRemote::new());
    let gate = Arc::new(Notify::new());
    let (cache, calls) = create_gated_cache(&remote, Arc::clone(&gate)).await;

    let loading = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get::<Dish>("1").await })
    };
    wait_for_calls(&calls, 1).await;

    // the refresh takes the distributed lock, then waits for the load to finish
    let refresh = cache.refresh("dish", "1");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    gate.notify_one();
    let loaded = loading.await.unwrap().unwrap();
    assert_eq!(loaded.taste, 1);
    assert_eq!(refresh.wait().await.unwrap(), 1);

    assert_eq!(cache.applied_version("dish", "1"), Some(1));
    let current: Dish = cache.get("1").await.unwrap();
    assert_eq!(current.taste, 2);
    assert_eq!(
        serde_json::to_string(&current).unwrap(),
        remote.peek("dish#$#1").unwrap()
    );
}

#[tokio::test]
async fn test_miss_during_refresh_reads_refreshed_value() {
    let remote = Arc::new(MemoryRemote::new());
    let gate = Arc::new(Notify::new());
    let (cache, calls) = create_gated_cache(&remote, Arc::clone(&gate)).await;

    let refresh = cache.refresh("dish", "1");
    wait_for_calls(&calls, 1).await;

    let reading = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get::<Dish>("1").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!reading.is_finished());

    gate.notify_one();
    assert_eq!(refresh.wait().await.unwrap(), 1);
    let dish = reading.await.unwrap().unwrap();

    // the waiting miss found the refreshed value instead of loading again
    assert_eq!(dish.taste, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.applied_version("dish", "1"), Some(1));
    assert_eq!(cache.stats().await.loads, 0);
}

// == Cross-instance Invalidation ==

#[tokio::test]
async fn test_refresh_in_one_instance_invalidates_another() {
    let remote = Arc::new(MemoryRemote::new());
    let (a, _) = create_counting_cache(&remote, "a").await;
    let (b, _) = create_counting_cache(&remote, "b").await;
    a.start().await;

    let original: Dish = a.get("1").await.unwrap();
    assert_eq!(original.comment, "a");

    assert_eq!(b.refresh("dish", "1").wait().await.unwrap(), 1);

    // this read notices the new version and queues the invalidation
    let _ = a.get::<Dish>("1").await.unwrap();
    wait_for_version(&a, "1", 1).await;

    let updated: Dish = a.get("1").await.unwrap();
    assert_eq!(updated.comment, "b");
    assert_eq!(
        serde_json::to_string(&updated).unwrap(),
        remote.peek("dish#$#1").unwrap()
    );

    let stats = a.stats().await;
    assert_eq!(stats.invalidations_queued, 1);
    assert_eq!(stats.invalidations_applied, 1);

    a.stop().await;
}

#[tokio::test]
async fn test_repeated_notifications_are_idempotent() {
    let remote = Arc::new(MemoryRemote::new());
    let (a, _) = create_counting_cache(&remote, "a").await;
    let (b, _) = create_counting_cache(&remote, "b").await;

    a.get::<Dish>("1").await.unwrap();
    b.refresh("dish", "1").wait().await.unwrap();

    // not started: both notifications wait in the queue
    a.get::<Dish>("1").await.unwrap();
    a.get::<Dish>("1").await.unwrap();
    assert_eq!(a.stats().await.invalidations_queued, 2);

    // stop applies everything still queued
    a.start().await;
    a.stop().await;

    assert_eq!(a.applied_version("dish", "1"), Some(1));
    let stats = a.stats().await;
    assert_eq!(stats.invalidations_applied, 2);
    assert_eq!(stats.local_entries, 1);

    let dish: Dish = a.get("1").await.unwrap();
    assert_eq!(
        serde_json::to_string(&dish).unwrap(),
        remote.peek("dish#$#1").unwrap()
    );
}

#[tokio::test]
async fn test_restart_keeps_queue() {
    let remote = Arc::new(MemoryRemote::new());
    let (a, _) = create_counting_cache(&remote, "a").await;
    let (b, _) = create_counting_cache(&remote, "b").await;

    a.start().await;
    a.stop().await;
    assert!(!a.is_running());

    a.get::<Dish>("1").await.unwrap();
    b.refresh("dish", "1").wait().await.unwrap();
    a.get::<Dish>("1").await.unwrap();

    a.start().await;
    assert!(a.is_running());
    wait_for_version(&a, "1", 1).await;
    a.stop().await;
}
