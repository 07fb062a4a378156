//! Level Cache demo
//!
//! Connects to Redis, serves the `dish` namespace through the cache and keeps
//! the invalidation worker running until interrupted.

use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use level_cache::models::{Dish, DishLoader};
use level_cache::{Cacheable, Config, LevelCache};

/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Connect to Redis and register the dish loader
/// 4. Start the invalidation worker and expiry sweep
/// 5. Read, refresh and read again
/// 6. Stop on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "level_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Level Cache demo");

    let config = Config::from_env();
    info!(
        redis = %config.redis_addr,
        db = config.redis_db,
        local_max_entries = config.local_max_entries,
        "Configuration loaded"
    );

    let cache = LevelCache::connect(config).await?;
    cache.register_loader(Dish::NAMESPACE, DishLoader)?;
    cache.start().await;

    let dish: Dish = cache.get("1").await?;
    info!(?dish, "first read");

    let version = cache
        .refresh(Dish::NAMESPACE, "1")
        .wait()
        .await
        .map_err(|e| anyhow::anyhow!("refresh failed: {e}"))?;
    info!(version, "refreshed dish 1");

    let dish: Dish = cache.get("1").await?;
    info!(?dish, "read after refresh");

    if let Err(e) = cache.get::<Dish>("3").await {
        warn!(error = %e, "dish 3 is not in the catalogue");
    }

    let stats = cache.stats().await;
    info!(
        local_hits = stats.local_hits,
        remote_hits = stats.remote_hits,
        loads = stats.loads,
        hit_rate = stats.hit_rate(),
        "cache stats"
    );

    shutdown_signal().await?;
    cache.stop().await;

    info!("Level Cache demo stopped");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, initiating shutdown...");
    }

    Ok(())
}
