//! Local Expiry Sweep
//!
//! Background task that periodically drops expired entries from the local
//! tier, so entities nobody reads again do not linger until evicted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::LocalStore;

/// Spawns the sweep. It runs every `interval` until `shutdown` fires.
///
/// # Example
/// ```ignore
/// let shutdown = CancellationToken::new();
/// let handle = spawn_cleanup_task(local.clone(), Duration::from_secs(60), shutdown.clone());
/// // Later, during shutdown:
/// shutdown.cancel();
/// handle.await?;
/// ```
pub fn spawn_cleanup_task(
    local: Arc<RwLock<LocalStore>>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            "starting local expiry sweep"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let removed = local.write().await.cleanup_expired();

            if removed > 0 {
                info!(removed, "expiry sweep removed local entries");
            } else {
                debug!("expiry sweep found nothing to remove");
            }
        }

        debug!("local expiry sweep stopped");
    })
}
