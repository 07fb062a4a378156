//! Invalidation Worker
//!
//! Drains the update queue and copies the current remote value of each
//! notified entity into the local tier.

use std::sync::Arc;

use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::Tiers;
use crate::version::PendingInvalidation;

/// Spawns the worker. On shutdown it applies whatever is still queued and
/// hands the receiver back so the cache can be started again.
pub(crate) fn spawn_invalidation_worker(
    tiers: Arc<Tiers>,
    mut queue: Receiver<PendingInvalidation>,
    shutdown: CancellationToken,
) -> JoinHandle<Receiver<PendingInvalidation>> {
    tokio::spawn(async move {
        info!("starting invalidation worker");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = queue.recv() => match next {
                    Some(pending) => apply_invalidation(&tiers, pending).await,
                    None => break,
                },
            }
        }

        let mut drained = 0usize;
        while let Ok(pending) = queue.try_recv() {
            apply_invalidation(&tiers, pending).await;
            drained += 1;
        }
        info!(drained, "invalidation worker stopped");
        queue
    })
}

/// Replaces the local copy with the remote one and sets the shadow to the
/// notified version.
///
/// Applying the same notification twice leaves the same state. A notification
/// whose remote value is gone, or that fails to read, is dropped.
pub(crate) async fn apply_invalidation(tiers: &Tiers, pending: PendingInvalidation) {
    let PendingInvalidation { entity, version } = pending;
    let _guard = tiers.entity_locks.lock(&entity).await;

    let value_key = entity.value_key();
    match tiers.remote.get(&value_key).await {
        Ok(Some(payload)) => {
            tiers.local.write().await.set(value_key, payload);
            tiers.versions.record(&entity, version);
            tiers.stats.record_invalidation_applied();
            debug!(entity = %entity, version, "invalidation applied");
        }
        Ok(None) => {
            tiers.stats.record_invalidation_dropped();
            debug!(entity = %entity, version, "remote value gone, dropping invalidation");
        }
        Err(e) => {
            tiers.stats.record_invalidation_dropped();
            warn!(entity = %entity, version, error = %e, "failed to apply invalidation");
        }
    }
}
