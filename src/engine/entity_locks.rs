//! In-process mutual exclusion per entity.
//!
//! Serializes the miss-path load, the refresh reload and the invalidation
//! apply for one entity inside this process. Slots are dropped once nobody
//! holds or waits for them.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::keys::EntityKey;

type Slots = DashMap<EntityKey, Arc<Mutex<()>>>;

#[derive(Debug, Default)]
pub(crate) struct EntityLocks {
    slots: Arc<Slots>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `entity`.
    pub async fn lock(&self, entity: &EntityKey) -> EntityGuard {
        let slot = Arc::clone(self.slots.entry(entity.clone()).or_default().value());
        let guard = slot.lock_owned().await;
        EntityGuard {
            entity: entity.clone(),
            slots: Arc::clone(&self.slots),
            guard: Some(guard),
        }
    }

    /// Number of entities currently locked or awaited.
    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

pub(crate) struct EntityGuard {
    entity: EntityKey,
    slots: Arc<Slots>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        self.guard.take();
        // the map's own reference is the last one: no holder, no waiter
        self.slots
            .remove_if(&self.entity, |_, slot| Arc::strong_count(slot) == 1);
    }
}
