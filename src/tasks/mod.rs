//! Background Tasks Module
//!
//! Long-running tasks spawned by `LevelCache::start`.

mod cleanup;
mod invalidation;

pub(crate) use cleanup::spawn_cleanup_task;
pub(crate) use invalidation::spawn_invalidation_worker;
