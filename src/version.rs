//! Version Tracker
//!
//! Per-instance shadow of the remote version counters: the last version this
//! instance has applied for each entity.

use dashmap::DashMap;
use tracing::warn;

use crate::keys::EntityKey;

// == Pending Invalidation ==
/// An entity whose remote version moved past the local shadow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInvalidation {
    pub entity: EntityKey,
    /// Remote counter observed when the mismatch was detected
    pub version: i64,
}

/// Parses the base-10 counter stored under a version key.
pub fn parse_version(raw: &str) -> Option<i64> {
    match raw.trim().parse() {
        Ok(version) => Some(version),
        Err(_) => {
            warn!(raw = %raw, "ignoring malformed version counter");
            None
        }
    }
}

// == Version Tracker ==
/// Shadow versions, one per entity loaded or refreshed in this instance.
#[derive(Debug, Default)]
pub struct VersionTracker {
    applied: DashMap<EntityKey, i64>,
}

impl VersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last applied version, `None` if the entity was never loaded here.
    pub fn get(&self, entity: &EntityKey) -> Option<i64> {
        self.applied.get(entity).map(|version| *version)
    }

    /// Seeds the shadow at 0 unless one already exists.
    pub fn seed(&self, entity: &EntityKey) {
        self.applied.entry(entity.clone()).or_insert(0);
    }

    /// Sets the shadow, creating it if needed.
    pub fn record(&self, entity: &EntityKey, version: i64) {
        self.applied.insert(entity.clone(), version);
    }

    /// Sets the shadow only if the entity already has one.
    pub fn adopt(&self, entity: &EntityKey, version: i64) -> bool {
        match self.applied.get_mut(entity) {
            Some(mut applied) => {
                *applied = version;
                true
            }
            None => false,
        }
    }

    /// Compares the shadow with the remote counter.
    ///
    /// Returns a notification when a shadow exists and differs. Entities
    /// without a shadow are never reported.
    pub fn check(&self, entity: &EntityKey, remote: i64) -> Option<PendingInvalidation> {
        let applied = self.get(entity)?;
        (applied != remote).then(|| PendingInvalidation {
            entity: entity.clone(),
            version: remote,
        })
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dish(key: &str) -> EntityKey {
        EntityKey::new("dish", key)
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("7"), Some(7));
        assert_eq!(parse_version(" 12\n"), Some(12));
        assert_eq!(parse_version("seven"), None);
    }

    #[test]
    fn test_seed_keeps_existing_version() {
        let tracker = VersionTracker::new();
        tracker.seed(&dish("1"));
        assert_eq!(tracker.get(&dish("1")), Some(0));

        tracker.record(&dish("1"), 4);
        tracker.seed(&dish("1"));
        assert_eq!(tracker.get(&dish("1")), Some(4));
    }

    #[test]
    fn test_check_skips_unknown_entities() {
        let tracker = VersionTracker::new();
        assert!(tracker.check(&dish("1"), 3).is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_check_reports_mismatch() {
        let tracker = VersionTracker::new();
        tracker.seed(&dish("1"));

        assert!(tracker.check(&dish("1"), 0).is_none());
        assert_eq!(
            tracker.check(&dish("1"), 2),
            Some(PendingInvalidation {
                entity: dish("1"),
                version: 2
            })
        );
    }

    #[test]
    fn test_adopt_only_updates_existing() {
        let tracker = VersionTracker::new();
        assert!(!tracker.adopt(&dish("1"), 5));
        assert!(tracker.get(&dish("1")).is_none());

        tracker.seed(&dish("1"));
        assert!(tracker.adopt(&dish("1"), 5));
        assert_eq!(tracker.get(&dish("1")), Some(5));
        assert_eq!(tracker.len(), 1);
    }
}
