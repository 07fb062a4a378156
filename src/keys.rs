//! Remote key scheme
//!
//! Every entity maps to three keys in the shared store: its value, its version
//! counter and its refresh lock.

use std::fmt;

/// Joint between key segments.
pub const KEY_SEPARATOR: &str = "#$#";

const VERSION_SEGMENT: &str = "version";
const LOCK_SEGMENT: &str = "lock";

/// Joins key segments with [`KEY_SEPARATOR`].
pub fn join_key(parts: &[&str]) -> String {
    parts.join(KEY_SEPARATOR)
}

// == Entity Key ==
/// Identity of a cached entity: a namespace plus a key inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    namespace: String,
    key: String,
}

impl EntityKey {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// `namespace#$#key`, used by both tiers for the serialized value.
    pub fn value_key(&self) -> String {
        join_key(&[&self.namespace, &self.key])
    }

    /// `namespace#$#key#$#version`, the authoritative counter.
    pub fn version_key(&self) -> String {
        join_key(&[&self.namespace, &self.key, VERSION_SEGMENT])
    }

    /// `lock#$#namespace#$#key`, the refresh lock.
    pub fn lock_key(&self) -> String {
        join_key(&[LOCK_SEGMENT, &self.namespace, &self.key])
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.namespace, KEY_SEPARATOR, self.key)
    }
}
