use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an entity inside one manager.
///
/// Persisted rows carry the key generated by the persistence provider.
/// Entities that were never saved carry a manager-scoped placeholder; the two
/// variants never compare equal, so a placeholder cannot collide with a real key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKey {
    /// Key assigned by storage.
    Persistent(i64),
    /// Placeholder handed out by the transient registry.
    Transient(u64),
}

impl EntityKey {
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Persistent(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// The storage key, if this entity has one.
    pub fn persistent(&self) -> Option<i64> {
        match self {
            Self::Persistent(id) => Some(*id),
            Self::Transient(_) => None,
        }
    }
}

impl From<i64> for EntityKey {
    fn from(id: i64) -> Self {
        Self::Persistent(id)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persistent(id) => write!(f, "#{}", id),
            Self::Transient(n) => write!(f, "new-{}", n),
        }
    }
}
