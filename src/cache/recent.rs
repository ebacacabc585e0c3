use crate::core::{EntityError, Result};
use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

pub const DEFAULT_RECENT_CAPACITY: usize = 10;

/// Strongly held, access-ordered cache of recently touched values.
///
/// Recency is refreshed on both `get` and `put`. Overflow silently drops the
/// least recently used entry; the value stays reachable through whatever
/// else holds it.
pub struct BoundedRecentCache<K: Hash + Eq, V> {
    entries: LruCache<K, Arc<V>>,
}

impl<K, V> BoundedRecentCache<K, V>
where
    K: Hash + Eq + Clone,
{
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            EntityError::Config("recent cache capacity must be greater than zero".to_string())
        })?;
        Ok(Self {
            entries: LruCache::new(capacity),
        })
    }

    pub fn get(&mut self, key: &K) -> Option<Arc<V>> {
        self.entries.get(key).cloned()
    }

    /// Insert as most recently used. Returns the key evicted to make room, if any.
    pub fn put(&mut self, key: K, value: Arc<V>) -> Option<K> {
        match self.entries.push(key.clone(), value) {
            Some((old_key, _)) if old_key != key => Some(old_key),
            _ => None,
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<Arc<V>> {
        self.entries.pop(key)
    }

    /// Membership check that leaves recency untouched.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }
}

impl<K, V> Default for BoundedRecentCache<K, V>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self {
            entries: LruCache::new(
                NonZeroUsize::new(DEFAULT_RECENT_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            ),
        }
    }
}
