use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Weak};

/// Minimum number of operations between full sweeps of cleared entries.
pub const DEFAULT_SWEEP_INTERVAL: usize = 64;

/// Weak key → instance map.
///
/// Holding an entry never keeps a value alive. Once every `Arc` to a value is
/// dropped its entry reads as absent and is purged, either on the next lookup
/// of that key or by the periodic sweep.
///
/// A sweep runs once the operations since the last one reach
/// `max(size left by that sweep, sweep_interval)`. The cost stays amortized
/// O(1) and cleared entries stay bounded by roughly the live size.
pub struct IdentityMap<K, V> {
    entries: HashMap<K, Weak<V>>,
    ops_since_sweep: usize,
    swept_len: usize,
    sweep_interval: usize,
}

impl<K, V> IdentityMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }

    pub fn with_sweep_interval(sweep_interval: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ops_since_sweep: 0,
            swept_len: 0,
            sweep_interval: sweep_interval.max(1),
        }
    }

    /// The live value for `key`, if anything still holds it.
    pub fn get(&mut self, key: &K) -> Option<Arc<V>> {
        self.tick();
        let value = self.entries.get(key)?.upgrade();
        if value.is_none() {
            self.entries.remove(key);
        }
        value
    }

    pub fn put(&mut self, key: K, value: &Arc<V>) {
        self.tick();
        self.entries.insert(key, Arc::downgrade(value));
    }

    /// Drop the mapping; returns the value if it was still live.
    pub fn remove(&mut self, key: &K) -> Option<Arc<V>> {
        self.tick();
        self.entries.remove(key).and_then(|weak| weak.upgrade())
    }

    /// Whether `key` maps to exactly this instance.
    pub fn holds(&self, key: &K, value: &Arc<V>) -> bool {
        self.entries
            .get(key)
            .map(|weak| Weak::ptr_eq(weak, &Arc::downgrade(value)))
            .unwrap_or(false)
    }

    /// Purge every cleared entry; returns how many were removed.
    pub fn sweep(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        self.ops_since_sweep = 0;
        self.swept_len = self.entries.len();
        before - self.swept_len
    }

    /// Entries held, including cleared ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn live_len(&self) -> usize {
        self.entries
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    fn tick(&mut self) {
        self.ops_since_sweep += 1;
        if self.ops_since_sweep >= self.swept_len.max(self.sweep_interval) {
            self.sweep();
        }
    }
}

impl<K, V> Default for IdentityMap<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
