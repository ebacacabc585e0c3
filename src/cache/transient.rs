use super::DEFAULT_SWEEP_INTERVAL;
use crate::core::{EntityError, EntityKey, Result};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Entities that exist only in memory, keyed by placeholder.
///
/// Entries are weak: an unsaved entity that every caller has dropped simply
/// disappears, it is not kept alive waiting for a save. Cleared entries are
/// swept on the same amortized schedule as `IdentityMap`.
pub struct TransientRegistry<V> {
    entries: HashMap<u64, Weak<V>>,
    next_placeholder: u64,
    ops_since_sweep: usize,
    swept_len: usize,
    sweep_interval: usize,
}

impl<V> TransientRegistry<V> {
    pub fn new() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }

    pub fn with_sweep_interval(sweep_interval: usize) -> Self {
        Self {
            entries: HashMap::new(),
            next_placeholder: 1,
            ops_since_sweep: 0,
            swept_len: 0,
            sweep_interval: sweep_interval.max(1),
        }
    }

    /// The key the next `register` call will hand out.
    pub fn next_placeholder(&self) -> EntityKey {
        EntityKey::Transient(self.next_placeholder)
    }

    /// Hand out the next placeholder key and track `value` under it.
    pub fn register(&mut self, value: &Arc<V>) -> EntityKey {
        self.tick();
        let placeholder = self.next_placeholder;
        self.next_placeholder += 1;
        self.entries.insert(placeholder, Arc::downgrade(value));
        EntityKey::Transient(placeholder)
    }

    pub fn get(&self, key: &EntityKey) -> Option<Arc<V>> {
        match key {
            EntityKey::Transient(n) => self.entries.get(n).and_then(Weak::upgrade),
            EntityKey::Persistent(_) => None,
        }
    }

    /// Release `value` from its placeholder so the caller can install it in
    /// the persistent tiers.
    pub fn promote(&mut self, placeholder: &EntityKey, value: &Arc<V>) -> Result<()> {
        self.take(placeholder, value, "promote")
    }

    /// Forget `value`; used when an unsaved entity is removed.
    pub fn unregister(&mut self, placeholder: &EntityKey, value: &Arc<V>) -> Result<()> {
        self.take(placeholder, value, "unregister")
    }

    pub fn len(&self) -> usize {
        self.entries
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Purge entries whose entity was dropped; returns how many were removed.
    pub fn sweep(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        self.ops_since_sweep = 0;
        self.swept_len = self.entries.len();
        before - self.swept_len
    }

    fn tick(&mut self) {
        self.ops_since_sweep += 1;
        if self.ops_since_sweep >= self.swept_len.max(self.sweep_interval) {
            self.sweep();
        }
    }

    fn take(&mut self, placeholder: &EntityKey, value: &Arc<V>, op: &str) -> Result<()> {
        let EntityKey::Transient(n) = placeholder else {
            return Err(EntityError::Logic(format!(
                "cannot {} {}: not a placeholder key",
                op, placeholder
            )));
        };
        match self.entries.get(n) {
            Some(weak) if Weak::ptr_eq(weak, &Arc::downgrade(value)) => {
                self.entries.remove(n);
                Ok(())
            }
            _ => Err(EntityError::Logic(format!(
                "cannot {} {}: entity is not registered under that placeholder",
                op, placeholder
            ))),
        }
    }
}

impl<V> Default for TransientRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}
