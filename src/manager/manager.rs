// ============================================================================
// Entity Manager
// ============================================================================
//
// Façade over the three cache tiers, the entity lifecycle and the
// persistence provider. One mutex serializes every cache mutation. Loads and
// deletes run under it; inserts and updates run outside it and commit under it.
//
// Lookup order for a persisted key: recent cache -> identity map -> provider.
//
// ============================================================================

use super::{ManagerConfig, PersistenceProvider};
use crate::cache::{BoundedRecentCache, IdentityMap, TransientRegistry};
use crate::core::{EntityError, EntityKey, FieldMap, Result, Value, diff_fields};
use crate::entity::{
    Entity, EntityContext, EntityEvent, EntityImage, EntityKind, EntityRef, EntityState,
    EventQueue, LifecycleEvent,
};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{Level, event, info_span};

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

/// Result of a save that did not hit a programming or storage error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The entity is Persisted. `wrote` is false when storage was not touched
    /// (already in sync, or nothing but the touch timestamp would change).
    Saved { wrote: bool },
    /// Pre-save tests or field rules failed; nothing changed.
    Invalid(Vec<String>),
}

impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, SaveOutcome::Saved { .. })
    }

    pub fn failures(&self) -> &[String] {
        match self {
            SaveOutcome::Invalid(failures) => failures,
            SaveOutcome::Saved { .. } => &[],
        }
    }
}

/// Cache counters and sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered by the recent cache
    pub recent_hits: u64,
    /// Lookups answered by the identity map after a recent-cache miss
    pub identity_hits: u64,
    /// Lookups that went to the provider
    pub loads: u64,
    /// New entities written to storage
    pub inserts: u64,
    /// Updates written to storage
    pub updates: u64,
    /// Entities removed
    pub removals: u64,
    /// Entries currently in the recent cache
    pub recent_entries: usize,
    /// Live entities reachable through the identity map
    pub identity_entries: usize,
    /// Live unsaved entities
    pub transient_entries: usize,
}

#[derive(Default)]
struct Counters {
    recent_hits: AtomicU64,
    identity_hits: AtomicU64,
    loads: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    removals: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct Caches {
    identity: IdentityMap<i64, Entity>,
    recent: BoundedRecentCache<i64, Entity>,
    transient: TransientRegistry<Entity>,
}

impl Caches {
    /// Install under `key` in both persistent tiers.
    fn install(&mut self, key: i64, entity: &EntityRef) {
        self.identity.put(key, entity);
        if let Some(evicted) = self.recent.put(key, entity.clone()) {
            event!(Level::TRACE, key = evicted, "evicted from recent cache");
        }
    }

    /// Install a persisted entity unless another live instance already
    /// represents its key, in which case that instance is returned.
    fn adopt(&mut self, entity: EntityRef) -> Result<EntityRef> {
        let key = entity.key().persistent().ok_or_else(|| {
            EntityError::Logic(format!("cannot cache {}: no storage key", entity.key()))
        })?;
        if let Some(existing) = self.identity.get(&key) {
            if !Arc::ptr_eq(&existing, &entity) {
                event!(Level::DEBUG, key, "key already cached, keeping cached instance");
            }
            self.recent.put(key, existing.clone());
            return Ok(existing);
        }
        self.install(key, &entity);
        Ok(entity)
    }

    /// Whether `entity` is the instance tracked under its current key.
    fn owns(&mut self, entity: &EntityRef) -> bool {
        let key = entity.key();
        match key {
            EntityKey::Transient(_) => self
                .transient
                .get(&key)
                .is_some_and(|cached| Arc::ptr_eq(&cached, entity)),
            EntityKey::Persistent(id) => self.identity.holds(&id, entity),
        }
    }

    fn detach(&mut self, entity: &EntityRef) -> Result<()> {
        let key = entity.key();
        match key {
            EntityKey::Transient(_) => self.transient.unregister(&key, entity),
            EntityKey::Persistent(id) => {
                if !self.identity.holds(&id, entity) {
                    return Err(not_cached(entity));
                }
                self.identity.remove(&id);
                self.recent.remove(&id);
                Ok(())
            }
        }
    }
}

fn not_cached(entity: &EntityRef) -> EntityError {
    EntityError::Logic(format!(
        "{} is not the cached instance for its key",
        entity.key()
    ))
}

/// Hands out entities of one kind and keeps at most one live instance per
/// stored key.
///
/// # Examples
///
/// ```
/// use entitycache::{EntityKind, EntityManager, InMemoryProvider, ManagerConfig};
/// use std::sync::Arc;
///
/// # fn main() -> entitycache::Result<()> {
/// let manager = EntityManager::new(
///     EntityKind::new("customer"),
///     Arc::new(InMemoryProvider::new()),
///     ManagerConfig::default(),
/// )?;
///
/// let customer = manager.get_new()?;
/// customer.set("name", "Alice")?;
/// assert!(manager.save(&customer)?.is_saved());
///
/// let again = manager.get(customer.key())?;
/// assert!(Arc::ptr_eq(&customer, &again));
/// # Ok(())
/// # }
/// ```
pub struct EntityManager {
    id: u64,
    context: Arc<EntityContext>,
    provider: Arc<dyn PersistenceProvider>,
    config: ManagerConfig,
    caches: Mutex<Caches>,
    counters: Counters,
}

impl EntityManager {
    pub fn new(
        kind: EntityKind,
        provider: Arc<dyn PersistenceProvider>,
        config: ManagerConfig,
    ) -> Result<Self> {
        Self::build(kind, provider, config, None)
    }

    /// Like `new`, with listeners in `EventQueue` mode posted to `queue`.
    pub fn new_with_queue(
        kind: EntityKind,
        provider: Arc<dyn PersistenceProvider>,
        config: ManagerConfig,
        queue: EventQueue,
    ) -> Result<Self> {
        Self::build(kind, provider, config, Some(queue))
    }

    fn build(
        kind: EntityKind,
        provider: Arc<dyn PersistenceProvider>,
        config: ManagerConfig,
        queue: Option<EventQueue>,
    ) -> Result<Self> {
        config.validate().map_err(EntityError::Config)?;
        let id = NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed);
        let caches = Caches {
            identity: IdentityMap::with_sweep_interval(config.sweep_interval),
            recent: BoundedRecentCache::new(config.recent_capacity)?,
            transient: TransientRegistry::with_sweep_interval(config.sweep_interval),
        };
        event!(
            Level::DEBUG,
            manager = id,
            kind = %kind.name(),
            recent_capacity = config.recent_capacity,
            "entity manager created"
        );
        Ok(Self {
            id,
            context: Arc::new(EntityContext {
                manager_id: id,
                kind,
                queue,
            }),
            provider,
            config,
            caches: Mutex::new(caches),
            counters: Counters::default(),
        })
    }

    pub fn kind(&self) -> &EntityKind {
        &self.context.kind
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------------

    /// The single live entity for `key`, loading it from storage on a miss.
    ///
    /// Placeholder keys are answered from the transient registry only. The
    /// manager lock is held across the load, so a concurrent `remove` cannot
    /// interleave with it.
    pub fn get(&self, key: impl Into<EntityKey>) -> Result<EntityRef> {
        let key = key.into();
        let id = match key {
            EntityKey::Transient(_) => {
                return self
                    .caches
                    .lock()?
                    .transient
                    .get(&key)
                    .ok_or(EntityError::NotFound(key));
            }
            EntityKey::Persistent(id) => id,
        };

        let mut caches = self.caches.lock()?;
        if let Some(entity) = caches.recent.get(&id) {
            Counters::bump(&self.counters.recent_hits);
            return Ok(entity);
        }
        if let Some(entity) = caches.identity.get(&id) {
            Counters::bump(&self.counters.identity_hits);
            caches.recent.put(id, entity.clone());
            return Ok(entity);
        }

        let loaded = self.load(id)?;
        caches.adopt(loaded)
    }

    /// Cached instance for `key` without touching recency or storage.
    pub fn cached(&self, key: impl Into<EntityKey>) -> Result<Option<EntityRef>> {
        let key = key.into();
        let mut caches = self.caches.lock()?;
        Ok(match key {
            EntityKey::Persistent(id) => caches.identity.get(&id),
            EntityKey::Transient(_) => caches.transient.get(&key),
        })
    }

    /// Whether `key` is currently held by the recent cache.
    pub fn is_recent(&self, key: impl Into<EntityKey>) -> Result<bool> {
        Ok(match key.into() {
            EntityKey::Persistent(id) => self.caches.lock()?.recent.contains(&id),
            EntityKey::Transient(_) => false,
        })
    }

    /// Drop every strong reference held by the recent cache.
    pub fn clear_recent(&self) -> Result<()> {
        self.caches.lock()?.recent.clear();
        Ok(())
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let caches = self.caches.lock()?;
        Ok(CacheStats {
            recent_hits: self.counters.recent_hits.load(Ordering::Relaxed),
            identity_hits: self.counters.identity_hits.load(Ordering::Relaxed),
            loads: self.counters.loads.load(Ordering::Relaxed),
            inserts: self.counters.inserts.load(Ordering::Relaxed),
            updates: self.counters.updates.load(Ordering::Relaxed),
            removals: self.counters.removals.load(Ordering::Relaxed),
            recent_entries: caches.recent.len(),
            identity_entries: caches.identity.live_len(),
            transient_entries: caches.transient.len(),
        })
    }

    // ------------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------------

    /// A New entity with the kind's default values, tracked under a placeholder key.
    pub fn get_new(&self) -> Result<EntityRef> {
        if self.kind().is_read_only() {
            return Err(EntityError::Logic(format!(
                "cannot create {}: kind is read-only",
                self.kind().name()
            )));
        }
        let mut caches = self.caches.lock()?;
        let placeholder = caches.transient.next_placeholder();
        let entity = Arc::new(Entity::create(
            self.context.clone(),
            placeholder,
            self.kind().defaults().clone(),
        )?);
        let registered = caches.transient.register(&entity);
        debug_assert_eq!(registered, placeholder);
        event!(Level::DEBUG, key = %placeholder, kind = %self.kind().name(), "new entity");
        Ok(entity)
    }

    /// A New entity linked to `parent` through the kind's parent linker.
    pub fn get_new_with_parent(&self, parent: &EntityRef) -> Result<EntityRef> {
        let entity = self.get_new()?;
        self.link(&entity, parent)?;
        Ok(entity)
    }

    /// A New entity holding a copy of `source`'s values, optionally linked to
    /// `parent`. The index field is not copied so the copy gets its own position.
    pub fn get_new_copy(&self, source: &EntityRef, parent: Option<&EntityRef>) -> Result<EntityRef> {
        let entity = self.get_new()?;
        let skip: Vec<&str> = self.kind().index_field().into_iter().collect();
        entity.copy_from(source, &skip)?;
        if let Some(parent) = parent {
            self.link(&entity, parent)?;
        }
        Ok(entity)
    }

    fn link(&self, child: &EntityRef, parent: &EntityRef) -> Result<()> {
        let linker = self.kind().parent_linker().ok_or_else(|| {
            EntityError::Logic(format!(
                "{} has no parent linker",
                self.kind().name()
            ))
        })?;
        linker.link(child, parent)
    }

    // ------------------------------------------------------------------------
    // Save / remove
    // ------------------------------------------------------------------------

    /// Validate and write the entity, then move it to Persisted.
    ///
    /// Validation failures come back as `SaveOutcome::Invalid`. A provider
    /// error is returned as-is with the entity still in its editing state and
    /// the caches untouched.
    pub fn save(&self, entity: &EntityRef) -> Result<SaveOutcome> {
        self.check_owner(entity)?;
        let image = entity.image();
        let span = info_span!(
            "entity.save",
            kind = %self.kind().name(),
            key = %image.key,
            state = %image.state
        );
        let _enter = span.enter();

        image.state.apply(LifecycleEvent::Save)?;
        if image.state == EntityState::Persisted {
            return Ok(SaveOutcome::Saved { wrote: false });
        }

        let failures = entity.validate(&image.fields);
        if !failures.is_empty() {
            event!(Level::DEBUG, failures = failures.len(), "save rejected by validation");
            return Ok(SaveOutcome::Invalid(failures));
        }

        if image.state.is_new() {
            self.insert_new(entity, image)
        } else {
            self.update_existing(entity, image)
        }
    }

    fn insert_new(&self, entity: &EntityRef, image: EntityImage) -> Result<SaveOutcome> {
        let mut fields = image.fields;
        if let Some(index_field) = self.kind().index_field() {
            if fields.get(index_field).is_none_or(Value::is_null) {
                let index = self.provider.find_next_index().inspect_err(|err| {
                    event!(Level::ERROR, error = %err, "next index lookup failed");
                })?;
                fields.insert(index_field.to_string(), Value::Integer(index));
            }
        }
        self.touch(&mut fields);

        let new_key = self.provider.insert(&fields).inspect_err(|err| {
            event!(Level::ERROR, error = %err, "insert failed");
        })?;
        Counters::bump(&self.counters.inserts);

        let events = entity.commit_save(Some(EntityKey::Persistent(new_key)), fields)?;
        self.persist_transient(entity, image.key, new_key)?;
        entity.fire(events);
        event!(Level::DEBUG, key = new_key, "entity inserted");
        Ok(SaveOutcome::Saved { wrote: true })
    }

    fn update_existing(&self, entity: &EntityRef, image: EntityImage) -> Result<SaveOutcome> {
        let key = image.key.persistent().ok_or_else(|| {
            EntityError::Logic(format!("persisted entity carries placeholder {}", image.key))
        })?;
        let mut diff = diff_fields(&image.snapshot, &image.fields);
        let mut written = image.fields;

        let wrote = if diff.is_empty() && !self.config.write_empty_updates {
            event!(Level::DEBUG, key, "no field changes, storage write skipped");
            false
        } else {
            if let Some((field, value)) = self.touch(&mut written) {
                diff.insert(field, value);
            }
            self.provider.update(key, &diff).inspect_err(|err| {
                event!(Level::ERROR, key, error = %err, "update failed");
            })?;
            Counters::bump(&self.counters.updates);
            true
        };

        let events = entity.commit_save(None, written)?;
        entity.fire(events);
        Ok(SaveOutcome::Saved { wrote })
    }

    /// Delete the entity from storage (if it was ever saved), detach it from
    /// the caches and move it to Removed.
    pub fn remove(&self, entity: &EntityRef) -> Result<()> {
        self.check_owner(entity)?;
        if self.kind().is_read_only() {
            return Err(EntityError::Logic(format!(
                "cannot remove {} {}: kind is read-only",
                self.kind().name(),
                entity.key()
            )));
        }
        let image = entity.image();
        let span = info_span!("entity.remove", kind = %self.kind().name(), key = %image.key);
        let _enter = span.enter();

        image.state.apply(LifecycleEvent::Remove)?;
        {
            let mut caches = self.caches.lock()?;
            if !caches.owns(entity) {
                return Err(not_cached(entity));
            }
            if let Some(key) = image.key.persistent() {
                self.provider.delete(key).inspect_err(|err| {
                    event!(Level::ERROR, key, error = %err, "delete failed");
                })?;
            }
            caches.detach(entity)?;
        }
        Counters::bump(&self.counters.removals);

        let events = entity.commit_remove()?;
        entity.fire(events);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Cache maintenance
    // ------------------------------------------------------------------------

    /// Install a persisted entity of this manager in the identity map and
    /// the recent cache.
    ///
    /// If another live instance already represents the key that instance is
    /// kept and returned instead.
    pub fn insert_into_cache(&self, entity: EntityRef) -> Result<EntityRef> {
        self.check_owner(&entity)?;
        self.caches.lock()?.adopt(entity)
    }

    /// Detach the entity from whichever tier tracks it. Storage is not touched.
    pub fn remove_from_cache(&self, entity: &EntityRef) -> Result<()> {
        self.check_owner(entity)?;
        self.caches.lock()?.detach(entity)
    }

    /// Move a just-inserted entity from the transient registry to the
    /// persistent tiers and announce its new key. Runs once per entity: a
    /// second call finds nothing under the placeholder and fails.
    pub(crate) fn persist_transient(
        &self,
        entity: &EntityRef,
        placeholder: EntityKey,
        new_key: i64,
    ) -> Result<()> {
        if entity.key() != EntityKey::Persistent(new_key) {
            return Err(EntityError::Logic(format!(
                "entity key {} does not match promoted key #{}",
                entity.key(),
                new_key
            )));
        }
        {
            let mut caches = self.caches.lock()?;
            caches.transient.promote(&placeholder, entity)?;
            caches.install(new_key, entity);
        }
        event!(Level::DEBUG, from = %placeholder, to = new_key, "transient entity promoted");
        entity.fire(vec![EntityEvent::PrimaryKey {
            old: placeholder,
            new: EntityKey::Persistent(new_key),
        }]);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn load(&self, id: i64) -> Result<EntityRef> {
        let span = info_span!("manager.load", kind = %self.kind().name(), key = id);
        let _enter = span.enter();

        Counters::bump(&self.counters.loads);
        let fields = self
            .provider
            .get(id)
            .inspect_err(|err| event!(Level::ERROR, error = %err, "load failed"))?
            .ok_or(EntityError::NotFound(EntityKey::Persistent(id)))?;
        let entity = Arc::new(Entity::create(
            self.context.clone(),
            EntityKey::Persistent(id),
            FieldMap::new(),
        )?);
        entity.load(fields)?;
        event!(Level::DEBUG, "entity loaded");
        Ok(entity)
    }

    fn touch(&self, fields: &mut FieldMap) -> Option<(String, Value)> {
        let field = self.config.touch_field.as_ref()?;
        let value = Value::Text(Utc::now().to_rfc3339());
        fields.insert(field.clone(), value.clone());
        Some((field.clone(), value))
    }

    fn check_owner(&self, entity: &EntityRef) -> Result<()> {
        if entity.manager_id() != self.id {
            return Err(EntityError::Logic(format!(
                "{} {} belongs to another manager",
                entity.kind().name(),
                entity.key()
            )));
        }
        Ok(())
    }
}
