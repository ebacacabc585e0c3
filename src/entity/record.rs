use crate::core::{EntityError, EntityKey, FieldMap, Result, Value, diff_fields};
use crate::entity::events::require_queue;
use crate::entity::validation::{collect_failures, value_or_null};
use crate::entity::{
    Delivery, EntityEvent, EntityKind, EntityState, EventQueue, Interest, LifecycleEvent,
    ListenerFn, ListenerId, ListenerRegistry, PreSaveTest, Transition,
};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared handle to an entity. The identity map tracks these weakly.
pub type EntityRef = Arc<Entity>;

/// What every entity of one manager shares.
pub(crate) struct EntityContext {
    pub(crate) manager_id: u64,
    pub(crate) kind: EntityKind,
    pub(crate) queue: Option<EventQueue>,
}

struct EntityData {
    key: EntityKey,
    state: EntityState,
    fields: FieldMap,
    /// Values at the last load/save, or at BeginEdit. Cancel restores them and
    /// diffs are computed against them.
    snapshot: FieldMap,
}

/// In-memory representative of one stored (or about to be stored) record.
///
/// Field access and editing happen here; anything touching storage or the
/// caches (save, remove) goes through the owning `EntityManager`.
///
/// An entity is not meant to be edited from several threads at once; it is
/// `Send + Sync` so that it can live in the shared caches.
pub struct Entity {
    context: Arc<EntityContext>,
    data: Mutex<EntityData>,
    listeners: ListenerRegistry,
    pre_save_tests: Mutex<Vec<PreSaveTest>>,
}

/// Frozen view of an entity taken at the start of a save or remove.
pub(crate) struct EntityImage {
    pub(crate) key: EntityKey,
    pub(crate) state: EntityState,
    pub(crate) fields: FieldMap,
    pub(crate) snapshot: FieldMap,
}

impl Entity {
    /// Construct and run Create. Nobody can have subscribed yet, so no event
    /// is observable.
    pub(crate) fn create(context: Arc<EntityContext>, key: EntityKey, fields: FieldMap) -> Result<Self> {
        let state = EntityState::Init.apply(LifecycleEvent::Create)?;
        Ok(Self {
            context,
            data: Mutex::new(EntityData {
                key,
                state,
                snapshot: fields.clone(),
                fields,
            }),
            listeners: ListenerRegistry::new(),
            pre_save_tests: Mutex::new(Vec::new()),
        })
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    pub fn key(&self) -> EntityKey {
        self.data().key
    }

    pub fn state(&self) -> EntityState {
        self.data().state
    }

    pub fn kind(&self) -> &EntityKind {
        &self.context.kind
    }

    /// Value of `field`, `Null` when unset.
    pub fn get(&self, field: &str) -> Value {
        value_or_null(&self.data().fields, field)
    }

    pub fn fields(&self) -> FieldMap {
        self.data().fields.clone()
    }

    /// Changes since the last load, save or BeginEdit.
    pub fn diff(&self) -> FieldMap {
        let data = self.data();
        diff_fields(&data.snapshot, &data.fields)
    }

    pub fn is_dirty(&self) -> bool {
        !self.diff().is_empty()
    }

    /// Display name, from the kind's name field.
    pub fn name(&self) -> Option<Value> {
        let field = self.context.kind.name_field_name()?;
        Some(self.get(field))
    }

    pub fn title(&self) -> Option<Value> {
        let field = self.context.kind.title_field_name()?;
        Some(self.get(field))
    }

    // ------------------------------------------------------------------------
    // Editing
    // ------------------------------------------------------------------------

    /// Enter the editing variant of the current state and snapshot the fields.
    /// A no-op while already editing.
    pub fn begin_edit(&self) -> Result<()> {
        self.ensure_editable(LifecycleEvent::BeginEdit)?;
        let events = {
            let mut data = self.data();
            self.begin_edit_locked(&mut data)?.into_iter().collect::<Vec<_>>()
        };
        self.fire(events);
        Ok(())
    }

    /// Restore the snapshot taken by `begin_edit` and leave the editing state.
    pub fn cancel_edit(&self) -> Result<()> {
        let events = {
            let mut data = self.data();
            let old = data.state;
            let new = old.apply(LifecycleEvent::CancelEdit)?;
            let restored = data.snapshot.clone();
            let mut events = self.field_events(data.key, &data.fields, &restored);
            data.fields = restored;
            data.state = new;
            events.insert(
                0,
                EntityEvent::State {
                    key: data.key,
                    transition: Transition::new(LifecycleEvent::CancelEdit, old, new),
                },
            );
            events
        };
        self.fire(events);
        Ok(())
    }

    /// Set a field, entering the editing state first if needed.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<()> {
        self.ensure_editable(LifecycleEvent::BeginEdit)?;
        let value = value.into();
        let events = {
            let mut data = self.data();
            let mut events: Vec<EntityEvent> = self.begin_edit_locked(&mut data)?.into_iter().collect();
            let mut next = data.fields.clone();
            next.insert(field.to_string(), value);
            events.extend(self.field_events(data.key, &data.fields, &next));
            data.fields = next;
            events
        };
        self.fire(events);
        Ok(())
    }

    /// Write a field of an unsaved entity without starting an edit. The value
    /// becomes part of the baseline, so cancelling an edit keeps it.
    pub fn set_initial(&self, field: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let events = {
            let mut data = self.data();
            if !data.state.is_new() {
                return Err(EntityError::Logic(format!(
                    "set_initial on {} requires an unsaved entity, state is {}",
                    data.key, data.state
                )));
            }
            let mut next = data.fields.clone();
            next.insert(field.to_string(), value.clone());
            let events = self.field_events(data.key, &data.fields, &next);
            data.fields = next;
            data.snapshot.insert(field.to_string(), value);
            events
        };
        self.fire(events);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Listeners and pre-save tests
    // ------------------------------------------------------------------------

    pub fn add_listener(
        &self,
        interest: Interest,
        delivery: Delivery,
        callback: ListenerFn,
    ) -> Result<ListenerId> {
        require_queue(delivery, self.context.queue.as_ref())?;
        Ok(self.listeners.add(interest, delivery, callback))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Register a check run before every save of this entity.
    pub fn add_pre_save_test(&self, test: PreSaveTest) {
        self.pre_save_tests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(test);
    }

    // ------------------------------------------------------------------------
    // Manager-facing transitions
    // ------------------------------------------------------------------------

    pub(crate) fn manager_id(&self) -> u64 {
        self.context.manager_id
    }

    pub(crate) fn image(&self) -> EntityImage {
        let data = self.data();
        EntityImage {
            key: data.key,
            state: data.state,
            fields: data.fields.clone(),
            snapshot: data.snapshot.clone(),
        }
    }

    /// Failure messages from pre-save tests and the kind's field rules.
    pub(crate) fn validate(&self, fields: &FieldMap) -> Vec<String> {
        let tests = self
            .pre_save_tests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        collect_failures(fields, &tests, self.context.kind.rules())
    }

    /// Populate a freshly constructed entity from storage (New → Persisted).
    pub(crate) fn load(&self, fields: FieldMap) -> Result<()> {
        let events = {
            let mut data = self.data();
            let old = data.state;
            let new = old.apply(LifecycleEvent::Load)?;
            data.snapshot = fields.clone();
            data.fields = fields;
            data.state = new;
            vec![EntityEvent::State {
                key: data.key,
                transition: Transition::new(LifecycleEvent::Load, old, new),
            }]
        };
        self.fire(events);
        Ok(())
    }

    /// Copy field values from `source`; only legal while this entity is New.
    pub(crate) fn copy_from(&self, source: &Entity, skip: &[&str]) -> Result<()> {
        let copied = source.fields();
        let events = {
            let mut data = self.data();
            if data.state != EntityState::New {
                return Err(EntityError::Logic(format!(
                    "copy into {} requires state NEW, state is {}",
                    data.key, data.state
                )));
            }
            let mut next = data.fields.clone();
            for (field, value) in copied.iter() {
                if !skip.contains(&field.as_str()) {
                    next.insert(field.clone(), value.clone());
                }
            }
            let events = self.field_events(data.key, &data.fields, &next);
            data.snapshot = next.clone();
            data.fields = next;
            events
        };
        self.fire(events);
        Ok(())
    }

    /// Record a successful save. `written` is what storage now holds.
    pub(crate) fn commit_save(&self, new_key: Option<EntityKey>, written: FieldMap) -> Result<Vec<EntityEvent>> {
        let mut data = self.data();
        let old = data.state;
        let new = old.apply(LifecycleEvent::Save)?;
        if let Some(key) = new_key {
            data.key = key;
        }
        let mut events = self.field_events(data.key, &data.fields, &written);
        data.snapshot = written.clone();
        data.fields = written;
        data.state = new;
        events.push(EntityEvent::State {
            key: data.key,
            transition: Transition::new(LifecycleEvent::Save, old, new),
        });
        Ok(events)
    }

    pub(crate) fn commit_remove(&self) -> Result<Vec<EntityEvent>> {
        let mut data = self.data();
        let old = data.state;
        let new = old.apply(LifecycleEvent::Remove)?;
        data.state = new;
        Ok(vec![EntityEvent::State {
            key: data.key,
            transition: Transition::new(LifecycleEvent::Remove, old, new),
        }])
    }

    pub(crate) fn fire(&self, events: Vec<EntityEvent>) {
        self.listeners.fire(&events, self.context.queue.as_ref());
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn data(&self) -> MutexGuard<'_, EntityData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_editable(&self, event: LifecycleEvent) -> Result<()> {
        if self.context.kind.is_read_only() {
            return Err(EntityError::Logic(format!(
                "{} {} is read-only, {} rejected",
                self.context.kind.name(),
                self.key(),
                event
            )));
        }
        Ok(())
    }

    fn begin_edit_locked(&self, data: &mut EntityData) -> Result<Option<EntityEvent>> {
        let old = data.state;
        let new = old.apply(LifecycleEvent::BeginEdit)?;
        if old == new {
            return Ok(None);
        }
        data.snapshot = data.fields.clone();
        data.state = new;
        Ok(Some(EntityEvent::State {
            key: data.key,
            transition: Transition::new(LifecycleEvent::BeginEdit, old, new),
        }))
    }

    /// Field, Name and Title events for every value that differs between
    /// `before` and `after`.
    fn field_events(&self, key: EntityKey, before: &FieldMap, after: &FieldMap) -> Vec<EntityEvent> {
        let kind = &self.context.kind;
        let mut events = Vec::new();
        for (field, new) in diff_fields(before, after).into_iter() {
            let old = value_or_null(before, &field);
            if kind.name_field_name() == Some(field.as_str()) {
                events.push(EntityEvent::Name {
                    key,
                    old: old.clone(),
                    new: new.clone(),
                });
            }
            if kind.title_field_name() == Some(field.as_str()) {
                events.push(EntityEvent::Title {
                    key,
                    old: old.clone(),
                    new: new.clone(),
                });
            }
            events.push(EntityEvent::Field { key, field, old, new });
        }
        events
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data();
        f.debug_struct("Entity")
            .field("kind", &self.context.kind.name())
            .field("key", &data.key)
            .field("state", &data.state)
            .field("fields", &data.fields)
            .finish()
    }
}
