use crate::core::{EntityKey, FieldMap, Result, Value};
use crate::entity::{Delivery, EntityEvent, EntityRef, FieldRule, Interest, ListenerId};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::warn;

/// Capabilities and collaborators shared by every entity a manager hands out.
///
/// One `EntityKind` replaces a family of read-only / editable / indexed entity
/// types: the flags are orthogonal and combine freely.
#[derive(Clone)]
pub struct EntityKind {
    name: String,
    read_only: bool,
    index_field: Option<String>,
    name_field: Option<String>,
    title_field: Option<String>,
    defaults: FieldMap,
    rules: Vec<Arc<dyn FieldRule>>,
    parent_linker: Option<Arc<dyn ParentLinker>>,
}

impl EntityKind {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            read_only: false,
            index_field: None,
            name_field: None,
            title_field: None,
            defaults: FieldMap::new(),
            rules: Vec::new(),
            parent_linker: None,
        }
    }

    /// Entities can be loaded but never created, edited or removed.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Ordered entities: `field` is filled from the provider's next index on
    /// first insert when it is still null.
    pub fn indexed(mut self, field: impl Into<String>) -> Self {
        self.index_field = Some(field.into());
        self
    }

    pub fn name_field(mut self, field: impl Into<String>) -> Self {
        self.name_field = Some(field.into());
        self
    }

    pub fn title_field(mut self, field: impl Into<String>) -> Self {
        self.title_field = Some(field.into());
        self
    }

    /// Initial value for entities created with `get_new`.
    pub fn with_default(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.insert(field.into(), value.into());
        self
    }

    pub fn with_rule(mut self, rule: impl FieldRule + 'static) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }

    pub fn with_parent_linker(mut self, linker: impl ParentLinker + 'static) -> Self {
        self.parent_linker = Some(Arc::new(linker));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn index_field(&self) -> Option<&str> {
        self.index_field.as_deref()
    }

    pub fn name_field_name(&self) -> Option<&str> {
        self.name_field.as_deref()
    }

    pub fn title_field_name(&self) -> Option<&str> {
        self.title_field.as_deref()
    }

    pub fn defaults(&self) -> &FieldMap {
        &self.defaults
    }

    pub fn rules(&self) -> &[Arc<dyn FieldRule>] {
        &self.rules
    }

    pub fn parent_linker(&self) -> Option<&Arc<dyn ParentLinker>> {
        self.parent_linker.as_ref()
    }
}

impl fmt::Debug for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityKind")
            .field("name", &self.name)
            .field("read_only", &self.read_only)
            .field("index_field", &self.index_field)
            .field("rules", &self.rules.len())
            .field("parent_linker", &self.parent_linker.is_some())
            .finish()
    }
}

/// Hook connecting a freshly created child to its parent.
pub trait ParentLinker: Send + Sync {
    fn link(&self, child: &EntityRef, parent: &EntityRef) -> Result<()>;
}

/// Stores the parent's key in a child field.
///
/// While the parent is unsaved the field holds `Null`; the linker follows the
/// parent's key-change event, writes the real key once it is assigned and then
/// unsubscribes.
pub struct KeyFieldLinker {
    field: String,
}

impl KeyFieldLinker {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl ParentLinker for KeyFieldLinker {
    fn link(&self, child: &EntityRef, parent: &EntityRef) -> Result<()> {
        let parent_key = parent.key();
        child.set_initial(&self.field, key_value(parent_key))?;
        if parent_key.is_persistent() {
            return Ok(());
        }

        let field = self.field.clone();
        let child = Arc::downgrade(child);
        let owner = Arc::downgrade(parent);
        let registered: Arc<OnceLock<ListenerId>> = Arc::new(OnceLock::new());
        let own_id = registered.clone();
        let id = parent.add_listener(
            Interest::PrimaryKey,
            Delivery::Immediate,
            Arc::new(move |event: &EntityEvent| {
                let EntityEvent::PrimaryKey { new, .. } = event else {
                    return;
                };
                if let Some(child) = child.upgrade() {
                    let value = key_value(*new);
                    let result = if child.state().is_new() {
                        child.set_initial(&field, value)
                    } else {
                        child.set(&field, value)
                    };
                    if let Err(err) = result {
                        warn!(child = %child.key(), error = %err, "could not re-point parent reference");
                    }
                }
                // a key is assigned once
                if let (Some(parent), Some(id)) = (owner.upgrade(), own_id.get()) {
                    parent.remove_listener(*id);
                }
            }),
        )?;
        let _ = registered.set(id);
        Ok(())
    }
}

fn key_value(key: EntityKey) -> Value {
    key.persistent().map(Value::Integer).unwrap_or(Value::Null)
}
