// ============================================================================
// EntityCache Library
// ============================================================================
//
// Identity-preserving entity cache with an explicit entity lifecycle:
// - at most one live instance per stored key (weak identity map)
// - a bounded, strongly held cache of recently used entities
// - New -> Editing -> Persisted -> Removed state machine with
//   snapshot/cancel/diff semantics and listener notification
//
// ============================================================================

pub mod cache;
pub mod core;
pub mod entity;
pub mod manager;

pub use crate::core::{EntityError, EntityKey, FieldMap, Result, Value};
pub use entity::{
    Delivery, Entity, EntityEvent, EntityKind, EntityRef, EntityState, EventQueue,
    EventQueueReceiver, FieldRule, Interest, KeyFieldLinker, LifecycleEvent, ListenerId,
    ParentLinker, PreSaveTest, RequiredField, Transition, TransitionKind,
};
pub use manager::{
    CacheStats, EntityManager, InMemoryProvider, ManagerConfig, PersistenceProvider, ProviderOp,
    SaveOutcome,
};
