// ============================================================================
// Entity Module
// ============================================================================
//
// The entity itself, its lifecycle state machine, listener notification and
// the validation gate run before saves.
//
// ============================================================================

pub mod events;
pub mod kind;
pub mod record;
pub mod state;
pub mod validation;

pub use events::{
    Delivery, EntityEvent, EventQueue, EventQueueReceiver, Interest, ListenerFn, ListenerId,
    ListenerRegistry, QueuedEvent,
};
pub use kind::{EntityKind, KeyFieldLinker, ParentLinker};
pub use record::{Entity, EntityRef};
pub use state::{EntityState, LifecycleEvent, Transition, TransitionKind};
pub use validation::{FieldRule, PreSaveTest, RequiredField};

pub(crate) use record::{EntityContext, EntityImage};
