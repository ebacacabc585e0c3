// ============================================================================
// Entity Lifecycle State Machine
// ============================================================================
//
// State transitions:
//
//   (construct) ──Create──> New ──BeginEdit──> NewEditing
//                            │  <─CancelEdit──    │
//                            │                    │
//                            ├──────Save──────────┤──> Persisted ──BeginEdit──> PersistedEditing
//                            │                         │  <──CancelEdit/Save────      │
//                          Load ──────────────────────>│                              │
//                                                      │                              │
//   New / NewEditing / Persisted / PersistedEditing ──Remove──> Removed (terminal)
//
// Anything not drawn above is a programming error.
//
// ============================================================================

use crate::core::{EntityError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityState {
    /// Under construction; never visible to listeners.
    Init,
    /// Created in memory, never saved.
    New,
    /// Unsaved and being edited; an edit snapshot exists.
    NewEditing,
    /// In sync with storage.
    Persisted,
    /// Saved before, being edited; an edit snapshot exists.
    PersistedEditing,
    /// Deleted. Terminal.
    Removed,
}

impl EntityState {
    pub fn is_editing(&self) -> bool {
        matches!(self, Self::NewEditing | Self::PersistedEditing)
    }

    /// New or NewEditing.
    pub fn is_new(&self) -> bool {
        matches!(self, Self::New | Self::NewEditing)
    }

    /// Persisted or PersistedEditing.
    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted | Self::PersistedEditing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Removed)
    }

    /// State reached by `event`, or `InvalidTransition` when the pair is not
    /// part of the lifecycle. `self` is never modified.
    pub fn apply(self, event: LifecycleEvent) -> Result<EntityState> {
        use EntityState::*;
        use LifecycleEvent::*;

        let next = match (self, event) {
            (Init, Create) => New,

            (New, BeginEdit) => NewEditing,
            (Persisted, BeginEdit) => PersistedEditing,
            (NewEditing, BeginEdit) | (PersistedEditing, BeginEdit) => self,

            (NewEditing, CancelEdit) => New,
            (PersistedEditing, CancelEdit) => Persisted,

            (New, Save) | (NewEditing, Save) | (Persisted, Save) | (PersistedEditing, Save) => {
                Persisted
            }

            (New, Remove) | (NewEditing, Remove) | (Persisted, Remove)
            | (PersistedEditing, Remove) => Removed,

            (New, Load) => Persisted,

            _ => return Err(EntityError::InvalidTransition { state: self, event }),
        };
        Ok(next)
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityState::Init => write!(f, "INIT"),
            EntityState::New => write!(f, "NEW"),
            EntityState::NewEditing => write!(f, "NEW_EDITING"),
            EntityState::Persisted => write!(f, "PERSISTED"),
            EntityState::PersistedEditing => write!(f, "PERSISTED_EDITING"),
            EntityState::Removed => write!(f, "REMOVED"),
        }
    }
}

/// Events that drive the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleEvent {
    Create,
    BeginEdit,
    CancelEdit,
    Save,
    Remove,
    Load,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 6] = [
        LifecycleEvent::Create,
        LifecycleEvent::BeginEdit,
        LifecycleEvent::CancelEdit,
        LifecycleEvent::Save,
        LifecycleEvent::Remove,
        LifecycleEvent::Load,
    ];
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::Create => write!(f, "CREATE"),
            LifecycleEvent::BeginEdit => write!(f, "BEGIN_EDIT"),
            LifecycleEvent::CancelEdit => write!(f, "CANCEL_EDIT"),
            LifecycleEvent::Save => write!(f, "SAVE"),
            LifecycleEvent::Remove => write!(f, "REMOVE"),
            LifecycleEvent::Load => write!(f, "LOAD"),
        }
    }
}

/// What listeners are told happened. A cancelled edit is reported as `Reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionKind {
    Create,
    Edit,
    Reset,
    Save,
    Remove,
    Load,
}

impl From<LifecycleEvent> for TransitionKind {
    fn from(event: LifecycleEvent) -> Self {
        match event {
            LifecycleEvent::Create => TransitionKind::Create,
            LifecycleEvent::BeginEdit => TransitionKind::Edit,
            LifecycleEvent::CancelEdit => TransitionKind::Reset,
            LifecycleEvent::Save => TransitionKind::Save,
            LifecycleEvent::Remove => TransitionKind::Remove,
            LifecycleEvent::Load => TransitionKind::Load,
        }
    }
}

/// A completed state change, as delivered to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub kind: TransitionKind,
    pub old: EntityState,
    pub new: EntityState,
}

impl Transition {
    pub fn new(event: LifecycleEvent, old: EntityState, new: EntityState) -> Self {
        Self {
            kind: event.into(),
            old,
            new,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use EntityState::*;
    use LifecycleEvent::*;

    const STATES: [EntityState; 6] = [Init, New, NewEditing, Persisted, PersistedEditing, Removed];

    fn allowed() -> Vec<(EntityState, LifecycleEvent, EntityState)> {
        vec![
            (Init, Create, New),
            (New, BeginEdit, NewEditing),
            (Persisted, BeginEdit, PersistedEditing),
            (NewEditing, BeginEdit, NewEditing),
            (PersistedEditing, BeginEdit, PersistedEditing),
            (NewEditing, CancelEdit, New),
            (PersistedEditing, CancelEdit, Persisted),
            (New, Save, Persisted),
            (NewEditing, Save, Persisted),
            (PersistedEditing, Save, Persisted),
            (Persisted, Save, Persisted),
            (New, Remove, Removed),
            (NewEditing, Remove, Removed),
            (Persisted, Remove, Removed),
            (PersistedEditing, Remove, Removed),
            (New, Load, Persisted),
        ]
    }

    #[test]
    fn test_listed_transitions() {
        for (from, event, to) in allowed() {
            assert_eq!(from.apply(event).unwrap(), to, "{} --{}-->", from, event);
        }
    }

    #[test]
    fn test_every_unlisted_pair_is_rejected() {
        let allowed = allowed();
        for state in STATES {
            for event in LifecycleEvent::ALL {
                if allowed.iter().any(|(s, e, _)| *s == state && *e == event) {
                    continue;
                }
                let err = state.apply(event).unwrap_err();
                assert_eq!(err, EntityError::InvalidTransition { state, event });
                assert!(err.is_fatal());
            }
        }
    }

    #[test]
    fn test_removed_is_terminal() {
        for event in LifecycleEvent::ALL {
            assert!(Removed.apply(event).is_err());
        }
        assert!(Removed.is_terminal());
    }

    #[test]
    fn test_cancel_reports_reset() {
        let t = Transition::new(CancelEdit, PersistedEditing, Persisted);
        assert_eq!(t.kind, TransitionKind::Reset);
    }
}
