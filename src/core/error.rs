use crate::core::EntityKey;
use crate::entity::{EntityState, LifecycleEvent};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EntityError {
    #[error("Invalid transition: {event} is not allowed in state {state}")]
    InvalidTransition {
        state: EntityState,
        event: LifecycleEvent,
    },

    #[error("Logic error: {0}")]
    Logic(String),

    #[error("Entity {0} not found")]
    NotFound(EntityKey),

    #[error("Persistence provider error: {0}")]
    Provider(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl EntityError {
    /// Programming errors: the caller broke the lifecycle contract.
    /// They are never worth retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. } | Self::Logic(_))
    }
}

pub type Result<T> = std::result::Result<T, EntityError>;

impl<T> From<std::sync::PoisonError<T>> for EntityError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let err = EntityError::InvalidTransition {
            state: EntityState::Removed,
            event: LifecycleEvent::Save,
        };
        assert!(err.is_fatal());
        assert!(EntityError::Logic("copy on persisted entity".into()).is_fatal());
        assert!(!EntityError::Provider("disk full".into()).is_fatal());
        assert!(!EntityError::NotFound(EntityKey::Persistent(7)).is_fatal());
    }

    #[test]
    fn test_error_messages() {
        let err = EntityError::InvalidTransition {
            state: EntityState::Removed,
            event: LifecycleEvent::Save,
        };
        assert_eq!(
            err.to_string(),
            "Invalid transition: SAVE is not allowed in state REMOVED"
        );
        assert_eq!(
            EntityError::NotFound(EntityKey::Persistent(3)).to_string(),
            "Entity #3 not found"
        );
    }
}
