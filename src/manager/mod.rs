// ============================================================================
// Entity Manager Module
// ============================================================================
//
// The manager façade, its configuration and the persistence provider
// contract it drives.
//
// ============================================================================

pub mod config;
pub mod manager;
pub mod provider;

pub use config::ManagerConfig;
pub use manager::{CacheStats, EntityManager, SaveOutcome};
pub use provider::{InMemoryProvider, PersistenceProvider, ProviderOp};
