// ============================================================================
// Entity Cache Tiers
// ============================================================================
//
// Three stores share one key space under the manager lock:
// - IdentityMap: weak, one live instance per persisted key
// - BoundedRecentCache: strong, access-ordered hot subset of the identity map
// - TransientRegistry: weak, placeholder keys for entities never saved
//
// None of them lock on their own; EntityManager serializes access.
//
// ============================================================================

pub mod identity;
pub mod recent;
pub mod transient;

pub use identity::{DEFAULT_SWEEP_INTERVAL, IdentityMap};
pub use recent::{BoundedRecentCache, DEFAULT_RECENT_CAPACITY};
pub use transient::TransientRegistry;
