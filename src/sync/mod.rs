//! Procedures that move state between the counter service and the cache.
//!
//! - [`ToggleEngine`]: debounced, single-flight optimistic toggles with
//!   authoritative reconcile or rollback
//! - [`BatchReconciler`]: bulk refresh for list views that never clobbers a
//!   recent user action
//! - [`Refresher`]: single-entity read-through (cache-then-revalidate)

mod batch;
mod pending;
mod refresh;
mod toggle;

pub use batch::{BatchReconciler, ReconcileReport};
pub use pending::{PendingGuard, PendingToggles};
pub use refresh::Refresher;
pub use toggle::{IgnoreReason, ToggleEngine, ToggleOperation, ToggleOutcome};

use crate::cache::CacheStore;

/// Decide whether a background read that captured `captured_version` before
/// suspending must be dropped instead of written.
///
/// The write is stale when a toggle is in flight for the entity, when the
/// entity holds a protected user-action record, or when a user action landed
/// after the read began.
pub(crate) fn is_stale_background_write(
  store: &CacheStore,
  pending: &PendingToggles,
  entity_id: &str,
  captured_version: Option<u64>,
) -> bool {
  if pending.contains(entity_id) {
    return true;
  }
  let Some(current) = store.get(entity_id) else {
    return false;
  };
  if store.policy().is_protected(&current, store.now()) {
    return true;
  }
  captured_version != Some(current.version) && current.source.is_user_action()
}
