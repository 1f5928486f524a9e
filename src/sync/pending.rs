//! Set of entities with a toggle in flight.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct PendingToggles {
  ids: Mutex<HashSet<String>>,
}

impl PendingToggles {
  pub fn new() -> Self {
    Self::default()
  }

  /// Claim `entity_id`. Returns `None` when a toggle already holds it.
  pub fn try_begin(self: &Arc<Self>, entity_id: &str) -> Option<PendingGuard> {
    let inserted = self
      .ids
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .insert(entity_id.to_string());

    inserted.then(|| PendingGuard {
      pending: Arc::clone(self),
      entity_id: entity_id.to_string(),
    })
  }

  pub fn contains(&self, entity_id: &str) -> bool {
    self
      .ids
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .contains(entity_id)
  }

  pub fn len(&self) -> usize {
    self.ids.lock().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Releases the claim on drop, including when the owning future is dropped.
#[derive(Debug)]
pub struct PendingGuard {
  pending: Arc<PendingToggles>,
  entity_id: String,
}

impl Drop for PendingGuard {
  fn drop(&mut self) {
    self
      .pending
      .ids
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .remove(&self.entity_id);
  }
}
