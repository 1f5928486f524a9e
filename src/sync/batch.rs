//! Bulk refresh for list views.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use super::is_stale_background_write;
use super::pending::PendingToggles;
use crate::cache::{CacheStore, Source};
use crate::remote::CounterService;

/// What a reconcile pass did with each requested id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
  /// Distinct ids asked for
  pub requested: usize,
  /// Left alone because they hold a recent user action
  pub skipped_protected: usize,
  /// Written with `source = api`
  pub applied: usize,
  /// Fetched but dropped because a user action landed meanwhile
  pub discarded_stale: usize,
  /// Fetched but absent from the service's answer
  pub missing: usize,
  /// The batch request itself failed; the cache was not touched
  pub fetch_failed: bool,
}

pub struct BatchReconciler {
  store: Arc<CacheStore>,
  service: Arc<dyn CounterService>,
  pending: Arc<PendingToggles>,
}

impl BatchReconciler {
  pub fn new(
    store: Arc<CacheStore>,
    service: Arc<dyn CounterService>,
    pending: Arc<PendingToggles>,
  ) -> Self {
    Self {
      store,
      service,
      pending,
    }
  }

  /// Refresh many entities with one remote call.
  ///
  /// Entities holding a protected record, or with a toggle in flight, are not
  /// requested at all. Results are checked again on arrival, since a toggle
  /// may have started while the request was out.
  pub async fn reconcile<S: AsRef<str>>(&self, entity_ids: &[S]) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    let mut captured: HashMap<String, Option<u64>> = HashMap::new();

    for id in entity_ids.iter().map(AsRef::as_ref) {
      if !seen.insert(id) {
        continue;
      }
      report.requested += 1;
      if self.pending.contains(id) || self.store.is_protected(id) {
        report.skipped_protected += 1;
        continue;
      }
      captured.insert(id.to_string(), self.store.version(id));
      targets.push(id.to_string());
    }

    if targets.is_empty() {
      return report;
    }

    let statuses = match self.service.check_status_batch(&targets).await {
      Ok(statuses) => statuses,
      Err(e) => {
        warn!(count = targets.len(), error = %e, "batch like status fetch failed");
        report.fetch_failed = true;
        return report;
      }
    };

    let mut answered = HashSet::new();
    let mut writes = Vec::new();
    for remote in statuses {
      let Some(&captured_version) = captured.get(&remote.entity_id) else {
        continue;
      };
      if !answered.insert(remote.entity_id.clone()) {
        continue;
      }
      if is_stale_background_write(
        &self.store,
        &self.pending,
        &remote.entity_id,
        captured_version,
      ) {
        debug!(entity_id = %remote.entity_id, "discarding stale batch result");
        report.discarded_stale += 1;
        continue;
      }
      writes.push((remote.entity_id.clone(), remote.status()));
    }

    report.missing = targets.len() - answered.len();
    report.applied = self.store.set_batch(writes, Source::Api).len();
    debug!(?report, "batch reconcile finished");
    report
  }
}
