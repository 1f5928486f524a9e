//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::cache::{CacheStore, FreshnessPolicy, LikeStatus};
use crate::clock::ManualClock;
use crate::config::CacheSettings;
use crate::remote::{CheckOptions, CounterService, RemoteStatus, ToggleResponse};
use crate::sync::{BatchReconciler, PendingToggles, Refresher, ToggleEngine};

/// In-memory counter service with scripted failures and gates.
#[derive(Default)]
pub struct FakeCounterService {
  state: Mutex<HashMap<String, LikeStatus>>,
  pub fail_checks: AtomicBool,
  pub fail_batch: AtomicBool,
  pub fail_toggles: AtomicBool,
  reject_toggles: Mutex<Option<String>>,
  /// Returned by the next toggle instead of the flipped server state
  toggle_result: Mutex<Option<LikeStatus>>,
  toggle_gate: Mutex<Option<Arc<Notify>>>,
  batch_gate: Mutex<Option<Arc<Notify>>>,
  /// Signalled when a toggle call reaches the service
  pub toggle_entered: Notify,
  /// Signalled when a batch call reaches the service
  pub batch_entered: Notify,
  pub check_calls: AtomicUsize,
  pub batch_calls: AtomicUsize,
  pub toggle_calls: AtomicUsize,
}

impl FakeCounterService {
  pub fn new() -> Self {
    Self::default()
  }

  /// Set the authoritative server state for an entity.
  pub fn put(&self, entity_id: &str, is_liked: bool, like_count: u64) {
    self
      .state
      .lock()
      .unwrap()
      .insert(entity_id.to_string(), LikeStatus::new(is_liked, like_count));
  }

  pub fn server_state(&self, entity_id: &str) -> Option<LikeStatus> {
    self.state.lock().unwrap().get(entity_id).copied()
  }

  pub fn reject_toggles_with(&self, message: &str) {
    *self.reject_toggles.lock().unwrap() = Some(message.to_string());
  }

  pub fn next_toggle_returns(&self, is_liked: bool, like_count: u64) {
    *self.toggle_result.lock().unwrap() = Some(LikeStatus::new(is_liked, like_count));
  }

  /// Hold toggle calls until the returned handle is notified.
  pub fn gate_toggles(&self) -> Arc<Notify> {
    let gate = Arc::new(Notify::new());
    *self.toggle_gate.lock().unwrap() = Some(Arc::clone(&gate));
    gate
  }

  /// Hold batch calls until the returned handle is notified.
  pub fn gate_batches(&self) -> Arc<Notify> {
    let gate = Arc::new(Notify::new());
    *self.batch_gate.lock().unwrap() = Some(Arc::clone(&gate));
    gate
  }

  fn remote(&self, entity_id: &str) -> Option<RemoteStatus> {
    self
      .server_state(entity_id)
      .map(|status| RemoteStatus {
        entity_id: entity_id.to_string(),
        is_liked: status.is_liked,
        like_count: status.like_count,
      })
  }
}

#[async_trait]
impl CounterService for FakeCounterService {
  async fn check_status(
    &self,
    entity_id: &str,
    _options: CheckOptions,
  ) -> Result<Option<RemoteStatus>> {
    self.check_calls.fetch_add(1, Ordering::SeqCst);
    if self.fail_checks.load(Ordering::SeqCst) {
      return Err(eyre!("status endpoint unreachable"));
    }
    Ok(self.remote(entity_id))
  }

  async fn check_status_batch(&self, entity_ids: &[String]) -> Result<Vec<RemoteStatus>> {
    self.batch_calls.fetch_add(1, Ordering::SeqCst);
    // Snapshot before suspending, like a real request would
    let snapshot: Vec<RemoteStatus> = entity_ids.iter().filter_map(|id| self.remote(id)).collect();
    self.batch_entered.notify_one();

    let gate = self.batch_gate.lock().unwrap().clone();
    if let Some(gate) = gate {
      gate.notified().await;
    }
    if self.fail_batch.load(Ordering::SeqCst) {
      return Err(eyre!("batch endpoint unreachable"));
    }
    Ok(snapshot)
  }

  async fn toggle(&self, entity_id: &str) -> Result<ToggleResponse> {
    self.toggle_calls.fetch_add(1, Ordering::SeqCst);
    self.toggle_entered.notify_one();

    let gate = self.toggle_gate.lock().unwrap().clone();
    if let Some(gate) = gate {
      gate.notified().await;
    }
    if self.fail_toggles.load(Ordering::SeqCst) {
      return Err(eyre!("connection reset"));
    }
    if let Some(message) = self.reject_toggles.lock().unwrap().clone() {
      return Ok(ToggleResponse {
        success: false,
        is_liked: false,
        like_count: 0,
        error: Some(message),
      });
    }

    let next = {
      let mut state = self.state.lock().unwrap();
      let current = state.get(entity_id).copied().unwrap_or_default();
      let next = self
        .toggle_result
        .lock()
        .unwrap()
        .take()
        .unwrap_or_else(|| current.flipped());
      state.insert(entity_id.to_string(), next);
      next
    };

    Ok(ToggleResponse {
      success: true,
      is_liked: next.is_liked,
      like_count: next.like_count,
      error: None,
    })
  }
}

/// A store, pending set, manual clock and fake service wired together.
pub struct Harness {
  pub store: Arc<CacheStore>,
  pub pending: Arc<PendingToggles>,
  pub clock: Arc<ManualClock>,
  pub service: Arc<FakeCounterService>,
  pub settings: CacheSettings,
}

impl Harness {
  pub fn new() -> Self {
    let settings = CacheSettings::default();
    let clock = Arc::new(ManualClock::default());
    let store = Arc::new(CacheStore::new(
      FreshnessPolicy::new(&settings),
      clock.clone(),
    ));
    Self {
      store,
      pending: Arc::new(PendingToggles::new()),
      clock,
      service: Arc::new(FakeCounterService::new()),
      settings,
    }
  }

  pub fn engine(&self) -> ToggleEngine {
    ToggleEngine::new(
      Arc::clone(&self.store),
      self.service.clone(),
      Arc::clone(&self.pending),
      &self.settings,
      Duration::from_secs(5),
    )
  }

  pub fn reconciler(&self) -> BatchReconciler {
    BatchReconciler::new(
      Arc::clone(&self.store),
      self.service.clone(),
      Arc::clone(&self.pending),
    )
  }

  pub fn refresher(&self) -> Refresher {
    Refresher::new(
      Arc::clone(&self.store),
      self.service.clone(),
      Arc::clone(&self.pending),
    )
  }

  /// Record every notification for an entity.
  pub fn record_notifications(
    &self,
    entity_id: &str,
  ) -> (
    crate::cache::Subscription,
    Arc<Mutex<Vec<crate::cache::CachedLikeStatus>>>,
  ) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sub = {
      let seen = Arc::clone(&seen);
      self
        .store
        .subscribe(entity_id, move |r| seen.lock().unwrap().push(r.clone()))
    };
    (sub, seen)
  }
}
