//! The like cache handle given to every presentation adapter.
//!
//! One `LikeCache` is shared per process (it is cheap to clone). All widgets
//! showing the same entity read and subscribe through it, which is what keeps
//! them identical.

use color_eyre::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::cache::{
  namespace_for, CacheResult, CacheStorage, CacheStore, CachedLikeStatus, FreshnessPolicy,
  NoopStorage, Priority, Subscription,
};
use crate::clock::{Clock, SystemClock};
use crate::config::{CacheSettings, Config};
use crate::error::ToggleError;
use crate::remote::CounterService;
use crate::sync::{
  BatchReconciler, PendingToggles, ReconcileReport, Refresher, ToggleEngine, ToggleOutcome,
};

#[derive(Clone)]
pub struct LikeCache {
  store: Arc<CacheStore>,
  engine: Arc<ToggleEngine>,
  reconciler: Arc<BatchReconciler>,
  refresher: Arc<Refresher>,
  storage: Arc<dyn CacheStorage>,
  namespace: String,
}

impl LikeCache {
  pub fn builder(service: Arc<dyn CounterService>) -> LikeCacheBuilder {
    LikeCacheBuilder::new(service)
  }

  /// Current cached record, if any. Never touches the network.
  pub fn get(&self, entity_id: &str) -> Option<CachedLikeStatus> {
    self.store.get(entity_id)
  }

  pub fn get_batch<S: AsRef<str>>(&self, entity_ids: &[S]) -> HashMap<String, CachedLikeStatus> {
    self.store.get_batch(entity_ids)
  }

  /// Receive every future write to `entity_id`.
  pub fn subscribe<F>(&self, entity_id: &str, callback: F) -> Subscription
  where
    F: Fn(&CachedLikeStatus) + Send + Sync + 'static,
  {
    self.store.subscribe(entity_id, callback)
  }

  /// Read-through for one entity, falling back to the cache when offline.
  pub async fn fetch(&self, entity_id: &str) -> Result<CacheResult<CachedLikeStatus>> {
    self.refresher.fetch(entity_id).await
  }

  pub async fn toggle(&self, entity_id: &str) -> Result<ToggleOutcome, ToggleError> {
    self.engine.toggle(entity_id).await
  }

  /// Refresh many entities at once, e.g. when a list view loads.
  pub async fn reconcile_batch<S: AsRef<str>>(&self, entity_ids: &[S]) -> ReconcileReport {
    self.reconciler.reconcile(entity_ids).await
  }

  /// TTL tier used for the next write to `entity_id`.
  pub fn set_priority(&self, entity_id: &str, priority: Priority) {
    self.store.set_priority(entity_id, priority);
  }

  /// Ids that are absent from the cache or due for revalidation.
  pub fn stale_ids<S: AsRef<str>>(&self, entity_ids: &[S]) -> Vec<String> {
    let now = self.store.now();
    let policy = self.store.policy();
    entity_ids
      .iter()
      .map(AsRef::as_ref)
      .filter(|id| {
        self
          .store
          .get(id)
          .map_or(true, |record| !policy.is_fresh(&record, now, None, true))
      })
      .map(String::from)
      .collect()
  }

  /// All cached records, ordered by entity id.
  pub fn snapshot(&self) -> Vec<CachedLikeStatus> {
    self.store.snapshot()
  }

  /// Save every record to durable storage.
  pub fn persist(&self) -> Result<usize> {
    let records = self.store.snapshot();
    self.storage.save(&self.namespace, &records)?;
    debug!(count = records.len(), "like cache persisted");
    Ok(records.len())
  }

  /// Seed the cache from durable storage. Records already in memory win.
  pub fn restore(&self) -> Result<usize> {
    let records = self.storage.load(&self.namespace)?;
    let seeded = self.store.load(records);
    debug!(count = seeded, "like cache restored");
    Ok(seeded)
  }

  /// Forget everything, in memory and on disk. Use when the acting user
  /// changes.
  pub fn clear(&self) -> Result<()> {
    self.store.clear();
    self.storage.clear(&self.namespace)?;
    info!("like cache cleared");
    Ok(())
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }
}

pub struct LikeCacheBuilder {
  service: Arc<dyn CounterService>,
  settings: CacheSettings,
  remote_timeout: Duration,
  clock: Arc<dyn Clock>,
  storage: Arc<dyn CacheStorage>,
  namespace: String,
}

impl LikeCacheBuilder {
  fn new(service: Arc<dyn CounterService>) -> Self {
    let config = Config::default();
    Self {
      service,
      settings: config.cache,
      remote_timeout: config.service.timeout(),
      clock: Arc::new(SystemClock),
      storage: Arc::new(NoopStorage),
      namespace: namespace_for(&config.service.url, None),
    }
  }

  /// Take tunables, the remote timeout and the storage namespace from
  /// `config`.
  pub fn config(mut self, config: &Config) -> Self {
    self.settings = config.cache.clone();
    self.remote_timeout = config.service.timeout();
    self.namespace = namespace_for(&config.service.url, config.service.user.as_deref());
    self
  }

  pub fn settings(mut self, settings: CacheSettings) -> Self {
    self.settings = settings;
    self
  }

  pub fn remote_timeout(mut self, timeout: Duration) -> Self {
    self.remote_timeout = timeout;
    self
  }

  pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn storage(mut self, storage: Arc<dyn CacheStorage>) -> Self {
    self.storage = storage;
    self
  }

  pub fn build(self) -> LikeCache {
    let store = Arc::new(CacheStore::new(
      FreshnessPolicy::new(&self.settings),
      self.clock,
    ));
    let pending = Arc::new(PendingToggles::new());

    let engine = ToggleEngine::new(
      Arc::clone(&store),
      Arc::clone(&self.service),
      Arc::clone(&pending),
      &self.settings,
      self.remote_timeout,
    );
    let reconciler = BatchReconciler::new(
      Arc::clone(&store),
      Arc::clone(&self.service),
      Arc::clone(&pending),
    );
    let refresher = Refresher::new(Arc::clone(&store), self.service, pending);

    LikeCache {
      store,
      engine: Arc::new(engine),
      reconciler: Arc::new(reconciler),
      refresher: Arc::new(refresher),
      storage: self.storage,
      namespace: self.namespace,
    }
  }
}
