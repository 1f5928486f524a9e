//! Single-entity read-through with cache-then-revalidate semantics.

use color_eyre::Result;
use std::sync::Arc;

use tracing::debug;

use super::is_stale_background_write;
use super::pending::PendingToggles;
use crate::cache::{CacheResult, CacheStore, CachedLikeStatus, LikeStatus, Source};
use crate::remote::{CheckOptions, CounterService};

pub struct Refresher {
  store: Arc<CacheStore>,
  service: Arc<dyn CounterService>,
  pending: Arc<PendingToggles>,
}

impl Refresher {
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

  /// Fetch one entity with caching.
  ///
  /// 1. Fresh cache (strict regime for user actions) - return immediately
  /// 2. Toggle in flight - return the cached value, the toggle will settle it
  /// 3. Otherwise read from the service and write as `api`, unless a user
  ///    action landed meanwhile
  /// 4. On network failure, serve the stale cache (offline mode)
  pub async fn fetch(&self, entity_id: &str) -> Result<CacheResult<CachedLikeStatus>> {
    let cached = self.store.get(entity_id);
    if let Some(record) = &cached {
      let fresh = self
        .store
        .policy()
        .is_fresh(record, self.store.now(), None, true);
      if fresh || self.pending.contains(entity_id) {
        return Ok(CacheResult::from_cache(record.clone()));
      }
    }

    let captured_version = cached.as_ref().map(|r| r.version);
    match self
      .service
      .check_status(entity_id, CheckOptions::background())
      .await
    {
      Ok(remote) => {
        let status = remote.map(|r| r.status()).unwrap_or_default();
        if is_stale_background_write(&self.store, &self.pending, entity_id, captured_version) {
          debug!(entity_id, "discarding stale read-through result");
          return Ok(match self.store.get(entity_id) {
            Some(current) => CacheResult::from_cache(current),
            // A toggle started on an uncached entity: answer without writing
            None => CacheResult::from_network(self.unstored(entity_id, status)),
          });
        }
        let record = self.store.set(entity_id, status, Source::Api);
        Ok(CacheResult::from_network(record))
      }
      Err(e) => match self.store.get(entity_id) {
        Some(record) => {
          debug!(entity_id, error = %e, "serving cached like status offline");
          Ok(CacheResult::offline(record))
        }
        None => Err(e),
      },
    }
  }

  /// A record for the caller only. Version 0 marks it as never stored.
  fn unstored(&self, entity_id: &str, status: LikeStatus) -> CachedLikeStatus {
    CachedLikeStatus {
      entity_id: entity_id.to_string(),
      is_liked: status.is_liked,
      like_count: status.like_count,
      cached_at: self.store.now(),
      ttl: self.store.policy().ttl_for(self.store.priority(entity_id)),
      source: Source::Api,
      version: 0,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::Origin;
  use crate::testing::Harness;
  use std::sync::atomic::Ordering;
  use std::time::Duration;

  #[tokio::test]
  async fn test_fresh_cache_skips_network() {
    let h = Harness::new();
    h.store.set("a", LikeStatus::new(true, 2), Source::Api);

    let result = h.refresher().fetch("a").await.unwrap();

    assert_eq!(result.origin, Origin::CacheFresh);
    assert_eq!(h.service.check_calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_stale_cache_revalidates() {
    let h = Harness::new();
    h.store.set("a", LikeStatus::new(true, 2), Source::Api);
    h.clock.advance(Duration::from_secs(301));
    h.service.put("a", true, 5);

    let result = h.refresher().fetch("a").await.unwrap();

    assert_eq!(result.origin, Origin::Network);
    assert_eq!(result.data.status(), LikeStatus::new(true, 5));
    assert_eq!(result.data.version, 2);
  }

  #[tokio::test]
  async fn test_unknown_entity_reads_as_zero() {
    let h = Harness::new();
    let result = h.refresher().fetch("new-post").await.unwrap();
    assert_eq!(result.data.status(), LikeStatus::default());
  }

  #[tokio::test]
  async fn test_network_failure_serves_stale_cache() {
    let h = Harness::new();
    h.store.set("a", LikeStatus::new(false, 4), Source::Api);
    h.clock.advance(Duration::from_secs(600));
    h.service.fail_checks.store(true, Ordering::SeqCst);

    let result = h.refresher().fetch("a").await.unwrap();
    assert_eq!(result.origin, Origin::Offline);
    assert_eq!(result.data.like_count, 4);

    assert!(h.refresher().fetch("never-seen").await.is_err());
  }

  #[tokio::test]
  async fn test_in_flight_toggle_short_circuits() {
    let h = Harness::new();
    h.store.set("a", LikeStatus::new(true, 1), Source::Api);
    h.clock.advance(Duration::from_secs(600));
    let _claim = h.pending.try_begin("a").unwrap();

    let result = h.refresher().fetch("a").await.unwrap();

    assert_eq!(result.origin, Origin::CacheFresh);
    assert_eq!(h.service.check_calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_read_racing_toggle_on_uncached_entity_writes_nothing() {
    let h = Harness::new();
    h.service.put("a", true, 8);
    let _claim = h.pending.try_begin("a").unwrap();
    let (_sub, seen) = h.record_notifications("a");

    let result = h.refresher().fetch("a").await.unwrap();

    assert_eq!(result.origin, Origin::Network);
    assert_eq!(result.data.status(), LikeStatus::new(true, 8));
    assert_eq!(result.data.version, 0);
    assert!(h.store.get("a").is_none());
    assert!(seen.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_strict_regime_revalidates_old_user_action() {
    let h = Harness::new();
    h.store.set("a", LikeStatus::new(true, 1), Source::Sync);
    h.clock.advance(Duration::from_secs(10));
    h.service.put("a", true, 2);

    let result = h.refresher().fetch("a").await.unwrap();

    assert_eq!(result.origin, Origin::Network);
    assert_eq!(result.data.like_count, 2);
  }
}
