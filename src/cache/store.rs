//! In-memory keyed table of like records.
//!
//! Every write stamps `cached_at`, bumps the entity's `version`, assigns a TTL
//! from the entity's priority tier, and fans out through the notification bus
//! before returning. Nothing here blocks on I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::trace;

use super::bus::{NotificationBus, Subscription};
use super::freshness::FreshnessPolicy;
use super::types::{CachedLikeStatus, LikeStatus, Priority, Source};
use crate::clock::{elapsed_since, Clock};

pub struct CacheStore {
  entries: Mutex<HashMap<String, CachedLikeStatus>>,
  /// Last version of each entity dropped by `clear`, so versions keep
  /// increasing across it
  cleared_versions: Mutex<HashMap<String, u64>>,
  priorities: Mutex<HashMap<String, Priority>>,
  bus: NotificationBus,
  policy: FreshnessPolicy,
  clock: Arc<dyn Clock>,
}

impl CacheStore {
  pub fn new(policy: FreshnessPolicy, clock: Arc<dyn Clock>) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      cleared_versions: Mutex::new(HashMap::new()),
      priorities: Mutex::new(HashMap::new()),
      bus: NotificationBus::new(),
      policy,
      clock,
    }
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<String, CachedLikeStatus>> {
    self.entries.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Lowest version an entity without a live record may be written at.
  /// Lock order: entries, then cleared versions.
  fn version_floor(&self, entity_id: &str) -> u64 {
    self
      .cleared_versions
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .get(entity_id)
      .map_or(1, |v| v + 1)
  }

  pub fn policy(&self) -> &FreshnessPolicy {
    &self.policy
  }

  pub fn now(&self) -> DateTime<Utc> {
    self.clock.now()
  }

  pub fn monotonic(&self) -> Instant {
    self.clock.monotonic()
  }

  pub fn get(&self, entity_id: &str) -> Option<CachedLikeStatus> {
    self.entries().get(entity_id).cloned()
  }

  /// Present entries only; missing ids are simply absent from the map.
  pub fn get_batch<S: AsRef<str>>(&self, entity_ids: &[S]) -> HashMap<String, CachedLikeStatus> {
    let entries = self.entries();
    entity_ids
      .iter()
      .filter_map(|id| entries.get(id.as_ref()))
      .map(|record| (record.entity_id.clone(), record.clone()))
      .collect()
  }

  /// Current version of an entity, `None` if it was never written.
  pub fn version(&self, entity_id: &str) -> Option<u64> {
    self.entries().get(entity_id).map(|r| r.version)
  }

  /// Time since the last write to an entity. Zero for a record stamped
  /// ahead of the current wall clock.
  pub fn age(&self, entity_id: &str) -> Option<Duration> {
    let cached_at = self.entries().get(entity_id)?.cached_at;
    Some(elapsed_since(self.now(), cached_at).unwrap_or(Duration::ZERO))
  }

  /// Whether the entity currently holds a very recent user-action record.
  pub fn is_protected(&self, entity_id: &str) -> bool {
    let now = self.now();
    self
      .get(entity_id)
      .is_some_and(|record| self.policy.is_protected(&record, now))
  }

  pub fn set_priority(&self, entity_id: &str, priority: Priority) {
    self
      .priorities
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .insert(entity_id.to_string(), priority);
  }

  pub fn priority(&self, entity_id: &str) -> Priority {
    self
      .priorities
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .get(entity_id)
      .copied()
      .unwrap_or_default()
  }

  /// Write a new value for an entity and notify its subscribers.
  pub fn set(&self, entity_id: &str, status: LikeStatus, source: Source) -> CachedLikeStatus {
    let ttl = self.policy.ttl_for(self.priority(entity_id));
    let record = {
      let mut entries = self.entries();
      let version = match entries.get(entity_id) {
        Some(current) => current.version + 1,
        None => self.version_floor(entity_id),
      };
      let record = CachedLikeStatus {
        entity_id: entity_id.to_string(),
        is_liked: status.is_liked,
        like_count: status.like_count,
        cached_at: self.now(),
        ttl,
        source,
        version,
      };
      entries.insert(entity_id.to_string(), record.clone());
      record
    };

    trace!(entity_id, version = record.version, source = %source, "cache write");
    self.bus.notify(&record);
    record
  }

  /// Write many entities with the same source. Each write notifies
  /// independently.
  pub fn set_batch<I>(&self, statuses: I, source: Source) -> Vec<CachedLikeStatus>
  where
    I: IntoIterator<Item = (String, LikeStatus)>,
  {
    statuses
      .into_iter()
      .map(|(entity_id, status)| self.set(&entity_id, status, source))
      .collect()
  }

  /// Put a previously observed record back, keeping its `cached_at`, `ttl`
  /// and `source`. The version still advances so in-flight reads that
  /// captured the intermediate state are recognised as stale.
  pub fn restore(&self, previous: &CachedLikeStatus) -> CachedLikeStatus {
    let record = {
      let mut entries = self.entries();
      let version = match entries.get(&previous.entity_id) {
        Some(current) => current.version + 1,
        None => (previous.version + 1).max(self.version_floor(&previous.entity_id)),
      };
      let record = CachedLikeStatus {
        version,
        ..previous.clone()
      };
      entries.insert(previous.entity_id.clone(), record.clone());
      record
    };

    trace!(entity_id = %record.entity_id, version = record.version, "cache restore");
    self.bus.notify(&record);
    record
  }

  /// Seed records loaded from durable storage. Entities already present in
  /// memory are newer and are left alone. Returns the number seeded.
  pub fn load<I>(&self, records: I) -> usize
  where
    I: IntoIterator<Item = CachedLikeStatus>,
  {
    let mut seeded = Vec::new();
    {
      let mut entries = self.entries();
      for mut record in records {
        if entries.contains_key(&record.entity_id) {
          continue;
        }
        record.version = record.version.max(self.version_floor(&record.entity_id));
        entries.insert(record.entity_id.clone(), record.clone());
        seeded.push(record);
      }
    }

    for record in &seeded {
      self.bus.notify(record);
    }
    seeded.len()
  }

  /// All records currently held.
  pub fn snapshot(&self) -> Vec<CachedLikeStatus> {
    let mut records: Vec<CachedLikeStatus> = self.entries().values().cloned().collect();
    records.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
    records
  }

  pub fn len(&self) -> usize {
    self.entries().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries().is_empty()
  }

  /// Drop every record, e.g. when the acting user changes. Subscribers stay
  /// registered and receive the next write, whose version continues from
  /// the dropped record's.
  pub fn clear(&self) {
    let mut entries = self.entries();
    let mut cleared = self
      .cleared_versions
      .lock()
      .unwrap_or_else(|e| e.into_inner());
    for (entity_id, record) in entries.drain() {
      let floor = cleared.entry(entity_id).or_default();
      *floor = (*floor).max(record.version);
    }
  }

  pub fn subscribe<F>(&self, entity_id: &str, callback: F) -> Subscription
  where
    F: Fn(&CachedLikeStatus) + Send + Sync + 'static,
  {
    self.bus.subscribe(entity_id, callback)
  }

  pub fn bus(&self) -> &NotificationBus {
    &self.bus
  }
}
