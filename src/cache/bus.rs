//! Per-entity subscriber registry.
//!
//! Every write to the cache store fans out through here, so sibling widgets
//! rendering the same entity always show the same value without re-querying
//! the network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::trace;

use super::types::CachedLikeStatus;

/// Callback invoked with the new record after every write to its entity.
pub type Callback = Arc<dyn Fn(&CachedLikeStatus) + Send + Sync>;

struct Subscriber {
  id: u64,
  active: Arc<AtomicBool>,
  callback: Callback,
}

/// Per-entity delivery state. At most one thread delivers for an entity at a
/// time; writes arriving meanwhile are queued and drained by that thread.
#[derive(Default)]
struct Dispatch {
  /// Highest version handed to subscribers so far
  delivered: u64,
  running: bool,
  queue: VecDeque<CachedLikeStatus>,
}

impl Dispatch {
  /// Next queued record newer than anything delivered.
  fn next(&mut self) -> Option<CachedLikeStatus> {
    while let Some(record) = self.queue.pop_front() {
      if record.version > self.delivered {
        self.delivered = record.version;
        return Some(record);
      }
    }
    None
  }
}

#[derive(Default)]
struct BusInner {
  next_id: AtomicU64,
  subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
  dispatch: Mutex<HashMap<String, Dispatch>>,
}

impl BusInner {
  fn dispatch(&self) -> MutexGuard<'_, HashMap<String, Dispatch>> {
    self.dispatch.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn remove(&self, entity_id: &str, subscriber_id: u64) {
    let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(list) = subscribers.get_mut(entity_id) {
      list.retain(|s| s.id != subscriber_id);
      if list.is_empty() {
        subscribers.remove(entity_id);
      }
    }
  }
}

#[derive(Clone, Default)]
pub struct NotificationBus {
  inner: Arc<BusInner>,
}

impl NotificationBus {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `callback` for writes to `entity_id`.
  ///
  /// Callbacks run in subscription order. The returned handle unsubscribes
  /// when dropped or when [`Subscription::unsubscribe`] is called.
  pub fn subscribe<F>(&self, entity_id: &str, callback: F) -> Subscription
  where
    F: Fn(&CachedLikeStatus) + Send + Sync + 'static,
  {
    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
    let active = Arc::new(AtomicBool::new(true));

    self
      .inner
      .subscribers
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .entry(entity_id.to_string())
      .or_default()
      .push(Subscriber {
        id,
        active: Arc::clone(&active),
        callback: Arc::new(callback),
      });

    Subscription {
      bus: Arc::downgrade(&self.inner),
      entity_id: entity_id.to_string(),
      id,
      active,
    }
  }

  /// Deliver `status` to every current subscriber of its entity.
  ///
  /// Subscribers see an entity's writes in version order. A record older
  /// than one already delivered is dropped. When another thread is
  /// delivering for the same entity, or a callback writes to the entity it
  /// is being notified about, the record is queued and delivered right after
  /// the current one.
  ///
  /// The registry lock is released before any callback runs, so callbacks
  /// may subscribe or unsubscribe freely. A subscriber removed by an earlier
  /// callback in the same dispatch is skipped.
  pub fn notify(&self, status: &CachedLikeStatus) {
    {
      let mut dispatch = self.inner.dispatch();
      let slot = dispatch.entry(status.entity_id.clone()).or_default();
      if slot.running {
        slot.queue.push_back(status.clone());
        return;
      }
      if status.version <= slot.delivered {
        trace!(
          entity_id = %status.entity_id,
          version = status.version,
          delivered = slot.delivered,
          "dropping superseded notification"
        );
        return;
      }
      slot.delivered = status.version;
      slot.running = true;
    }

    let mut turn = Turn {
      inner: &self.inner,
      entity_id: &status.entity_id,
      armed: true,
    };
    let mut next = Some(status.clone());
    while let Some(record) = next {
      self.deliver(&record);
      let mut dispatch = self.inner.dispatch();
      let slot = dispatch.entry(record.entity_id.clone()).or_default();
      next = slot.next();
      if next.is_none() {
        slot.running = false;
        turn.armed = false;
      }
    }
  }

  fn deliver(&self, status: &CachedLikeStatus) {
    let targets: Vec<(Arc<AtomicBool>, Callback)> = {
      let subscribers = self
        .inner
        .subscribers
        .lock()
        .unwrap_or_else(|e| e.into_inner());
      match subscribers.get(&status.entity_id) {
        Some(list) => list
          .iter()
          .map(|s| (Arc::clone(&s.active), Arc::clone(&s.callback)))
          .collect(),
        None => return,
      }
    };

    trace!(
      entity_id = %status.entity_id,
      version = status.version,
      subscribers = targets.len(),
      "fan-out"
    );

    for (active, callback) in targets {
      if active.load(Ordering::Acquire) {
        callback(status);
      }
    }
  }

  /// Number of live subscribers for an entity.
  pub fn subscriber_count(&self, entity_id: &str) -> usize {
    self
      .inner
      .subscribers
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .get(entity_id)
      .map_or(0, Vec::len)
  }
}

/// Releases an entity's delivery turn if a callback panics mid-dispatch.
struct Turn<'a> {
  inner: &'a BusInner,
  entity_id: &'a str,
  armed: bool,
}

impl Drop for Turn<'_> {
  fn drop(&mut self) {
    if self.armed {
      if let Some(slot) = self.inner.dispatch().get_mut(self.entity_id) {
        slot.running = false;
        slot.queue.clear();
      }
    }
  }
}

/// Handle to a registered callback.
#[must_use = "dropping a Subscription unsubscribes it immediately"]
pub struct Subscription {
  bus: Weak<BusInner>,
  entity_id: String,
  id: u64,
  active: Arc<AtomicBool>,
}

impl Subscription {
  /// Stop receiving notifications. Safe to call repeatedly.
  pub fn unsubscribe(&self) {
    if !self.active.swap(false, Ordering::AcqRel) {
      return;
    }
    if let Some(bus) = self.bus.upgrade() {
      bus.remove(&self.entity_id, self.id);
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.unsubscribe();
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("entity_id", &self.entity_id)
      .field("id", &self.id)
      .field("active", &self.active.load(Ordering::Relaxed))
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::Source;
  use chrono::Utc;
  use std::time::Duration;

  /// Record whose version equals its count, to keep ordering tests short.
  fn record(entity_id: &str, like_count: u64) -> CachedLikeStatus {
    CachedLikeStatus {
      entity_id: entity_id.to_string(),
      is_liked: false,
      like_count,
      cached_at: Utc::now(),
      ttl: Duration::from_secs(60),
      source: Source::Api,
      version: like_count,
    }
  }

  #[test]
  fn test_notifies_in_subscription_order() {
    let bus = NotificationBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let first = {
      let seen = Arc::clone(&seen);
      bus.subscribe("a", move |s| seen.lock().unwrap().push(("first", s.like_count)))
    };
    let second = {
      let seen = Arc::clone(&seen);
      bus.subscribe("a", move |s| seen.lock().unwrap().push(("second", s.like_count)))
    };

    bus.notify(&record("a", 7));
    bus.notify(&record("b", 9));

    assert_eq!(*seen.lock().unwrap(), vec![("first", 7), ("second", 7)]);
    drop((first, second));
  }

  #[test]
  fn test_unsubscribe_is_idempotent() {
    let bus = NotificationBus::new();
    let sub = bus.subscribe("a", |_| {});
    assert_eq!(bus.subscriber_count("a"), 1);

    sub.unsubscribe();
    sub.unsubscribe();
    drop(sub);
    assert_eq!(bus.subscriber_count("a"), 0);
  }

  #[test]
  fn test_unsubscribe_from_inside_callback() {
    let bus = NotificationBus::new();
    let calls = Arc::new(AtomicU64::new(0));
    let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

    let sub = {
      let calls = Arc::clone(&calls);
      let slot = Arc::clone(&slot);
      bus.subscribe("a", move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        if let Some(sub) = slot.lock().unwrap().as_ref() {
          sub.unsubscribe();
        }
      })
    };
    *slot.lock().unwrap() = Some(sub);

    bus.notify(&record("a", 1));
    bus.notify(&record("a", 2));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(bus.subscriber_count("a"), 0);
  }

  #[test]
  fn test_sibling_removed_mid_dispatch_is_skipped() {
    let bus = NotificationBus::new();
    let later_calls = Arc::new(AtomicU64::new(0));
    let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

    let _killer = {
      let slot = Arc::clone(&slot);
      bus.subscribe("a", move |_| {
        if let Some(sub) = slot.lock().unwrap().take() {
          sub.unsubscribe();
        }
      })
    };
    let victim = {
      let later_calls = Arc::clone(&later_calls);
      bus.subscribe("a", move |_| {
        later_calls.fetch_add(1, Ordering::SeqCst);
      })
    };
    *slot.lock().unwrap() = Some(victim);

    bus.notify(&record("a", 1));
    assert_eq!(later_calls.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn test_superseded_notification_is_dropped() {
    let bus = NotificationBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let _sub = {
      let seen = Arc::clone(&seen);
      bus.subscribe("a", move |s| seen.lock().unwrap().push(s.version))
    };

    bus.notify(&record("a", 3));
    bus.notify(&record("a", 2));
    bus.notify(&record("a", 4));

    assert_eq!(*seen.lock().unwrap(), vec![3, 4]);
  }

  #[test]
  fn test_write_from_callback_is_delivered_after_current() {
    let bus = NotificationBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let _writer = {
      let inner_bus = bus.clone();
      let seen = Arc::clone(&seen);
      bus.subscribe("a", move |s| {
        seen.lock().unwrap().push(("writer", s.version));
        if s.version == 1 {
          inner_bus.notify(&record("a", 2));
        }
      })
    };
    let _reader = {
      let seen = Arc::clone(&seen);
      bus.subscribe("a", move |s| seen.lock().unwrap().push(("reader", s.version)))
    };

    bus.notify(&record("a", 1));

    assert_eq!(
      *seen.lock().unwrap(),
      vec![("writer", 1), ("reader", 1), ("writer", 2), ("reader", 2)]
    );
  }

  #[test]
  fn test_concurrent_notifiers_deliver_in_version_order() {
    let bus = NotificationBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let _sub = {
      let seen = Arc::clone(&seen);
      bus.subscribe("a", move |s| seen.lock().unwrap().push(s.version))
    };

    let handles: Vec<_> = (0..4u64)
      .map(|t| {
        let bus = bus.clone();
        std::thread::spawn(move || {
          for i in 0..200u64 {
            bus.notify(&record("a", i * 4 + t + 1));
          }
        })
      })
      .collect();
    for handle in handles {
      handle.join().unwrap();
    }

    let seen = seen.lock().unwrap();
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(seen.last(), Some(&800));
  }

  #[test]
  fn test_subscription_outlives_bus() {
    let bus = NotificationBus::new();
    let sub = bus.subscribe("a", |_| {});
    drop(bus);
    sub.unsubscribe();
  }
}
