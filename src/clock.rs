//! Time source used by freshness checks and the debounce window.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;
use std::time::Instant;

pub trait Clock: Send + Sync {
  /// Wall-clock time, stamped on records. May jump in either direction.
  fn now(&self) -> DateTime<Utc>;

  /// Monotonic reading for short in-process windows such as the debounce.
  fn monotonic(&self) -> Instant;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }

  fn monotonic(&self) -> Instant {
    Instant::now()
  }
}

/// Clock that only moves when told to.
///
/// Lets hosts and tests drive freshness windows deterministically.
/// `advance` moves both readings; `set` only moves the wall clock, the way
/// an NTP step would.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
  origin: Instant,
  ticked: Mutex<std::time::Duration>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Mutex::new(start),
      origin: Instant::now(),
      ticked: Mutex::new(std::time::Duration::ZERO),
    }
  }

  /// Move the clock forward by `by`.
  pub fn advance(&self, by: std::time::Duration) {
    let delta = Duration::from_std(by).unwrap_or(Duration::zero());
    *self.now.lock().unwrap_or_else(|e| e.into_inner()) += delta;
    *self.ticked.lock().unwrap_or_else(|e| e.into_inner()) += by;
  }

  /// Jump the wall clock to `to`, forwards or backwards.
  pub fn set(&self, to: DateTime<Utc>) {
    *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new(Utc::now())
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn monotonic(&self) -> Instant {
    self.origin + *self.ticked.lock().unwrap_or_else(|e| e.into_inner())
  }
}

/// Elapsed time from `earlier` to `now`.
///
/// `None` when `earlier` lies in the future, i.e. the wall clock stepped
/// back after it was stamped. Callers treat that as an expired window.
pub fn elapsed_since(now: DateTime<Utc>, earlier: DateTime<Utc>) -> Option<std::time::Duration> {
  (now - earlier).to_std().ok()
}
