//! Freshness policy: when is a cached record good enough to skip revalidation.
//!
//! Two regimes apply:
//! - *standard*: fresh while younger than the record's `ttl`
//! - *strict*: records produced by the user's own actions (`optimistic` /
//!   `sync`) are only fresh for a short window of seconds. Inside that window
//!   they are also *protected*: batch reads must not overwrite them.

use chrono::{DateTime, Utc};
use std::time::Duration;

use super::types::{CachedLikeStatus, Priority};
use crate::clock::elapsed_since;
use crate::config::{CacheSettings, TtlTiers};

#[derive(Debug, Clone)]
pub struct FreshnessPolicy {
  strict_window: Duration,
  tiers: TtlTiers,
}

impl FreshnessPolicy {
  pub fn new(settings: &CacheSettings) -> Self {
    Self {
      strict_window: settings.strict_window(),
      tiers: settings.ttl.clone(),
    }
  }

  /// Standard TTL assigned to a record written under the given priority.
  pub fn ttl_for(&self, priority: Priority) -> Duration {
    self.tiers.for_priority(priority)
  }

  /// Check whether `status` is fresh at `now`.
  ///
  /// `max_age` overrides the record's own `ttl` for the standard regime.
  /// With `strict_for_user_actions`, `optimistic`/`sync` records use the
  /// strict window instead. A record stamped in the future (wall clock
  /// stepped back) is never fresh.
  pub fn is_fresh(
    &self,
    status: &CachedLikeStatus,
    now: DateTime<Utc>,
    max_age: Option<Duration>,
    strict_for_user_actions: bool,
  ) -> bool {
    let Some(age) = elapsed_since(now, status.cached_at) else {
      return false;
    };
    if strict_for_user_actions && status.source.is_user_action() {
      return age < self.strict_window;
    }
    age < max_age.unwrap_or(status.ttl)
  }

  /// A record is protected when it reflects a very recent user action.
  ///
  /// Protected records are used as toggle baselines without a round trip
  /// and are never overwritten by batch or background reads.
  pub fn is_protected(&self, status: &CachedLikeStatus, now: DateTime<Utc>) -> bool {
    status.source.is_user_action() && self.is_fresh(status, now, None, true)
  }
}
