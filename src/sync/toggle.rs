//! Optimistic like toggles.
//!
//! One toggle runs through: debounce, single-flight claim, baseline
//! acquisition, optimistic write, remote call, then either an authoritative
//! `sync` write or a rollback to the baseline. The cache never ends a toggle
//! holding the optimistic guess.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::pending::PendingToggles;
use crate::cache::{CacheStore, CachedLikeStatus, LikeStatus, Source};
use crate::config::CacheSettings;
use crate::error::ToggleError;
use crate::remote::{CheckOptions, CounterService};

/// Result of a toggle that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
  /// The server confirmed the toggle; this is its authoritative state
  Applied(LikeStatus),
  /// A guard absorbed the call; nothing was written or sent
  Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
  /// Within the debounce window of the previous toggle
  Debounced,
  /// Another toggle for this entity has not finished yet
  InFlight,
}

/// State carried by one toggle between its optimistic write and its
/// reconcile or rollback.
#[derive(Debug, Clone)]
pub struct ToggleOperation {
  pub entity_id: String,
  pub started_at: DateTime<Utc>,
  /// The `is_liked` value the toggle is moving towards
  pub expected_transition: bool,
  pub baseline: CachedLikeStatus,
  /// Store version right after the optimistic write
  pub op_version: u64,
}

pub struct ToggleEngine {
  store: Arc<CacheStore>,
  service: Arc<dyn CounterService>,
  pending: Arc<PendingToggles>,
  debounce: Duration,
  remote_timeout: Duration,
  /// Monotonic start of the last accepted toggle per entity
  last_started: Mutex<HashMap<String, Instant>>,
}

impl ToggleEngine {
  pub fn new(
    store: Arc<CacheStore>,
    service: Arc<dyn CounterService>,
    pending: Arc<PendingToggles>,
    settings: &CacheSettings,
    remote_timeout: Duration,
  ) -> Self {
    Self {
      store,
      service,
      pending,
      debounce: settings.debounce(),
      remote_timeout,
      last_started: Mutex::new(HashMap::new()),
    }
  }

  /// Flip the acting user's like on `entity_id`.
  pub async fn toggle(&self, entity_id: &str) -> Result<ToggleOutcome, ToggleError> {
    let started_at = self.store.now();
    let tick = self.store.monotonic();

    if self.is_debounced(entity_id, tick) {
      debug!(entity_id, "toggle ignored: debounced");
      return Ok(ToggleOutcome::Ignored(IgnoreReason::Debounced));
    }

    let Some(_claim) = self.pending.try_begin(entity_id) else {
      debug!(entity_id, "toggle ignored: already in flight");
      return Ok(ToggleOutcome::Ignored(IgnoreReason::InFlight));
    };

    self.stamp(entity_id, tick);

    // What the user was looking at when they clicked
    let displayed = self.store.get(entity_id);
    let baseline = self.acquire_baseline(entity_id, displayed.as_ref()).await?;

    let predicted = baseline.status().flipped();
    let optimistic = self.store.set(entity_id, predicted, Source::Optimistic);
    let op = ToggleOperation {
      entity_id: entity_id.to_string(),
      started_at,
      expected_transition: predicted.is_liked,
      baseline,
      op_version: optimistic.version,
    };
    debug!(
      entity_id,
      op_version = op.op_version,
      is_liked = predicted.is_liked,
      like_count = predicted.like_count,
      "optimistic write applied"
    );

    let mut rollback = Rollback::arm(&self.store, &op.baseline);
    let message = match tokio::time::timeout(self.remote_timeout, self.service.toggle(entity_id))
      .await
    {
      Ok(Ok(response)) if response.success => {
        rollback.disarm();
        let confirmed = LikeStatus::new(response.is_liked, response.like_count);
        return Ok(ToggleOutcome::Applied(self.confirm(&op, confirmed)));
      }
      Ok(Ok(response)) => response
        .error
        .unwrap_or_else(|| "toggle rejected by server".to_string()),
      Ok(Err(e)) => e.to_string(),
      Err(_) => format!("no response within {:?}", self.remote_timeout),
    };

    let restored = rollback.restore();
    warn!(
      entity_id,
      error = %message,
      restored_version = restored.map(|r| r.version),
      "toggle failed, rolled back to baseline"
    );
    Err(ToggleError::RemoteToggleFailed {
      entity_id: entity_id.to_string(),
      message,
    })
  }

  /// Per-entity debounce, measured on the monotonic clock from the start of
  /// the last accepted toggle.
  fn is_debounced(&self, entity_id: &str, tick: Instant) -> bool {
    self
      .last_started
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .get(entity_id)
      .is_some_and(|last| tick.saturating_duration_since(*last) < self.debounce)
  }

  /// Record an accepted toggle, dropping stamps whose window has passed.
  fn stamp(&self, entity_id: &str, tick: Instant) {
    let mut last_started = self.last_started.lock().unwrap_or_else(|e| e.into_inner());
    last_started.retain(|_, last| tick.saturating_duration_since(*last) < self.debounce);
    last_started.insert(entity_id.to_string(), tick);
  }

  /// Pick the record the optimistic flip is computed from.
  ///
  /// A protected record (the user's own very recent action) is trusted
  /// as-is. Anything else is re-read from the service first; when that read
  /// disagrees with what was displayed, it is read once more.
  async fn acquire_baseline(
    &self,
    entity_id: &str,
    displayed: Option<&CachedLikeStatus>,
  ) -> Result<CachedLikeStatus, ToggleError> {
    if let Some(record) = displayed {
      if self.store.policy().is_protected(record, self.store.now()) {
        return Ok(record.clone());
      }
    }

    let baseline = self.read_baseline(entity_id).await?;
    match displayed {
      Some(seen) if seen.is_liked != baseline.is_liked => {
        debug!(
          entity_id,
          displayed = seen.is_liked,
          server = baseline.is_liked,
          "baseline moved since last render, re-reading once"
        );
        self.read_baseline(entity_id).await
      }
      _ => Ok(baseline),
    }
  }

  /// Forced, silent read-through. The result is written as `api`, so it is
  /// also the state a failed toggle rolls back to.
  async fn read_baseline(&self, entity_id: &str) -> Result<CachedLikeStatus, ToggleError> {
    let read = tokio::time::timeout(
      self.remote_timeout,
      self.service.check_status(entity_id, CheckOptions::baseline()),
    )
    .await;

    let remote = match read {
      Ok(Ok(remote)) => remote,
      Ok(Err(e)) => {
        return Err(ToggleError::BaselineUnavailable {
          entity_id: entity_id.to_string(),
          reason: e.to_string(),
        })
      }
      Err(_) => {
        return Err(ToggleError::BaselineUnavailable {
          entity_id: entity_id.to_string(),
          reason: format!("no response within {:?}", self.remote_timeout),
        })
      }
    };

    // No server-side record yet means nobody has liked it
    let status = remote.map(|r| r.status()).unwrap_or_default();
    Ok(self.store.set(entity_id, status, Source::Api))
  }

  /// Write the server's answer. It wins even when it differs from the
  /// prediction.
  fn confirm(&self, op: &ToggleOperation, confirmed: LikeStatus) -> LikeStatus {
    let current_version = self.store.version(&op.entity_id);
    if current_version != Some(op.op_version) {
      debug!(
        entity_id = %op.entity_id,
        op_version = op.op_version,
        current_version,
        "cache moved during toggle"
      );
    }

    let record = self.store.set(&op.entity_id, confirmed, Source::Sync);
    if confirmed.is_liked != op.expected_transition {
      info!(
        entity_id = %op.entity_id,
        is_liked = confirmed.is_liked,
        "server settled on the opposite state"
      );
    } else if confirmed != op.baseline.status().flipped() {
      debug!(
        entity_id = %op.entity_id,
        like_count = confirmed.like_count,
        "server count differs from prediction"
      );
    }
    info!(
      entity_id = %op.entity_id,
      version = record.version,
      is_liked = record.is_liked,
      like_count = record.like_count,
      "toggle confirmed"
    );
    confirmed
  }
}

/// Restores the baseline unless disarmed, including when the toggle future
/// is dropped mid-flight.
struct Rollback<'a> {
  store: &'a CacheStore,
  baseline: Option<CachedLikeStatus>,
}

impl<'a> Rollback<'a> {
  fn arm(store: &'a CacheStore, baseline: &CachedLikeStatus) -> Self {
    Self {
      store,
      baseline: Some(baseline.clone()),
    }
  }

  fn disarm(&mut self) {
    self.baseline = None;
  }

  fn restore(mut self) -> Option<CachedLikeStatus> {
    self
      .baseline
      .take()
      .map(|baseline| self.store.restore(&baseline))
  }
}

impl Drop for Rollback<'_> {
  fn drop(&mut self) {
    if let Some(baseline) = self.baseline.take() {
      warn!(entity_id = %baseline.entity_id, "toggle abandoned, restoring baseline");
      self.store.restore(&baseline);
    }
  }
}
