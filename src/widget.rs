//! Headless presentation adapter for one like button.
//!
//! A `LikeWidget` owns the per-widget view state the rendering layer draws
//! from. Cache notifications and toggle results arrive on channels and are
//! folded into the state by [`LikeWidget::poll`], called from the host's
//! event loop tick.
//!
//! # Example
//!
//! ```ignore
//! let mut widget = LikeWidget::mount(cache.clone(), "post-42", Priority::High);
//!
//! // On click
//! widget.click();
//!
//! // In event loop tick
//! if widget.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! match widget.state() {
//!     WidgetState::Loading => render_placeholder(),
//!     WidgetState::Ready(status) => render_button(status.is_liked, status.like_count),
//! }
//! ```

use tokio::sync::mpsc;
use tracing::debug;

use crate::cache::{CachedLikeStatus, LikeStatus, Priority, Subscription};
use crate::error::ToggleError;
use crate::likes::LikeCache;
use crate::sync::ToggleOutcome;

/// What the widget can currently draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetState {
  /// Nothing cached yet, first read in progress
  Loading,
  Ready(LikeStatus),
}

enum WidgetMessage {
  Loaded(Result<CachedLikeStatus, String>),
  Toggled(Result<ToggleOutcome, ToggleError>),
}

pub struct LikeWidget {
  cache: LikeCache,
  entity_id: String,
  state: WidgetState,
  /// Version of the record currently shown
  shown_version: u64,
  error: Option<String>,
  /// Clicks whose toggle call has not reported back yet
  toggles_in_flight: usize,
  updates: mpsc::UnboundedReceiver<CachedLikeStatus>,
  messages_tx: mpsc::UnboundedSender<WidgetMessage>,
  messages: mpsc::UnboundedReceiver<WidgetMessage>,
  subscription: Subscription,
}

impl LikeWidget {
  /// Mount a widget for `entity_id`.
  ///
  /// Shows the cached value right away when there is one (even if stale) and
  /// starts a background read-through when it is absent or due.
  pub fn mount(cache: LikeCache, entity_id: &str, priority: Priority) -> Self {
    cache.set_priority(entity_id, priority);

    let (updates_tx, updates) = mpsc::unbounded_channel();
    let subscription = cache.subscribe(entity_id, move |record| {
      // Ignore send errors - the widget may have been dropped
      let _ = updates_tx.send(record.clone());
    });
    let (messages_tx, messages) = mpsc::unbounded_channel();

    let mut widget = Self {
      cache,
      entity_id: entity_id.to_string(),
      state: WidgetState::Loading,
      shown_version: 0,
      error: None,
      toggles_in_flight: 0,
      updates,
      messages_tx,
      messages,
      subscription,
    };

    if let Some(record) = widget.cache.get(entity_id) {
      widget.show(&record);
    }
    if !widget.cache.stale_ids(&[entity_id]).is_empty() {
      widget.spawn_fetch();
    }
    widget
  }

  pub fn entity_id(&self) -> &str {
    &self.entity_id
  }

  pub fn state(&self) -> WidgetState {
    self.state
  }

  pub fn status(&self) -> Option<LikeStatus> {
    match self.state {
      WidgetState::Ready(status) => Some(status),
      WidgetState::Loading => None,
    }
  }

  /// Message from the last failed read or toggle, cleared by the next
  /// successful one.
  pub fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }

  /// Whether a toggle started by this widget is still running.
  pub fn is_toggling(&self) -> bool {
    self.toggles_in_flight > 0
  }

  /// Start a toggle. Guards in the toggle engine absorb repeated clicks.
  pub fn click(&mut self) {
    self.toggles_in_flight += 1;
    let cache = self.cache.clone();
    let entity_id = self.entity_id.clone();
    let tx = self.messages_tx.clone();
    tokio::spawn(async move {
      let result = cache.toggle(&entity_id).await;
      let _ = tx.send(WidgetMessage::Toggled(result));
    });
  }

  /// Re-read from the service unless the cache is still fresh.
  pub fn refresh(&mut self) {
    self.spawn_fetch();
  }

  /// Fold pending notifications and results into the widget state.
  ///
  /// Returns `true` if anything visible changed.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;

    while let Ok(record) = self.updates.try_recv() {
      changed |= self.show(&record);
    }

    while let Ok(message) = self.messages.try_recv() {
      match message {
        WidgetMessage::Loaded(Ok(record)) => {
          changed |= self.show(&record);
          changed |= self.error.take().is_some();
        }
        WidgetMessage::Loaded(Err(e)) => {
          self.error = Some(e);
          changed = true;
        }
        WidgetMessage::Toggled(result) => {
          self.toggles_in_flight = self.toggles_in_flight.saturating_sub(1);
          match result {
            Ok(ToggleOutcome::Applied(_)) => {
              changed |= self.error.take().is_some();
            }
            Ok(ToggleOutcome::Ignored(reason)) => {
              debug!(entity_id = %self.entity_id, ?reason, "click absorbed");
            }
            Err(e) => {
              self.error = Some(e.to_string());
              changed = true;
            }
          }
        }
      }
    }

    changed
  }

  fn spawn_fetch(&self) {
    let cache = self.cache.clone();
    let entity_id = self.entity_id.clone();
    let tx = self.messages_tx.clone();
    tokio::spawn(async move {
      let result = cache
        .fetch(&entity_id)
        .await
        .map(|r| r.data)
        .map_err(|e| e.to_string());
      let _ = tx.send(WidgetMessage::Loaded(result));
    });
  }

  /// Show `record` unless something newer is already on screen.
  fn show(&mut self, record: &CachedLikeStatus) -> bool {
    if record.version < self.shown_version && self.state != WidgetState::Loading {
      return false;
    }
    self.shown_version = record.version;
    let next = WidgetState::Ready(record.status());
    let changed = next != self.state;
    self.state = next;
    changed
  }
}

impl Drop for LikeWidget {
  fn drop(&mut self) {
    self.subscription.unsubscribe();
  }
}

impl std::fmt::Debug for LikeWidget {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LikeWidget")
      .field("entity_id", &self.entity_id)
      .field("state", &self.state)
      .field("shown_version", &self.shown_version)
      .field("toggles_in_flight", &self.toggles_in_flight)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::Source;
  use crate::clock::ManualClock;
  use crate::testing::FakeCounterService;
  use std::sync::atomic::Ordering;
  use std::sync::Arc;
  use std::time::Duration;

  fn setup() -> (LikeCache, Arc<FakeCounterService>, Arc<ManualClock>) {
    let service = Arc::new(FakeCounterService::new());
    let clock = Arc::new(ManualClock::default());
    let cache = LikeCache::builder(service.clone())
      .clock(clock.clone())
      .build();
    (cache, service, clock)
  }

  /// Let spawned tasks run to completion on the current-thread runtime.
  async fn settle() {
    for _ in 0..10 {
      tokio::task::yield_now().await;
    }
  }

  #[tokio::test]
  async fn test_mount_loads_from_service() {
    let (cache, service, _clock) = setup();
    service.put("post-1", true, 4);

    let mut widget = LikeWidget::mount(cache, "post-1", Priority::High);
    assert_eq!(widget.state(), WidgetState::Loading);

    settle().await;
    assert!(widget.poll());
    assert_eq!(widget.status(), Some(LikeStatus::new(true, 4)));
    assert!(widget.error().is_none());
  }

  #[tokio::test]
  async fn test_mount_shows_fresh_cache_without_fetch() {
    let (cache, service, _clock) = setup();
    cache
      .store()
      .set("post-1", LikeStatus::new(false, 2), Source::Api);

    let widget = LikeWidget::mount(cache, "post-1", Priority::Normal);
    settle().await;

    assert_eq!(widget.status(), Some(LikeStatus::new(false, 2)));
    assert_eq!(service.check_calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_sibling_widgets_stay_identical() {
    let (cache, service, _clock) = setup();
    service.put("post-1", false, 9);
    cache
      .store()
      .set("post-1", LikeStatus::new(false, 9), Source::Api);

    let mut header = LikeWidget::mount(cache.clone(), "post-1", Priority::High);
    let mut footer = LikeWidget::mount(cache, "post-1", Priority::High);

    header.click();
    settle().await;
    header.poll();
    footer.poll();

    assert!(!header.is_toggling());
    assert_eq!(header.status(), Some(LikeStatus::new(true, 10)));
    assert_eq!(footer.status(), header.status());
    assert_eq!(service.toggle_calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_failed_toggle_surfaces_error_and_restores() {
    let (cache, service, _clock) = setup();
    service.put("post-1", true, 1);
    service.fail_toggles.store(true, Ordering::SeqCst);
    cache
      .store()
      .set("post-1", LikeStatus::new(true, 1), Source::Api);

    let mut widget = LikeWidget::mount(cache, "post-1", Priority::Normal);
    widget.click();
    settle().await;

    assert!(widget.poll());
    assert_eq!(widget.status(), Some(LikeStatus::new(true, 1)));
    assert!(widget.error().unwrap().contains("post-1"));
  }

  #[tokio::test]
  async fn test_double_click_sends_one_toggle() {
    let (cache, service, clock) = setup();
    service.put("post-1", false, 0);

    let mut widget = LikeWidget::mount(cache, "post-1", Priority::Normal);
    settle().await;
    widget.poll();

    widget.click();
    widget.click();
    settle().await;
    widget.poll();

    assert_eq!(service.toggle_calls.load(Ordering::SeqCst), 1);
    assert_eq!(widget.status(), Some(LikeStatus::new(true, 1)));

    clock.advance(Duration::from_secs(1));
    widget.click();
    settle().await;
    widget.poll();
    assert_eq!(widget.status(), Some(LikeStatus::new(false, 0)));
  }

  #[tokio::test]
  async fn test_absorbed_click_keeps_busy_until_first_toggle_lands() {
    let (cache, service, _clock) = setup();
    service.put("post-1", false, 3);
    cache
      .store()
      .set("post-1", LikeStatus::new(false, 3), Source::Api);
    let gate = service.gate_toggles();

    let mut widget = LikeWidget::mount(cache, "post-1", Priority::Normal);
    widget.click();
    settle().await;
    widget.click();
    settle().await;
    widget.poll();

    // Second click was absorbed, the first is still waiting on the server
    assert!(widget.is_toggling());
    assert_eq!(widget.status(), Some(LikeStatus::new(true, 4)));

    gate.notify_one();
    settle().await;
    widget.poll();
    assert!(!widget.is_toggling());
    assert_eq!(service.toggle_calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_widget_follows_writes_after_cache_clear() {
    let (cache, service, clock) = setup();
    service.put("post-1", false, 5);

    let mut widget = LikeWidget::mount(cache.clone(), "post-1", Priority::Normal);
    settle().await;
    widget.click();
    settle().await;
    widget.poll();
    assert_eq!(widget.status(), Some(LikeStatus::new(true, 6)));

    cache.clear().unwrap();
    service.put("post-1", false, 42);
    clock.advance(Duration::from_secs(1));
    let report = cache.reconcile_batch(&["post-1"]).await;
    assert_eq!(report.applied, 1);

    widget.poll();
    assert_eq!(widget.status(), Some(LikeStatus::new(false, 42)));
  }

  #[tokio::test]
  async fn test_unmounted_widget_unsubscribes() {
    let (cache, _service, _clock) = setup();
    cache
      .store()
      .set("post-1", LikeStatus::new(false, 0), Source::Api);

    let widget = LikeWidget::mount(cache.clone(), "post-1", Priority::Low);
    assert_eq!(cache.store().bus().subscriber_count("post-1"), 1);
    drop(widget);
    assert_eq!(cache.store().bus().subscriber_count("post-1"), 0);
  }
}
