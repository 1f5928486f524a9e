//! Contract of the remote counter service, plus an HTTP implementation.
//!
//! The service is the sole source of truth for like state; the cache only
//! ever predicts it.

mod api_types;
mod client;

use async_trait::async_trait;
use color_eyre::Result;

use crate::cache::LikeStatus;

pub use client::HttpCounterService;

/// Authoritative like state for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStatus {
  pub entity_id: String,
  pub is_liked: bool,
  pub like_count: u64,
}

impl RemoteStatus {
  pub fn status(&self) -> LikeStatus {
    LikeStatus::new(self.is_liked, self.like_count)
  }
}

/// Result of a remote toggle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleResponse {
  pub success: bool,
  pub is_liked: bool,
  pub like_count: u64,
  pub error: Option<String>,
}

/// Options for a single status read.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckOptions {
  /// Bypass any server-side cache
  pub force_refresh: bool,
  /// Failure is expected to be handled quietly by the caller
  pub silent: bool,
}

impl CheckOptions {
  /// Forced, silent read used to acquire a toggle baseline.
  pub fn baseline() -> Self {
    Self {
      force_refresh: true,
      silent: true,
    }
  }

  pub fn background() -> Self {
    Self {
      force_refresh: false,
      silent: true,
    }
  }
}

#[async_trait]
pub trait CounterService: Send + Sync {
  /// Read one entity. `Ok(None)` means the service has no record for it.
  async fn check_status(
    &self,
    entity_id: &str,
    options: CheckOptions,
  ) -> Result<Option<RemoteStatus>>;

  /// Read many entities in one call. Entities without a server-side record
  /// are omitted.
  async fn check_status_batch(&self, entity_ids: &[String]) -> Result<Vec<RemoteStatus>>;

  /// Flip the acting user's like on an entity.
  async fn toggle(&self, entity_id: &str) -> Result<ToggleResponse>;
}
