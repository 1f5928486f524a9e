//! Core record types for the like cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How a cached record was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
  /// Populated by a batch or list read, no per-user-action guarantee
  Api,
  /// Local prediction of an in-flight user action
  Optimistic,
  /// Server-confirmed result of a specific user action
  Sync,
}

impl Source {
  /// Records produced by the user's own actions get the strict freshness
  /// regime and are protected from coarse batch overwrites.
  pub fn is_user_action(self) -> bool {
    matches!(self, Source::Optimistic | Source::Sync)
  }
}

impl fmt::Display for Source {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Source::Api => "api",
      Source::Optimistic => "optimistic",
      Source::Sync => "sync",
    };
    f.pad(name)
  }
}

/// Refresh priority tier. Higher priority means a shorter TTL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  /// Currently visible, above the fold
  High,
  #[default]
  Normal,
  /// Off-screen or rarely viewed
  Low,
}

/// The user-visible part of a record: liked flag plus count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeStatus {
  pub is_liked: bool,
  pub like_count: u64,
}

impl LikeStatus {
  pub fn new(is_liked: bool, like_count: u64) -> Self {
    Self {
      is_liked,
      like_count,
    }
  }

  /// The predicted result of flipping this status.
  ///
  /// The count never drops below zero.
  pub fn flipped(self) -> Self {
    let is_liked = !self.is_liked;
    let like_count = if is_liked {
      self.like_count.saturating_add(1)
    } else {
      self.like_count.saturating_sub(1)
    };
    Self {
      is_liked,
      like_count,
    }
  }
}

/// One cached record per entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedLikeStatus {
  pub entity_id: String,
  pub is_liked: bool,
  pub like_count: u64,
  /// Time of the last write to this record
  pub cached_at: DateTime<Utc>,
  /// Age after which the record should be revalidated
  pub ttl: Duration,
  pub source: Source,
  /// Incremented on every write to this entity
  pub version: u64,
}

impl CachedLikeStatus {
  pub fn status(&self) -> LikeStatus {
    LikeStatus {
      is_liked: self.is_liked,
      like_count: self.like_count,
    }
  }
}

/// Result of a read-through lookup, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub origin: Origin,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      origin: Origin::Network,
    }
  }

  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      origin: Origin::CacheFresh,
    }
  }

  /// Network unavailable, serving whatever was cached.
  pub fn offline(data: T) -> Self {
    Self {
      data,
      origin: Origin::Offline,
    }
  }
}

/// Indicates where a read-through result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
  /// Fresh data from the counter service
  Network,
  /// Cached record still inside its freshness window
  CacheFresh,
  /// Stale cached record served because the refresh failed
  Offline,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_flip_like_increments() {
    assert_eq!(
      LikeStatus::new(false, 10).flipped(),
      LikeStatus::new(true, 11)
    );
  }

  #[test]
  fn test_flip_unlike_clamps_at_zero() {
    assert_eq!(LikeStatus::new(true, 1).flipped(), LikeStatus::new(false, 0));
    assert_eq!(LikeStatus::new(true, 0).flipped(), LikeStatus::new(false, 0));
  }

  #[test]
  fn test_source_serializes_lowercase() {
    let json = serde_json::to_string(&Source::Optimistic).unwrap();
    assert_eq!(json, "\"optimistic\"");
    assert!(Source::Sync.is_user_action());
    assert!(!Source::Api.is_user_action());
  }
}
