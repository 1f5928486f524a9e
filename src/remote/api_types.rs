//! Serde types matching the counter service's JSON.
//!
//! These are separate from the cache's domain types so wire quirks (signed
//! counts, optional fields) stay at the edge.

use serde::{Deserialize, Serialize};

use super::{RemoteStatus, ToggleResponse};

#[derive(Debug, Deserialize)]
pub struct ApiLikeStatus {
  pub entity_id: String,
  #[serde(default)]
  pub is_liked: bool,
  #[serde(default)]
  pub like_count: i64,
}

impl ApiLikeStatus {
  /// Negative counts are clamped to zero on ingest.
  pub fn into_status(self) -> RemoteStatus {
    RemoteStatus {
      entity_id: self.entity_id,
      is_liked: self.is_liked,
      like_count: clamp_count(self.like_count),
    }
  }
}

#[derive(Debug, Serialize)]
pub struct ApiBatchRequest<'a> {
  pub entity_ids: &'a [String],
}

#[derive(Debug, Deserialize)]
pub struct ApiBatchResponse {
  #[serde(default)]
  pub statuses: Vec<ApiLikeStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ApiToggleResponse {
  pub success: bool,
  #[serde(default)]
  pub is_liked: bool,
  #[serde(default)]
  pub like_count: i64,
  pub error: Option<String>,
}

impl From<ApiToggleResponse> for ToggleResponse {
  fn from(api: ApiToggleResponse) -> Self {
    Self {
      success: api.success,
      is_liked: api.is_liked,
      like_count: clamp_count(api.like_count),
      error: api.error,
    }
  }
}

fn clamp_count(count: i64) -> u64 {
  u64::try_from(count).unwrap_or(0)
}
