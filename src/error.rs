use thiserror::Error;

/// Toggle failures that reach the caller.
///
/// In both cases the cache is left holding a previously consistent value:
/// nothing was applied, or the optimistic write was rolled back.
#[derive(Debug, Error)]
pub enum ToggleError {
  /// The authoritative baseline could not be read, so no optimistic write
  /// was made.
  #[error("could not read current like state for {entity_id}: {reason}")]
  BaselineUnavailable { entity_id: String, reason: String },

  /// The remote toggle failed or reported `success: false`; the optimistic
  /// write was rolled back.
  #[error("like toggle for {entity_id} failed: {message}")]
  RemoteToggleFailed { entity_id: String, message: String },
}
