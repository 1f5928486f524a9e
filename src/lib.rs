//! Client-side like/counter cache.
//!
//! Keeps every widget showing the same entity in agreement, applies toggles
//! optimistically with rollback, and stops background refreshes from
//! overwriting a user's recent action with a stale server read.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod likes;
pub mod logging;
pub mod remote;
pub mod sync;
pub mod widget;

#[cfg(test)]
mod testing;

pub use cache::{CacheResult, CachedLikeStatus, LikeStatus, Origin, Priority, Source};
pub use config::Config;
pub use error::ToggleError;
pub use likes::{LikeCache, LikeCacheBuilder};
pub use sync::{IgnoreReason, ReconcileReport, ToggleOutcome};
pub use widget::{LikeWidget, WidgetState};
