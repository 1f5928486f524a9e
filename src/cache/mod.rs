//! Like-status caching layer.
//!
//! This module holds the pieces that know nothing about the network:
//! - an in-memory store keyed by entity id, versioned per entity
//! - a notification bus fanning writes out to per-entity subscribers
//! - the freshness policy deciding when records need revalidation
//! - durable snapshot storage so the cache survives restarts

mod bus;
mod freshness;
mod storage;
mod store;
mod types;

pub use bus::{Callback, NotificationBus, Subscription};
pub use freshness::FreshnessPolicy;
pub use storage::{namespace_for, CacheStorage, NoopStorage, SqliteStorage};
pub use store::CacheStore;
pub use types::{CacheResult, CachedLikeStatus, LikeStatus, Origin, Priority, Source};
