//! Durable snapshot storage for the like cache.
//!
//! The in-memory store is the source of truth while running; this only
//! carries records across restarts. Records are namespaced per service and
//! acting user, since `is_liked` is a per-user fact.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::types::CachedLikeStatus;

/// Trait for durable snapshot backends.
pub trait CacheStorage: Send + Sync {
  /// Replace the stored snapshot for `namespace` with `records`.
  fn save(&self, namespace: &str, records: &[CachedLikeStatus]) -> Result<()>;

  /// Load the stored snapshot for `namespace`.
  fn load(&self, namespace: &str) -> Result<Vec<CachedLikeStatus>>;

  /// Remove everything stored for `namespace`.
  fn clear(&self, namespace: &str) -> Result<()>;
}

/// Storage implementation that doesn't persist anything.
/// Used when persistence is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn save(&self, _namespace: &str, _records: &[CachedLikeStatus]) -> Result<()> {
    Ok(()) // Discard
  }

  fn load(&self, _namespace: &str) -> Result<Vec<CachedLikeStatus>> {
    Ok(Vec::new())
  }

  fn clear(&self, _namespace: &str) -> Result<()> {
    Ok(())
  }
}

/// Stable namespace for a service URL and acting user.
pub fn namespace_for(service_url: &str, user: Option<&str>) -> String {
  let input = format!(
    "{}|{}",
    service_url.trim_end_matches('/'),
    user.unwrap_or("")
  );

  // SHA256 hash for stable, fixed-length keys
  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  hex::encode(hasher.finalize())
}

/// SQLite-based snapshot storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the database at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open or create the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("likecache").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS like_cache (
    namespace TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (namespace, entity_id)
);
"#;

impl CacheStorage for SqliteStorage {
  fn save(&self, namespace: &str, records: &[CachedLikeStatus]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM like_cache WHERE namespace = ?",
      params![namespace],
    )
    .map_err(|e| eyre!("Failed to delete old snapshot: {}", e))?;

    for record in records {
      let data =
        serde_json::to_vec(record).map_err(|e| eyre!("Failed to serialize record: {}", e))?;
      tx.execute(
        "INSERT OR REPLACE INTO like_cache (namespace, entity_id, data, cached_at)
         VALUES (?, ?, ?, ?)",
        params![
          namespace,
          record.entity_id,
          data,
          record.cached_at.to_rfc3339()
        ],
      )
      .map_err(|e| eyre!("Failed to store record {}: {}", record.entity_id, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn load(&self, namespace: &str) -> Result<Vec<CachedLikeStatus>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT data FROM like_cache WHERE namespace = ? ORDER BY entity_id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    // Rows that no longer deserialize are skipped rather than failing the load
    let records: Vec<CachedLikeStatus> = stmt
      .query_map(params![namespace], |row| row.get::<_, Vec<u8>>(0))
      .map_err(|e| eyre!("Failed to query records: {}", e))?
      .filter_map(|r| r.ok())
      .filter_map(|data| serde_json::from_slice(&data).ok())
      .collect();

    Ok(records)
  }

  fn clear(&self, namespace: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM like_cache WHERE namespace = ?",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to clear snapshot: {}", e))?;

    Ok(())
  }
}
