use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::Priority;

const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_DEBOUNCE_MS: u64 = 300;
const DEFAULT_STRICT_WINDOW_MS: u64 = 8_000;
const DEFAULT_TTL_HIGH_SECS: u64 = 60;
const DEFAULT_TTL_NORMAL_SECS: u64 = 300;
const DEFAULT_TTL_LOW_SECS: u64 = 900;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub service: ServiceConfig,
  #[serde(default)]
  pub cache: CacheSettings,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
  /// Base URL of the counter service
  pub url: String,
  /// Per-request timeout, also bounds the remote toggle call
  pub timeout_ms: u64,
  /// Acting user label, only used to namespace the durable cache
  pub user: Option<String>,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      url: "http://localhost:8080/api".to_string(),
      timeout_ms: DEFAULT_TIMEOUT_MS,
      user: None,
    }
  }
}

impl ServiceConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_millis(self.timeout_ms)
  }
}

/// Tunables for the consistency protocol.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
  /// Minimum interval between two toggles of the same entity
  pub debounce_ms: u64,
  /// Records from the user's own actions are only fresh for this long
  pub strict_window_ms: u64,
  pub ttl: TtlTiers,
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self {
      debounce_ms: DEFAULT_DEBOUNCE_MS,
      strict_window_ms: DEFAULT_STRICT_WINDOW_MS,
      ttl: TtlTiers::default(),
    }
  }
}

impl CacheSettings {
  pub fn debounce(&self) -> Duration {
    Duration::from_millis(self.debounce_ms)
  }

  pub fn strict_window(&self) -> Duration {
    Duration::from_millis(self.strict_window_ms)
  }

  /// Check the settings against the protocol's invariants.
  pub fn validate(&self) -> Result<()> {
    if self.debounce_ms == 0 {
      return Err(eyre!("cache.debounce_ms must be greater than zero"));
    }
    let shortest_ttl = [Priority::High, Priority::Normal, Priority::Low]
      .into_iter()
      .map(|p| self.ttl.for_priority(p))
      .min()
      .unwrap_or_default();
    if self.strict_window() >= shortest_ttl {
      return Err(eyre!(
        "cache.strict_window_ms ({}ms) must be shorter than every TTL tier (shortest is {}s)",
        self.strict_window_ms,
        shortest_ttl.as_secs()
      ));
    }
    Ok(())
  }
}

/// Standard TTL per priority tier.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtlTiers {
  pub high_secs: u64,
  pub normal_secs: u64,
  pub low_secs: u64,
}

impl Default for TtlTiers {
  fn default() -> Self {
    Self {
      high_secs: DEFAULT_TTL_HIGH_SECS,
      normal_secs: DEFAULT_TTL_NORMAL_SECS,
      low_secs: DEFAULT_TTL_LOW_SECS,
    }
  }
}

impl TtlTiers {
  pub fn for_priority(&self, priority: Priority) -> Duration {
    let secs = match priority {
      Priority::High => self.high_secs,
      Priority::Normal => self.normal_secs,
      Priority::Low => self.low_secs,
    };
    Duration::from_secs(secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Persist the cache between runs
  pub enabled: bool,
  /// Database path (default: $XDG_DATA_HOME/likecache/cache.db)
  pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./likecache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/likecache/config.yaml
  ///
  /// Without any file the defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };
    config.cache.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("likecache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("likecache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Get the counter service API token from environment variables.
  ///
  /// Checks LIKECACHE_TOKEN first, then LIKES_API_TOKEN as fallback.
  pub fn get_api_token() -> Option<String> {
    std::env::var("LIKECACHE_TOKEN")
      .or_else(|_| std::env::var("LIKES_API_TOKEN"))
      .ok()
  }
}
