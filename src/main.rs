use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;

use likecache::cache::{CacheStorage, NoopStorage, SqliteStorage};
use likecache::remote::HttpCounterService;
use likecache::{Config, LikeCache, ToggleOutcome};

#[derive(Parser, Debug)]
#[command(name = "likecache")]
#[command(about = "Inspect and toggle likes through the client-side like cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/likecache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Write logs to a daily rolling file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  /// Acting user, overrides `service.user`
  #[arg(short, long)]
  user: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Refresh the given entities in one batch and print them
  Status {
    #[arg(required = true)]
    ids: Vec<String>,

    /// Re-read even entities whose cached value is still fresh
    #[arg(long)]
    force: bool,
  },
  /// Like or unlike an entity
  Toggle { id: String },
  /// Print every cached record
  Show,
  /// Drop all cached records for the current user
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = likecache::logging::init(args.log_file.as_deref())?;

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(user) = args.user {
    config.service.user = Some(user);
  }

  let storage: Arc<dyn CacheStorage> = if !config.storage.enabled {
    Arc::new(NoopStorage)
  } else if let Some(path) = &config.storage.path {
    Arc::new(SqliteStorage::open(path)?)
  } else {
    Arc::new(SqliteStorage::open_default()?)
  };

  let service = Arc::new(HttpCounterService::new(&config.service)?);
  let cache = LikeCache::builder(service)
    .config(&config)
    .storage(storage)
    .build();
  cache.restore()?;

  match args.command {
    Command::Status { ids, force } => {
      let targets = if force { ids.clone() } else { cache.stale_ids(&ids) };
      if !targets.is_empty() {
        let report = cache.reconcile_batch(&targets).await;
        if report.fetch_failed {
          eprintln!("warning: could not reach the like service, showing cached values");
        }
      }
      for id in &ids {
        match cache.get(id) {
          Some(record) => println!(
            "{:<24} {:<7} {:>8}",
            id,
            if record.is_liked { "liked" } else { "-" },
            record.like_count
          ),
          None => println!("{:<24} {:<7} {:>8}", id, "?", "?"),
        }
      }
    }
    Command::Toggle { id } => match cache.toggle(&id).await? {
      ToggleOutcome::Applied(status) => println!(
        "{} {} ({} likes)",
        id,
        if status.is_liked { "liked" } else { "unliked" },
        status.like_count
      ),
      ToggleOutcome::Ignored(reason) => println!("{} unchanged ({:?})", id, reason),
    },
    Command::Show => {
      let now = cache.store().now();
      for record in cache.snapshot() {
        let age = (now - record.cached_at).num_seconds().max(0);
        println!(
          "{:<24} {:<7} {:>8}  {:<10} v{:<4} {}s old",
          record.entity_id,
          if record.is_liked { "liked" } else { "-" },
          record.like_count,
          record.source,
          record.version,
          age
        );
      }
    }
    Command::Clear => {
      cache.clear()?;
      return Ok(());
    }
  }

  cache.persist()?;
  Ok(())
}
