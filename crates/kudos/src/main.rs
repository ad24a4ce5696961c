//! kudos - offline-first cache for the kudos rewards API

mod cli;

use anyhow::{Context, Result};
use chrono::Utc;
use cli::CategoryRow;
use clap::{Parser, Subcommand};
use kudos_core::config::KudosConfig;
use kudos_core::{ApiClient, CacheEvent, KudosCache, RefreshReport, SqliteStore};
use kudos_types::Category;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "kudos",
    version,
    about = "Offline-first cache for the kudos rewards API",
    long_about = "Keeps the rewards feed, marketplace and leaderboard cached on disk so they\n\
                  render instantly, and refreshes them from the API in the background.\n\
                  \n\
                  Examples:\n\
                    kudos warm                       # Load from disk, refresh from API\n\
                    kudos show market                # Print cached marketplace\n\
                    kudos show history --user 42     # Transactions of user 42\n\
                    kudos invalidate --all           # Drop everything cached\n\
                    kudos preload --user 42          # Prefetch ahead of navigation\n\
                  \n\
                  Environment Variables:\n\
                    KUDOS_CONFIG                     # Config file path\n\
                    KUDOS_API_URL                    # API base URL\n\
                    KUDOS_INIT_DATA                  # Telegram init data blob\n\
                    KUDOS_USER_ID                    # Current user id\n\
                    KUDOS_STORAGE                    # SQLite cache file\n\
                    RUST_LOG                         # Log filter (default: warn)"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (default: <config dir>/kudos/config.toml)
    #[arg(long, global = true, env = "KUDOS_CONFIG")]
    config: Option<PathBuf>,

    /// API base URL
    #[arg(long, global = true, env = "KUDOS_API_URL")]
    api_url: Option<String>,

    /// Telegram init data sent with every request
    #[arg(long, global = true, env = "KUDOS_INIT_DATA", hide_env_values = true)]
    init_data: Option<String>,

    /// SQLite cache file
    #[arg(long, global = true, env = "KUDOS_STORAGE")]
    storage: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable ANSI colors
    #[arg(long, global = true, env = "KUDOS_NO_COLOR")]
    no_color: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Load persisted data, refresh from the API and print a summary
    Warm,
    /// Print one category, fetching it if nothing is cached
    Show {
        /// feed, market, leaderboard or history
        category: Category,
        /// User id (required for history)
        #[arg(long, env = "KUDOS_USER_ID")]
        user: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Fetch even when cached
        #[arg(long)]
        refresh: bool,
    },
    /// Drop a category from memory and disk
    Invalidate {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        category: Option<Category>,
        /// Drop every category
        #[arg(long)]
        all: bool,
    },
    /// Prefetch the startup categories and the user's history
    Preload {
        #[arg(long, env = "KUDOS_USER_ID")]
        user: Option<String>,
    },
    /// Delete the cache database and exit
    ClearCache {
        /// Only delete entries of the configured scope, keep the database
        #[arg(long)]
        scope: bool,
    },
    /// List persisted keys
    Keys,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(&cli)?;
    let no_color = cli.no_color;

    match cli.command {
        Command::Warm => {
            run_warm(build_cache(&config, open_store(&config)?)?, no_color).await?;
        }
        Command::Show {
            category,
            user,
            json,
            refresh,
        } => {
            let cache = build_cache(&config, open_store(&config)?)?;
            run_show(cache, category, user, json, refresh, no_color).await?;
        }
        Command::Invalidate { category, all } => {
            run_invalidate(build_cache(&config, open_store(&config)?)?, category, all).await?;
        }
        Command::Preload { user } => {
            run_preload(build_cache(&config, open_store(&config)?)?, user, no_color).await?;
        }
        Command::ClearCache { scope: false } => {
            run_clear_cache(&config.storage.path)?;
        }
        Command::ClearCache { scope: true } => {
            run_clear_scope(open_store(&config)?).await?;
        }
        Command::Keys => {
            let store = open_store(&config)?;
            run_keys(build_cache(&config, Arc::clone(&store))?, store).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("kudos=debug,kudos_core=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Defaults, then the config file, then flags and environment
fn load_config(cli: &Cli) -> Result<KudosConfig> {
    let mut config = KudosConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;

    if let Some(url) = &cli.api_url {
        config.api.base_url = url.clone();
    }
    if let Some(init_data) = &cli.init_data {
        config.api.init_data = Some(init_data.clone());
    }
    if let Some(path) = &cli.storage {
        config.storage.path = path.clone();
    }

    config.validate()?;
    debug!(
        base_url = %config.api.base_url,
        storage = %config.storage.path.display(),
        scope = %config.storage.scope,
        "Configuration loaded"
    );
    Ok(config)
}

fn open_store(config: &KudosConfig) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(&config.storage.path, config.storage.scope.clone())
        .with_context(|| {
            format!(
                "Failed to open cache database: {}",
                config.storage.path.display()
            )
        })?;
    Ok(Arc::new(store))
}

fn build_cache(config: &KudosConfig, store: Arc<SqliteStore>) -> Result<Arc<KudosCache>> {
    let source = ApiClient::new(&config.api).context("Failed to build API client")?;

    Ok(Arc::new(KudosCache::new(
        Arc::new(source),
        store,
        config.cache.clone(),
    )))
}

fn category_rows(cache: &KudosCache, report: Option<&RefreshReport>) -> Vec<CategoryRow> {
    Category::ALL
        .into_iter()
        .map(|category| CategoryRow {
            category,
            durability: cache.schema().durability(category),
            entry: cache.entry(category),
            outcome: report.and_then(|r| r.outcome(category).cloned()),
        })
        .collect()
}

// ============================================================================
// Command Handlers
// ============================================================================

async fn run_warm(cache: Arc<KudosCache>, no_color: bool) -> Result<()> {
    let start = Instant::now();

    let report = cache.initialize().finish().await;
    cache.flush().await;

    println!(
        "{}",
        cli::format_category_table(&category_rows(&cache, Some(&report)), Utc::now(), no_color)
    );
    println!();
    println!(
        "Warmed in {:.2}s ({} updated, {} failed)",
        start.elapsed().as_secs_f64(),
        report.updated().count(),
        report.failed().count()
    );

    if report.has_failures() {
        println!();
        println!("Failures:");
        for (category, outcome) in report.outcomes.iter().filter(|(_, o)| !o.is_success()) {
            match outcome {
                kudos_core::RefreshOutcome::Failed { message } => {
                    println!("  - {}: {}", category, message)
                }
                _ => println!("  - {}: timed out", category),
            }
        }
    }

    Ok(())
}

async fn run_show(
    cache: Arc<KudosCache>,
    category: Category,
    user: Option<String>,
    json: bool,
    refresh: bool,
    no_color: bool,
) -> Result<()> {
    let mut warmup = cache.initialize();
    warmup.loaded().await;

    let cached = if refresh { None } else { cache.read(category) };
    let payload = match cached {
        Some(payload) => payload,
        None => cache
            .refresh(category, user.as_deref())
            .await
            .with_context(|| format!("Failed to fetch {}", category))?,
    };
    cache.flush().await;

    println!("{}", cli::format_payload(category, &payload, json, no_color));
    Ok(())
}

async fn run_invalidate(cache: Arc<KudosCache>, category: Option<Category>, all: bool) -> Result<()> {
    match category {
        Some(category) if !all => {
            cache.invalidate(category);
            cache.flush().await;
            println!("✅ Invalidated {}", category);
        }
        _ => {
            cache.invalidate_all();
            cache.flush().await;
            println!("✅ Invalidated all categories");
        }
    }
    Ok(())
}

async fn run_preload(cache: Arc<KudosCache>, user: Option<String>, no_color: bool) -> Result<()> {
    let mut events = cache.subscribe();

    let pending = cache.preload_initial_data();
    let history = cache.preload_parameterized(Category::History, user.as_deref());
    pending.wait().await;
    if let Some(history) = history {
        history.wait().await;
    } else if user.is_none() {
        println!("💡 Pass --user (or KUDOS_USER_ID) to preload history.");
    }
    cache.flush().await;

    println!(
        "{}",
        cli::format_category_table(&category_rows(&cache, None), Utc::now(), no_color)
    );

    let mut failures = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CacheEvent::FetchFailed { category, message } = event {
            failures.push(format!("  - {}: {}", category, message));
        }
    }
    if !failures.is_empty() {
        println!();
        println!("Failures:");
        for line in failures {
            println!("{}", line);
        }
    }

    Ok(())
}

fn run_clear_cache(cache_path: &Path) -> Result<()> {
    if !cache_path.exists() {
        println!("❌ Cache not found at: {}", cache_path.display());
        println!("   Nothing to clear.");
        return Ok(());
    }

    let size_bytes = std::fs::metadata(cache_path)
        .with_context(|| format!("Failed to read cache metadata: {}", cache_path.display()))?
        .len();

    std::fs::remove_file(cache_path)
        .with_context(|| format!("Failed to delete cache: {}", cache_path.display()))?;

    for suffix in ["-wal", "-shm"] {
        let mut side = cache_path.as_os_str().to_owned();
        side.push(suffix);
        let side = PathBuf::from(side);
        if side.exists() {
            let _ = std::fs::remove_file(&side);
        }
    }

    println!("✅ Cache cleared successfully");
    println!("   Location: {}", cache_path.display());
    println!("   Freed: {}", cli::format_size(size_bytes));

    Ok(())
}

async fn run_clear_scope(store: Arc<SqliteStore>) -> Result<()> {
    let size_bytes = store
        .size_bytes()
        .await
        .context("Failed to measure cache scope")?;
    let removed = store
        .clear_scope()
        .await
        .with_context(|| format!("Failed to clear scope '{}'", store.scope()))?;

    println!("✅ Scope '{}' cleared", store.scope());
    println!("   Entries removed: {}", removed);
    println!("   Freed: {}", cli::format_size(size_bytes));

    Ok(())
}

async fn run_keys(cache: Arc<KudosCache>, store: Arc<SqliteStore>) -> Result<()> {
    let keys = cache.persisted_keys().await;

    if keys.is_empty() {
        println!("No persisted keys in scope '{}'.", store.scope());
        return Ok(());
    }

    for key in &keys {
        println!("{}", key);
    }

    let size = store
        .size_bytes()
        .await
        .map(cli::format_size)
        .unwrap_or_else(|_| "unknown size".to_string());
    let location = store
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "in memory".to_string());
    println!();
    println!(
        "{} keys in scope '{}', {} ({})",
        keys.len(),
        store.scope(),
        size,
        location
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kudos_core::KeyValueStore;

    fn config_at(path: &Path, scope: &str) -> KudosConfig {
        let mut config = KudosConfig::default();
        config.storage.path = path.to_path_buf();
        config.storage.scope = scope.to_string();
        config
    }

    #[tokio::test]
    async fn test_clear_scope_keeps_other_scopes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        let mine = open_store(&config_at(&path, "u42")).unwrap();
        let theirs = open_store(&config_at(&path, "u7")).unwrap();
        mine.set("feed", r#"["feed"]"#).await.unwrap();
        mine.set("market", r#"["market"]"#).await.unwrap();
        theirs.set("feed", r#"["other"]"#).await.unwrap();
        assert!(mine.size_bytes().await.unwrap() > 0);

        run_clear_scope(Arc::clone(&mine)).await.unwrap();

        assert!(mine.keys().await.unwrap().is_empty());
        assert_eq!(mine.size_bytes().await.unwrap(), 0);
        assert_eq!(
            theirs.get("feed").await.unwrap().as_deref(),
            Some(r#"["other"]"#)
        );
        assert!(path.exists());
    }

    #[test]
    fn test_open_store_reports_location() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");

        let store = open_store(&config_at(&path, "default")).unwrap();

        assert_eq!(store.path(), Some(path.as_path()));
        assert_eq!(store.scope(), "default");
    }
}
