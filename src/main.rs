//! # Repopulse CLI (`pulse`)
//!
//! The `pulse` binary is the trigger surface for the ingestion pipeline.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pulse init` | Create the SQLite database and run schema migrations |
//! | `pulse track <owner/repo>` | Track a repository and ingest its recent activity |
//! | `pulse sync <owner/repo>` | Refresh a repository if its index is stale |
//! | `pulse refresh <owner/repo>` | Destructively rebuild a repository's index |
//! | `pulse older <owner/repo>` | Load a batch of older updates (backward pagination) |
//! | `pulse sweep` | Refresh all stale tracked repositories, by interest |
//! | `pulse updates <owner/repo>` | Print the update feed |
//!
//! ## Examples
//!
//! ```bash
//! pulse init --config ./config/pulse.toml
//! pulse track rust-lang/cargo
//! pulse sync rust-lang/cargo
//! pulse updates rust-lang/cargo --limit 20
//! pulse sweep
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use repopulse::classifier;
use repopulse::config::load_config;
use repopulse::coordinator::Coordinator;
use repopulse::db;
use repopulse::feed;
use repopulse::ingest::IngestOutcome;
use repopulse::migrate;
use repopulse::source::{ChangeSource, GithubSource};

/// Repopulse — turns GitHub repository activity into a deduplicated feed
/// of classified updates.
#[derive(Parser)]
#[command(
    name = "pulse",
    about = "Repopulse — a deduplicated, classified feed of GitHub repository activity",
    version,
    long_about = "Repopulse ingests merged pull requests and releases, groups them into \
    semantically coherent updates via a classification service (with deterministic fallbacks), \
    and maintains an idempotent, hash-deduplicated index in SQLite."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pulse.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Track a repository and ingest its recent activity.
    Track {
        /// Repository in `owner/name` form.
        repo: String,
    },

    /// Refresh a repository if its index is older than the staleness
    /// threshold; a no-op otherwise.
    Sync {
        /// Repository in `owner/name` form.
        repo: String,
    },

    /// Destructively rebuild a repository's index: delete all derived
    /// data, then re-ingest from the lookback window.
    Refresh {
        /// Repository in `owner/name` form.
        repo: String,
    },

    /// Load a batch of updates older than anything currently indexed.
    Older {
        /// Repository in `owner/name` form.
        repo: String,
    },

    /// Refresh all stale tracked repositories, highest interest first.
    Sweep,

    /// Print the update feed for a repository.
    Updates {
        /// Repository in `owner/name` form.
        repo: String,

        /// Maximum number of entries to print.
        #[arg(long, default_value = "20")]
        limit: i64,
    },
}

fn split_repo(spec: &str) -> Result<(&str, &str)> {
    match spec.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() => Ok((owner, name)),
        _ => bail!("expected repository as owner/name, got '{}'", spec),
    }
}

fn print_outcome(outcome: &IngestOutcome) {
    println!("  fetched PRs:      {}", outcome.stats.fetched_prs);
    println!("  new PRs:          {}", outcome.stats.new_prs);
    println!("  updates created:  {}", outcome.stats.updates_created);
    println!("  releases added:   {}", outcome.stats.releases_inserted);
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        let pool = db::connect(&config).await?;
        migrate::run_migrations(&pool).await?;
        pool.close().await;
        println!("initialized {}", config.db.path.display());
        return Ok(());
    }

    let pool = db::connect(&config).await?;
    let source: Arc<dyn ChangeSource> = Arc::new(GithubSource::new(&config.github)?);
    let classifier = classifier::create_classifier(&config.classifier)?;
    let coordinator = Coordinator::new(pool, config, source, classifier);

    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Track { repo } => {
            let (owner, name) = split_repo(&repo)?;
            let outcome = coordinator.track(owner, name).await?;
            println!("tracking {}/{}", owner, name);
            print_outcome(&outcome);
            println!("ok");
        }
        Commands::Sync { repo } => {
            let (owner, name) = split_repo(&repo)?;
            match coordinator.ensure_fresh(owner, name).await? {
                Some(outcome) => {
                    println!("refreshed {}/{}", owner, name);
                    print_outcome(&outcome);
                    println!("ok");
                }
                None => println!("{}/{} is fresh", owner, name),
            }
        }
        Commands::Refresh { repo } => {
            let (owner, name) = split_repo(&repo)?;
            let outcome = coordinator.refresh(owner, name).await?;
            println!("rebuilt {}/{}", owner, name);
            print_outcome(&outcome);
            println!("ok");
        }
        Commands::Older { repo } => {
            let (owner, name) = split_repo(&repo)?;
            let updates = coordinator.load_older(owner, name).await?;
            println!("loaded {} older updates", updates.len());
            for update in &updates {
                println!("  {} ({} PRs)", update.title, update.pr_count);
            }
            println!("ok");
        }
        Commands::Sweep => {
            let stats = coordinator.sweep().await?;
            println!("sweep");
            println!("  scanned:   {}", stats.scanned);
            println!("  refreshed: {}", stats.refreshed);
            println!("  fresh:     {}", stats.skipped_fresh);
            println!("  failed:    {}", stats.failed);
            println!("ok");
        }
        Commands::Updates { repo, limit } => {
            let (owner, name) = split_repo(&repo)?;
            feed::run_updates(&coordinator, owner, name, limit).await?;
        }
    }

    Ok(())
}
