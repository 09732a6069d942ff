//! # Reviewcast CLI
//!
//! Single binary for the review-to-image service.
//!
//! ```bash
//! reviewcast --config ./config/reviewcast.toml serve
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `serve` | Run the HTTP service (API, scheduler, renderer) |
//! | `sources` | List configured source adapters and their status |
//! | `prune` | Remove stored reviews older than the retention horizon |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use reviewcast::sources::SourceRegistry;
use reviewcast::store::{ReviewStore, DEFAULT_SAVE_DEBOUNCE};

/// Reviewcast — turn customer reviews into branded social images.
#[derive(Parser)]
#[command(
    name = "reviewcast",
    about = "Review-to-image service: ingest, render, and share customer reviews",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/reviewcast.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service.
    ///
    /// Starts the API server, the poll scheduler (when ingestion is
    /// enabled), and the shared headless browser. Shuts down cleanly on
    /// SIGINT/SIGTERM.
    Serve,

    /// List configured source adapters and whether they are usable.
    Sources,

    /// Remove stored reviews older than the retention horizon.
    Prune {
        /// Override the configured horizon, in days.
        #[arg(long)]
        days: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = reviewcast::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            info!(version = env!("CARGO_PKG_VERSION"), "Starting reviewcast");
            reviewcast::server::run(config).await?;
        }
        Commands::Sources => {
            let (registry, _generic) = SourceRegistry::from_config(&config);
            registry.initialize_all().await;
            println!("{:<12} {:<10} POLLS", "SOURCE", "ENABLED");
            for adapter in registry.all() {
                println!(
                    "{:<12} {:<10} {}",
                    adapter.name(),
                    adapter.enabled(),
                    adapter.polls()
                );
            }
        }
        Commands::Prune { days } => {
            let store = ReviewStore::open(
                config.ingestion.data_path.clone(),
                DEFAULT_SAVE_DEBOUNCE,
            )?;
            let horizon = days.unwrap_or(config.ingestion.max_review_age_days);
            let removed = store.prune(horizon);
            store.flush_now().await?;
            println!("pruned {removed} reviews older than {horizon} days");
        }
    }

    Ok(())
}
