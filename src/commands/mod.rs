use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::api::source_from_config;
use crate::db::{init_store, KeyValueStore};
use crate::services::RateCache;
use crate::utils::Config;

pub mod annotate;
pub mod price;
pub mod serve;

/// Annotate USD amounts in page text with their bitcoin value
#[derive(Parser, Debug)]
#[command(name = "satlens", author, version, about)]
pub struct Cli {
    /// JSON file backing the rate cache (overrides SATLENS_STORE_PATH)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the current BTC/USD snapshot
    Price {
        /// Only show what is cached, never fetch
        #[arg(long)]
        cached: bool,
    },

    /// Annotate a JSON page fixture and print the result
    Annotate {
        /// Page fixture: {"body": <node>, "mutations": [...]}
        page: PathBuf,
    },

    /// Keep the rate cache refreshed until interrupted
    Serve,
}

/// Run one CLI command to completion
pub async fn run(cli: Cli, mut config: Config) -> Result<(), String> {
    if let Some(store) = cli.store {
        config.store_path = store;
    }

    match cli.command {
        Command::Price { cached } => price::execute(&config, cached).await,
        Command::Annotate { page } => annotate::execute(&config, &page).await,
        Command::Serve => serve::execute(&config).await,
    }
}

/// Rate cache over the configured source and store
pub(crate) async fn open_cache(config: &Config) -> Result<(RateCache, Arc<dyn KeyValueStore>), String> {
    let store = init_store(&config.store_path)
        .await
        .map_err(|e| format!("Failed to open store {}: {}", config.store_path.display(), e))?;
    let source = source_from_config(&config.source);
    info!(
        "Using rate source '{}' with store {}",
        source.name(),
        config.store_path.display()
    );
    let cache = RateCache::new(source, store.clone(), config.cache.clone());
    Ok((cache, store))
}
