use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use satlens::commands::{self, Cli};
use satlens::utils::{extract_clean_error, Config};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("satlens=debug".parse().unwrap())
                .add_directive("reqwest=warn".parse().unwrap()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    info!("🔎 Starting satlens v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = commands::run(cli, config).await {
        let clean_error = extract_clean_error(&e);
        error!("Command failed: {}", e);
        eprintln!("❌ {}", clean_error);
        std::process::exit(1);
    }
}
