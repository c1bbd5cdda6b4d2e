use tracing::{info, warn};

use crate::services::RefreshScheduler;
use crate::utils::Config;

/// Keep the background half running until Ctrl-C
pub async fn execute(config: &Config) -> Result<(), String> {
    let (cache, store) = super::open_cache(config).await?;
    let scheduler = RefreshScheduler::start(cache.clone(), store, config.refresh_period).await;
    info!("🚀 Serving rates, refreshing every {}s. Press Ctrl-C to stop", config.refresh_period.as_secs());

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
    }

    scheduler.stop();
    match cache.peek().await {
        Some(status) => info!(
            "Stopped with cached rate {} from {} ({}s old)",
            status.snapshot.usd_rate(),
            status.snapshot.source(),
            status.age.as_secs()
        ),
        None => info!("Stopped without any cached rate"),
    }
    Ok(())
}
