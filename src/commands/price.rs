use crate::models::RateSnapshot;
use crate::services::CacheStatus;
use crate::utils::format::group_thousands;
use crate::utils::Config;

pub async fn execute(config: &Config, cached_only: bool) -> Result<(), String> {
    tracing::info!("💹 Price command called (cached only: {})", cached_only);
    let (cache, _store) = super::open_cache(config).await?;

    if cached_only {
        return match cache.peek().await {
            Some(status) => {
                println!("{}", describe_status(&status));
                Ok(())
            }
            None => Err("No cached price data".to_string()),
        };
    }

    let snapshot = cache.get_snapshot().await.map_err(|e| e.to_string())?;
    println!("{}", describe_snapshot(&snapshot));
    Ok(())
}

fn describe_snapshot(snapshot: &RateSnapshot) -> String {
    let mut out = format!(
        "1 BTC = ${} | 1 sat = ${:.8}\nSource: {} | Fetched: {}",
        dollars(snapshot.usd_rate()),
        snapshot.satoshi_rate(),
        snapshot.source(),
        snapshot.fetched_at().to_rfc3339()
    );
    if snapshot.is_emergency() {
        out.push_str("\n⚠️ Emergency rate, no live or cached data was available");
    }
    out
}

fn describe_status(status: &CacheStatus) -> String {
    format!(
        "{}\nAge: {}s | TTL: {}s | {}",
        describe_snapshot(&status.snapshot),
        status.age.as_secs(),
        status.ttl.as_secs(),
        if status.fresh { "fresh" } else { "stale" }
    )
}

/// "67,123.45"
fn dollars(amount: f64) -> String {
    let cents = (amount * 100.0).round() as u64;
    format!("{}.{:02}", group_thousands(cents / 100), cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    #[test]
    fn test_describe_snapshot() {
        let fetched = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let snapshot = RateSnapshot::new(67_123.45, fetched, "coingecko").unwrap();
        let text = describe_snapshot(&snapshot);
        assert!(text.starts_with("1 BTC = $67,123.45 | 1 sat = $0.00067123"));
        assert!(text.contains("Source: coingecko"));
        assert!(!text.contains("Emergency"));
    }

    #[test]
    fn test_describe_stale_status() {
        let snapshot = RateSnapshot::new(50_000.0, Utc::now(), "coinbase").unwrap();
        let status = CacheStatus {
            snapshot,
            age: Duration::from_secs(400),
            ttl: Duration::from_secs(300),
            fresh: false,
        };
        assert!(describe_status(&status).ends_with("Age: 400s | TTL: 300s | stale"));
    }
}
