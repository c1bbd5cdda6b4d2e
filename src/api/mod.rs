pub mod coinbase;
pub mod coingecko;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::utils::config::{SourceConfig, SourceKind};
use crate::utils::errors::SourceError;

pub use coinbase::CoinbaseClient;
pub use coingecko::CoinGeckoClient;

/// A named source of the USD price of one bitcoin
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Label stored in every snapshot built from this source
    fn name(&self) -> &str;

    /// Fetch the current USD-per-BTC rate
    async fn fetch_usd_rate(&self) -> Result<f64, SourceError>;
}

/// A source that always returns the same rate
pub struct FixedRateSource {
    rate: f64,
}

impl FixedRateSource {
    pub fn new(rate: f64) -> Self {
        Self { rate }
    }
}

#[async_trait]
impl RateSource for FixedRateSource {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn fetch_usd_rate(&self) -> Result<f64, SourceError> {
        validate_rate(self.rate)
    }
}

/// Build the configured HTTP rate source
pub fn source_from_config(config: &SourceConfig) -> Arc<dyn RateSource> {
    match (config.kind, &config.base_url) {
        (SourceKind::CoinGecko, Some(url)) => {
            Arc::new(CoinGeckoClient::with_base_url(url.clone(), config.http_timeout))
        }
        (SourceKind::CoinGecko, None) => Arc::new(CoinGeckoClient::new(config.http_timeout)),
        (SourceKind::Coinbase, Some(url)) => {
            Arc::new(CoinbaseClient::with_base_url(url.clone(), config.http_timeout))
        }
        (SourceKind::Coinbase, None) => Arc::new(CoinbaseClient::new(config.http_timeout)),
    }
}

/// Rates must be finite and strictly positive
pub fn validate_rate(rate: f64) -> Result<f64, SourceError> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(SourceError::Validation(format!(
            "rate must be a positive number, got {}",
            rate
        )));
    }
    Ok(rate)
}

fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!("Failed to build HTTP client with timeout ({}), using defaults", e);
            reqwest::Client::new()
        })
}

/// Map a transport-level reqwest failure
fn map_request_error(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout(e.to_string())
    } else {
        SourceError::Network(e.to_string())
    }
}

/// Classify a non-2xx response
async fn handle_error_response(source: &str, status: reqwest::StatusCode, response: reqwest::Response) -> SourceError {
    let status_code = status.as_u16();
    let retry_after_ms = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(|secs| secs * 1000);
    let body_text = response.text().await.unwrap_or_default();

    match status_code {
        429 => {
            warn!("{} rate limited us, retry after {:?} ms", source, retry_after_ms);
            SourceError::RateLimited {
                retry_after_ms: retry_after_ms.unwrap_or(1000),
            }
        }
        500..=599 => {
            warn!("{} server error {}: {}", source, status_code, body_text);
            SourceError::Server {
                status: status_code,
                body: body_text,
            }
        }
        _ => SourceError::Http {
            status: status_code,
            body: body_text,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rate() {
        assert_eq!(validate_rate(42.5).unwrap(), 42.5);
        assert!(matches!(validate_rate(0.0), Err(SourceError::Validation(_))));
        assert!(matches!(validate_rate(-3.0), Err(SourceError::Validation(_))));
        assert!(matches!(validate_rate(f64::NAN), Err(SourceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_fixed_source() {
        let source = FixedRateSource::new(50_000.0);
        assert_eq!(source.name(), "fixed");
        assert_eq!(source.fetch_usd_rate().await.unwrap(), 50_000.0);
        assert!(FixedRateSource::new(0.0).fetch_usd_rate().await.is_err());
    }

    #[test]
    fn test_source_from_config_picks_provider() {
        let config = SourceConfig {
            kind: SourceKind::Coinbase,
            base_url: None,
            http_timeout: Duration::from_secs(1),
        };
        assert_eq!(source_from_config(&config).name(), "coinbase");
    }
}
