use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::Client as HttpClient;
use std::time::Duration;
use tracing::debug;

use super::models::{parse_simple_price, ASSET_ID, VS_CURRENCY};
use crate::api::{build_http_client, handle_error_response, map_request_error, RateSource};
use crate::utils::errors::SourceError;

/// CoinGecko client fetching the spot BTC/USD rate
pub struct CoinGeckoClient {
    http_client: HttpClient,
    base_url: String,
}

impl CoinGeckoClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.coingecko.com/api/v3";

    pub fn new(timeout: Duration) -> Self {
        Self::with_base_url(Self::DEFAULT_BASE_URL.to_string(), timeout)
    }

    /// Create a client with custom base URL (for testing or a proxy)
    pub fn with_base_url(base_url: String, timeout: Duration) -> Self {
        Self {
            http_client: build_http_client(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// GET /simple/price?ids=bitcoin&vs_currencies=usd
    async fn get_simple_price(&self) -> Result<f64, SourceError> {
        let url = format!("{}/simple/price", self.base_url);
        debug!("Fetching rate from {}", url);

        let response = self
            .http_client
            .get(&url)
            .query(&[("ids", ASSET_ID), ("vs_currencies", VS_CURRENCY)])
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(handle_error_response(self.name(), status, response).await);
        }

        let body = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| SourceError::Validation(format!("Failed to parse response: {}", e)))?;

        parse_simple_price(&body)
    }
}

#[async_trait]
impl RateSource for CoinGeckoClient {
    fn name(&self) -> &str {
        "coingecko"
    }

    async fn fetch_usd_rate(&self) -> Result<f64, SourceError> {
        self.get_simple_price().await
    }
}
