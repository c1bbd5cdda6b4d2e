//! Runtime configuration loaded from environment variables

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::services::freshness::FreshnessPolicy;

/// Which external rate source to query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    CoinGecko,
    Coinbase,
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "coingecko" => Ok(SourceKind::CoinGecko),
            "coinbase" => Ok(SourceKind::Coinbase),
            other => Err(format!("Unknown rate source: '{}'. Use: coingecko, coinbase", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Overrides the provider's default base URL
    pub base_url: Option<String>,
    pub http_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Extra attempts after the first one
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub freshness: FreshnessPolicy,
    pub retry: RetryConfig,
    /// Rate served, labelled as emergency data, when nothing else is available
    pub emergency_usd_rate: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct DisplayConfig {
    /// Decimals shown for whole-bitcoin figures
    pub btc_decimals: usize,
}

#[derive(Debug, Clone)]
pub struct PageConfig {
    pub request_timeout: Duration,
    pub debounce: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

/// Complete configuration for both halves of the pipeline
#[derive(Debug, Clone)]
pub struct Config {
    pub source: SourceConfig,
    pub cache: CacheConfig,
    pub display: DisplayConfig,
    pub page: PageConfig,
    pub refresh_period: Duration,
    pub store_path: PathBuf,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            freshness: FreshnessPolicy::default(),
            retry: RetryConfig::default(),
            emergency_usd_rate: None,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { btc_decimals: 4 }
    }
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            debounce: Duration::from_millis(500),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                kind: SourceKind::CoinGecko,
                base_url: None,
                http_timeout: Duration::from_secs(10),
            },
            cache: CacheConfig::default(),
            display: DisplayConfig::default(),
            page: PageConfig::default(),
            refresh_period: Duration::from_secs(5 * 60),
            store_path: PathBuf::from("satlens-store.json"),
        }
    }
}

impl Config {
    /// Load configuration from `SATLENS_*` environment variables.
    ///
    /// Every variable is optional; unset or unparsable values keep the default.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let defaults = Config::default();
        let freshness = FreshnessPolicy {
            default_ttl: env_secs("SATLENS_TTL_DEFAULT_SECS", defaults.cache.freshness.default_ttl),
            min_ttl: env_secs("SATLENS_TTL_MIN_SECS", defaults.cache.freshness.min_ttl),
            max_ttl: env_secs("SATLENS_TTL_MAX_SECS", defaults.cache.freshness.max_ttl),
            calm_volatility: env_parse("SATLENS_CALM_VOLATILITY", defaults.cache.freshness.calm_volatility),
            volatile_volatility: env_parse(
                "SATLENS_HIGH_VOLATILITY",
                defaults.cache.freshness.volatile_volatility,
            ),
            history_len: env_parse("SATLENS_VOLATILITY_WINDOW", defaults.cache.freshness.history_len),
        };

        let emergency_usd_rate = env::var("SATLENS_EMERGENCY_USD_RATE")
            .ok()
            .and_then(|raw| match raw.parse::<f64>() {
                Ok(rate) if rate.is_finite() && rate > 0.0 => Some(rate),
                _ => {
                    warn!("Ignoring invalid SATLENS_EMERGENCY_USD_RATE: {}", raw);
                    None
                }
            });

        Self {
            source: SourceConfig {
                kind: env_parse("SATLENS_RATE_SOURCE", defaults.source.kind),
                base_url: env::var("SATLENS_RATE_SOURCE_URL").ok().filter(|s| !s.is_empty()),
                http_timeout: env_millis("SATLENS_HTTP_TIMEOUT_MS", defaults.source.http_timeout),
            },
            cache: CacheConfig {
                freshness: freshness.normalized(),
                retry: RetryConfig {
                    max_retries: env_parse("SATLENS_MAX_RETRIES", defaults.cache.retry.max_retries),
                    base_delay: env_millis("SATLENS_BACKOFF_BASE_MS", defaults.cache.retry.base_delay),
                    max_delay: env_millis("SATLENS_BACKOFF_MAX_MS", defaults.cache.retry.max_delay),
                },
                emergency_usd_rate,
            },
            display: DisplayConfig {
                btc_decimals: env_parse("SATLENS_BTC_DECIMALS", defaults.display.btc_decimals).min(8),
            },
            page: PageConfig {
                request_timeout: env_millis("SATLENS_REQUEST_TIMEOUT_MS", defaults.page.request_timeout),
                debounce: env_millis("SATLENS_DEBOUNCE_MS", defaults.page.debounce),
                retry_attempts: env_parse("SATLENS_PAGE_RETRIES", defaults.page.retry_attempts),
                retry_delay: env_millis("SATLENS_PAGE_RETRY_DELAY_MS", defaults.page.retry_delay),
            },
            refresh_period: env_secs("SATLENS_REFRESH_PERIOD_SECS", defaults.refresh_period),
            store_path: env::var("SATLENS_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.store_path),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!("Invalid value for {}: '{}', using default", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_parse(key, default.as_secs()))
}

fn env_millis(key: &str, default: Duration) -> Duration {
    Duration::from_millis(env_parse(key, default.as_millis() as u64))
}
