use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::api::RateSource;
use crate::db::KeyValueStore;
use crate::models::{CacheEntry, RateSnapshot, CACHE_KEY, EMERGENCY_SOURCE};
use crate::utils::backoff::Backoff;
use crate::utils::config::CacheConfig;
use crate::utils::errors::{CacheError, SourceError};

type SharedFetch = Shared<BoxFuture<'static, Result<RateSnapshot, CacheError>>>;

/// What the cache currently holds, without triggering a fetch
#[derive(Debug, Clone)]
pub struct CacheStatus {
    pub snapshot: RateSnapshot,
    pub age: Duration,
    pub ttl: Duration,
    pub fresh: bool,
}

/// Owner of the last-known rate.
///
/// Serves fresh cached snapshots without network access, fetches when the
/// entry is stale or missing, and falls back to stale data when the fetch
/// fails. Concurrent callers share a single in-flight fetch.
#[derive(Clone)]
pub struct RateCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    source: Arc<dyn RateSource>,
    store: Arc<dyn KeyValueStore>,
    config: CacheConfig,
    backoff: Backoff,
    /// Last entry seen or written; used when the store is unavailable
    memory: Mutex<Option<CacheEntry>>,
    /// Recent rates, oldest first, for the volatility estimate
    history: Mutex<VecDeque<f64>>,
    inflight: Mutex<Option<SharedFetch>>,
    network_fetches: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RateCache {
    pub fn new(source: Arc<dyn RateSource>, store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        let backoff = Backoff::from_config(&config.retry);
        Self {
            inner: Arc::new(CacheInner {
                source,
                store,
                config,
                backoff,
                memory: Mutex::new(None),
                history: Mutex::new(VecDeque::new()),
                inflight: Mutex::new(None),
                network_fetches: AtomicU64::new(0),
            }),
        }
    }

    /// Current snapshot, preferring a fresh cached copy.
    ///
    /// Fallback chain on fetch failure: stale cached entry, then the
    /// configured emergency rate, then the fetch error.
    pub async fn get_snapshot(&self) -> Result<RateSnapshot, CacheError> {
        let cached = self.inner.load_entry().await;

        if let Some(entry) = &cached {
            if self.inner.is_fresh(entry) {
                debug!("Serving cached rate {} from {}", entry.price_data.usd_rate(), entry.price_data.source());
                return Ok(entry.price_data.clone());
            }
            debug!("Cached rate is stale, fetching");
        }

        let error = match self.fetch_shared().await {
            Ok(snapshot) => return Ok(snapshot),
            Err(e) => e,
        };

        // The shared fetch may have been preceded by a successful one
        if let Some(entry) = self.inner.load_entry().await.or(cached) {
            warn!(
                "Rate fetch failed ({}), serving stale rate from {}",
                error,
                entry.cached_at.to_rfc3339()
            );
            return Ok(entry.price_data);
        }

        if let Some(rate) = self.inner.config.emergency_usd_rate {
            warn!("Rate fetch failed ({}) with no cached rate, using emergency rate {}", error, rate);
            if let Ok(snapshot) = RateSnapshot::new(rate, Utc::now(), EMERGENCY_SOURCE) {
                return Ok(snapshot);
            }
        }

        Err(error)
    }

    /// Fetch and persist unconditionally, joining an in-flight fetch if any
    pub async fn refresh(&self) -> Result<RateSnapshot, CacheError> {
        self.fetch_shared().await
    }

    /// Cached snapshot and its freshness, never fetching
    pub async fn peek(&self) -> Option<CacheStatus> {
        let entry = self.inner.load_entry().await?;
        let age = entry.age(Utc::now()).to_std().unwrap_or_default();
        let ttl = self.current_ttl();
        Some(CacheStatus {
            fresh: age < ttl,
            snapshot: entry.price_data,
            age,
            ttl,
        })
    }

    /// TTL implied by the recent rate history
    pub fn current_ttl(&self) -> Duration {
        let rates: Vec<f64> = lock(&self.inner.history).iter().copied().collect();
        self.inner.config.freshness.ttl(&rates)
    }

    /// Number of calls made to the rate source, retries included
    pub fn network_fetches(&self) -> u64 {
        self.inner.network_fetches.load(Ordering::SeqCst)
    }

    fn fetch_shared(&self) -> SharedFetch {
        let mut inflight = lock(&self.inner.inflight);
        if let Some(fetch) = inflight.as_ref() {
            debug!("Joining in-flight rate fetch");
            return fetch.clone();
        }

        let inner = Arc::clone(&self.inner);
        let fetch = async move {
            let result = inner.fetch_and_persist().await;
            *lock(&inner.inflight) = None;
            result
        }
        .boxed()
        .shared();

        *inflight = Some(fetch.clone());
        fetch
    }
}

impl CacheInner {
    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        let rates: Vec<f64> = lock(&self.history).iter().copied().collect();
        self.config.freshness.is_fresh(entry, Utc::now(), &rates)
    }

    /// Newest usable entry from the store or the in-memory mirror
    async fn load_entry(&self) -> Option<CacheEntry> {
        let stored = match self.store.get(CACHE_KEY).await {
            Ok(Some(raw)) => {
                let entry = CacheEntry::from_stored(&raw);
                if entry.is_none() {
                    debug!("Discarding malformed or outdated cache entry");
                }
                entry
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Cache read failed, using in-memory copy: {}", e);
                None
            }
        };

        let memory = lock(&self.memory).clone();
        match (stored, memory) {
            (Some(s), Some(m)) => Some(if m.cached_at > s.cached_at { m } else { s }),
            (s, m) => s.or(m),
        }
    }

    async fn fetch_and_persist(&self) -> Result<RateSnapshot, CacheError> {
        let rate = self.fetch_with_retry().await?;
        let now = Utc::now();
        let snapshot = RateSnapshot::new(rate, now, self.source.name())
            .map_err(|e| CacheError::Fetch(SourceError::Validation(e)))?;

        self.record_rate(rate);
        self.persist(CacheEntry::new(snapshot.clone(), now)).await;
        info!("Fetched rate {} USD/BTC from {}", rate, snapshot.source());
        Ok(snapshot)
    }

    async fn fetch_with_retry(&self) -> Result<f64, SourceError> {
        let max_retries = self.config.retry.max_retries;
        let mut attempt = 0;
        loop {
            self.network_fetches.fetch_add(1, Ordering::SeqCst);
            match self.source.fetch_usd_rate().await {
                Ok(rate) => return Ok(rate),
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    let delay = self.backoff.delay_for(attempt, &e);
                    warn!(
                        "Rate fetch from {} failed ({}), retry {}/{} in {}ms",
                        self.source.name(),
                        e,
                        attempt + 1,
                        max_retries,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!("Rate fetch from {} failed: {}", self.source.name(), e);
                    return Err(e);
                }
            }
        }
    }

    fn record_rate(&self, rate: f64) {
        let mut history = lock(&self.history);
        history.push_back(rate);
        while history.len() > self.config.freshness.history_len {
            history.pop_front();
        }
    }

    async fn persist(&self, entry: CacheEntry) {
        *lock(&self.memory) = Some(entry.clone());
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to serialize cache entry: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.set(CACHE_KEY, raw).await {
            warn!("Cache write failed, keeping rate in memory only: {}", e);
        }
    }
}
