//! Persisted cache entry model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::snapshot::RateSnapshot;

/// Bumped whenever the persisted layout changes; older entries are discarded
pub const CACHE_SCHEMA_VERSION: u32 = 2;

/// Store key of the rate cache entry
pub const CACHE_KEY: &str = "satlens:price-cache";

/// A rate snapshot as persisted by the rate cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub price_data: RateSnapshot,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub cached_at: DateTime<Utc>,
    pub schema_version: u32,
}

impl CacheEntry {
    pub fn new(price_data: RateSnapshot, cached_at: DateTime<Utc>) -> Self {
        Self {
            price_data,
            cached_at,
            schema_version: CACHE_SCHEMA_VERSION,
        }
    }

    /// Parse a persisted entry.
    /// Returns None for malformed JSON, missing fields, an invalid snapshot or
    /// a schema version mismatch.
    pub fn from_stored(raw: &str) -> Option<Self> {
        let entry: CacheEntry = serde_json::from_str(raw).ok()?;
        if entry.schema_version != CACHE_SCHEMA_VERSION {
            return None;
        }
        Some(entry)
    }

    /// Age of the entry at `now`, clamped at zero for clock skew
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.cached_at).max(chrono::Duration::zero())
    }
}
