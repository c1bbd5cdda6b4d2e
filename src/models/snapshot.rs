//! Exchange rate snapshot model

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Satoshis per bitcoin
pub const SATS_PER_BTC: f64 = 100_000_000.0;

/// Source label used when the configured emergency rate stands in for a fetch
pub const EMERGENCY_SOURCE: &str = "emergency-default";

/// Immutable record of the USD/BTC exchange rate at a point in time.
///
/// Fields are private so the `satoshi_rate == usd_rate / 1e8` invariant can
/// only be established by [`RateSnapshot::new`]. Deserialization goes through
/// the same validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawSnapshot")]
pub struct RateSnapshot {
    usd_rate: f64,
    satoshi_rate: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    fetched_at: DateTime<Utc>,
    source: String,
}

/// Unvalidated wire shape of a snapshot
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSnapshot {
    usd_rate: f64,
    satoshi_rate: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    fetched_at: DateTime<Utc>,
    source: String,
}

impl TryFrom<RawSnapshot> for RateSnapshot {
    type Error = String;

    fn try_from(raw: RawSnapshot) -> Result<Self, Self::Error> {
        let snapshot = RateSnapshot::new(raw.usd_rate, raw.fetched_at, raw.source)?;
        let expected = snapshot.satoshi_rate;
        if (raw.satoshi_rate - expected).abs() > expected * 1e-9 {
            return Err(format!(
                "satoshiRate {} does not match usdRate {}",
                raw.satoshi_rate, raw.usd_rate
            ));
        }
        Ok(snapshot)
    }
}

impl RateSnapshot {
    /// Build a snapshot from a USD-per-BTC rate.
    /// Rejects non-finite and non-positive rates. `fetched_at` is kept to the
    /// millisecond, the precision it is stored and sent with.
    pub fn new(usd_rate: f64, fetched_at: DateTime<Utc>, source: impl Into<String>) -> Result<Self, String> {
        if !usd_rate.is_finite() || usd_rate <= 0.0 {
            return Err(format!("rate must be a positive number, got {}", usd_rate));
        }
        Ok(Self {
            usd_rate,
            satoshi_rate: usd_rate / SATS_PER_BTC,
            fetched_at: fetched_at.trunc_subsecs(3),
            source: source.into(),
        })
    }

    /// USD value of one bitcoin
    pub fn usd_rate(&self) -> f64 {
        self.usd_rate
    }

    /// USD value of one satoshi
    pub fn satoshi_rate(&self) -> f64 {
        self.satoshi_rate
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_emergency(&self) -> bool {
        self.source == EMERGENCY_SOURCE
    }
}
