use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::models::CacheEntry;

/// Volatility-adjusted rule deciding how long a cached rate may be reused.
///
/// Volatility is the largest relative move between consecutive rates in the
/// recent history. Calm markets get `max_ttl`, volatile ones `min_ttl`, and
/// anything in between is interpolated linearly.
#[derive(Debug, Clone, PartialEq)]
pub struct FreshnessPolicy {
    /// TTL used until at least two rates have been observed
    pub default_ttl: Duration,
    pub min_ttl: Duration,
    pub max_ttl: Duration,
    /// Relative move at or below which the market counts as calm
    pub calm_volatility: f64,
    /// Relative move at or above which the market counts as volatile
    pub volatile_volatility: f64,
    /// Number of recent rates kept for the volatility estimate
    pub history_len: usize,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(5 * 60),
            min_ttl: Duration::from_secs(60),
            max_ttl: Duration::from_secs(15 * 60),
            calm_volatility: 0.002,
            volatile_volatility: 0.02,
            history_len: 12,
        }
    }
}

impl FreshnessPolicy {
    /// Fix up inverted bounds coming from configuration
    pub fn normalized(mut self) -> Self {
        if self.min_ttl > self.max_ttl {
            std::mem::swap(&mut self.min_ttl, &mut self.max_ttl);
        }
        if self.calm_volatility > self.volatile_volatility {
            std::mem::swap(&mut self.calm_volatility, &mut self.volatile_volatility);
        }
        self.default_ttl = self.default_ttl.clamp(self.min_ttl, self.max_ttl);
        self.history_len = self.history_len.max(2);
        self
    }

    /// Largest relative move between consecutive rates, oldest first
    pub fn volatility(rates: &[f64]) -> Option<f64> {
        if rates.len() < 2 {
            return None;
        }
        rates
            .windows(2)
            .filter(|pair| pair[0] > 0.0)
            .map(|pair| ((pair[1] - pair[0]) / pair[0]).abs())
            .fold(None, |max: Option<f64>, v| Some(max.map_or(v, |m| m.max(v))))
    }

    /// TTL for the given recent rates
    pub fn ttl(&self, rates: &[f64]) -> Duration {
        let volatility = match Self::volatility(rates) {
            Some(v) => v,
            None => return self.default_ttl,
        };

        if volatility <= self.calm_volatility {
            return self.max_ttl;
        }
        if volatility >= self.volatile_volatility {
            return self.min_ttl;
        }

        let span = self.volatile_volatility - self.calm_volatility;
        let position = (volatility - self.calm_volatility) / span;
        let min = self.min_ttl.as_secs_f64();
        let max = self.max_ttl.as_secs_f64();
        Duration::from_secs_f64(max - (max - min) * position)
    }

    /// Whether `entry` may be served without refetching at `now`
    pub fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>, rates: &[f64]) -> bool {
        let ttl = match chrono::Duration::from_std(self.ttl(rates)) {
            Ok(ttl) => ttl,
            Err(_) => return true,
        };
        entry.age(now) < ttl
    }
}
