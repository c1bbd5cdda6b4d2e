/// Exponential backoff with jitter for retrying rate fetches
use rand::Rng;
use std::time::Duration;

use crate::utils::config::RetryConfig;
use crate::utils::errors::SourceError;

pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max: max.max(base) }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.base_delay, config.max_delay)
    }

    /// Deterministic part of the delay before retry number `attempt` (0-based)
    fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay before retry number `attempt`, between half and all of the ceiling
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        let half = ceiling / 2;
        let jitter_ms = half.as_millis() as u64;
        if jitter_ms == 0 {
            return ceiling;
        }
        half + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    /// Delay honoring a server-provided retry hint
    pub fn delay_for(&self, attempt: u32, error: &SourceError) -> Duration {
        let delay = self.delay(attempt);
        match error {
            SourceError::RateLimited { retry_after_ms } => {
                delay.max(Duration::from_millis(*retry_after_ms)).min(self.max)
            }
            _ => delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceiling_doubles_until_capped() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000));
        assert_eq!(backoff.ceiling(0), Duration::from_millis(100));
        assert_eq!(backoff.ceiling(1), Duration::from_millis(200));
        assert_eq!(backoff.ceiling(3), Duration::from_millis(800));
        assert_eq!(backoff.ceiling(4), Duration::from_millis(1000));
        assert_eq!(backoff.ceiling(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_delay_stays_within_jitter_band() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(10));
        for attempt in 0..5 {
            let ceiling = backoff.ceiling(attempt);
            let delay = backoff.delay(attempt);
            assert!(delay <= ceiling);
            assert!(delay >= ceiling / 2);
        }
    }

    #[test]
    fn test_rate_limit_hint_is_honored() {
        let backoff = Backoff::new(Duration::from_millis(10), Duration::from_secs(5));
        let error = SourceError::RateLimited { retry_after_ms: 2000 };
        assert_eq!(backoff.delay_for(0, &error), Duration::from_millis(2000));
        let huge = SourceError::RateLimited { retry_after_ms: 60_000 };
        assert_eq!(backoff.delay_for(0, &huge), Duration::from_secs(5));
    }
}
