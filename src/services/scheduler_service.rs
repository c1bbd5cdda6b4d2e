//! Recurring background refresh of the rate cache
//!
//! The schedule is persisted as an alarm record so a restarted process picks
//! up the existing cadence instead of creating a second one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::db::KeyValueStore;
use crate::services::cache_service::RateCache;

/// Store key of the refresh alarm
pub const ALARM_KEY: &str = "satlens:alarm:price-refresh";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmRecord {
    pub period_secs: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub next_fire_at: DateTime<Utc>,
}

/// Handle to the running refresh task
pub struct RefreshScheduler {
    handle: JoinHandle<()>,
}

impl RefreshScheduler {
    /// Restore or create the alarm and start refreshing `cache` every `period`
    pub async fn start(cache: RateCache, store: Arc<dyn KeyValueStore>, period: Duration) -> Self {
        let period = period.max(Duration::from_secs(1));
        let first_delay = restore_or_create(store.as_ref(), period).await;
        info!(
            "⏰ Starting rate refresh scheduler (period: {}s, first run in {}ms)",
            period.as_secs(),
            first_delay.as_millis()
        );

        let handle = tokio::spawn(run(cache, store, period, first_delay));
        Self { handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Delay until the first tick.
///
/// An existing alarm with the same period keeps its next fire time; anything
/// else is replaced by a new alarm that fires immediately.
async fn restore_or_create(store: &dyn KeyValueStore, period: Duration) -> Duration {
    let existing = match store.get(ALARM_KEY).await {
        Ok(Some(raw)) => serde_json::from_str::<AlarmRecord>(&raw).ok(),
        Ok(None) => None,
        Err(e) => {
            warn!("Failed to read refresh alarm: {}", e);
            None
        }
    };

    if let Some(alarm) = existing {
        if alarm.period_secs == period.as_secs() {
            let remaining = (alarm.next_fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            debug!("Reusing refresh alarm, next fire at {}", alarm.next_fire_at.to_rfc3339());
            return remaining.min(period);
        }
        info!(
            "Refresh period changed from {}s to {}s, recreating alarm",
            alarm.period_secs,
            period.as_secs()
        );
    }

    save_alarm(store, period, Utc::now()).await;
    Duration::ZERO
}

async fn save_alarm(store: &dyn KeyValueStore, period: Duration, next_fire_at: DateTime<Utc>) {
    let alarm = AlarmRecord {
        period_secs: period.as_secs(),
        next_fire_at,
    };
    let raw = match serde_json::to_string(&alarm) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Failed to serialize refresh alarm: {}", e);
            return;
        }
    };
    if let Err(e) = store.set(ALARM_KEY, raw).await {
        warn!("Failed to persist refresh alarm: {}", e);
    }
}

async fn run(cache: RateCache, store: Arc<dyn KeyValueStore>, period: Duration, first_delay: Duration) {
    let mut timer = interval_at(Instant::now() + first_delay, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        timer.tick().await;

        match cache.refresh().await {
            Ok(snapshot) => debug!("Scheduled refresh got {} USD/BTC", snapshot.usd_rate()),
            Err(e) => warn!("Scheduled refresh failed: {}", e),
        }

        let next = Utc::now() + chrono::Duration::from_std(period).unwrap_or_else(|_| chrono::Duration::zero());
        save_alarm(store.as_ref(), period, next).await;
    }
}
