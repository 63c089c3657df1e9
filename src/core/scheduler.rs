//! Clock and fixed-interval scheduler.
//!
//! The scheduler owns its interval; cancellation is passed in explicitly.
//! Ticks never stack up: a pass that overruns the interval is followed by
//! the next pass as soon as it finishes, and the cadence restarts from
//! there. Cancellation is only raced against the wait between passes, so a
//! running pass always finishes.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ConfigError;

/// Source of the current time for a pass
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Drives a pass callback once per interval until cancelled
#[derive(Debug, Clone)]
pub struct Scheduler {
    interval: Duration,
}

impl Scheduler {
    /// Fails on a zero interval; that is a startup error, not something to retry
    pub fn new(interval: Duration) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "check_interval_seconds",
                value: "0".to_string(),
                reason: "must be a positive number of seconds".to_string(),
            });
        }
        Ok(Self { interval })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run passes until `cancel` fires. The first pass starts immediately.
    /// Returns the number of passes run.
    pub async fn run<F, Fut>(&self, cancel: CancellationToken, mut pass: F) -> u64
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut passes = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            passes += 1;
            debug!(pass = passes, "Tick");
            pass(cancel.clone()).await;
        }

        info!(passes, "Scheduler stopped");
        passes
    }
}
