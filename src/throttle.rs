//! Politeness throttling between page fetches.
//!
//! The delay is random within a configured range and grows after failures.
//! Sleeping goes through [`Sleeper`] so the policy can be exercised without
//! waiting on the clock.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

/// Uniform random delay in `[min_secs, max_secs]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayPolicy {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl DelayPolicy {
    pub const fn new(min_secs: f64, max_secs: f64) -> Self {
        Self { min_secs, max_secs }
    }

    pub const fn none() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let min = clamp_secs(self.min_secs);
        let max = clamp_secs(self.max_secs).max(min);
        if max <= 0.0 {
            return Duration::ZERO;
        }
        let secs = if max > min { rng.gen_range(min..=max) } else { min };
        secs_to_duration(secs)
    }
}

/// Multiplies the delay after consecutive failures, up to `max_secs`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    pub multiplier: f64,
    pub max_secs: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            multiplier: 2.0,
            max_secs: 300.0,
        }
    }
}

impl Backoff {
    fn scale(&self, base: Duration, failures: u32) -> Duration {
        if failures == 0 || self.multiplier <= 1.0 {
            return base;
        }
        let factor = self.multiplier.powi(failures.min(16) as i32);
        let scaled = base.as_secs_f64() * factor;
        let cap = clamp_secs(self.max_secs).max(base.as_secs_f64());
        secs_to_duration(scaled.min(cap))
    }
}

/// Longest single pause, in seconds
pub const MAX_DELAY_SECS: f64 = 86_400.0;

fn clamp_secs(secs: f64) -> f64 {
    if secs.is_nan() {
        return 0.0;
    }
    secs.clamp(0.0, MAX_DELAY_SECS)
}

fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(clamp_secs(secs)).unwrap_or(Duration::ZERO)
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

pub struct Throttle {
    policy: DelayPolicy,
    backoff: Backoff,
    failures: Mutex<u32>,
    sleeper: Box<dyn Sleeper>,
}

impl Throttle {
    pub fn new(policy: DelayPolicy, backoff: Backoff) -> Self {
        Self::with_sleeper(policy, backoff, Box::new(TokioSleeper))
    }

    pub fn with_sleeper(policy: DelayPolicy, backoff: Backoff, sleeper: Box<dyn Sleeper>) -> Self {
        Self {
            policy,
            backoff,
            failures: Mutex::new(0),
            sleeper,
        }
    }

    /// Delay the next pause will use, given the current failure streak
    pub fn next_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let base = self.policy.sample(rng);
        self.backoff.scale(base, self.failure_streak())
    }

    pub async fn pause(&self) {
        let delay = self.next_delay(&mut rand::thread_rng());
        if delay.is_zero() {
            return;
        }
        info!("Waiting {:.2} seconds before the next request...", delay.as_secs_f64());
        self.sleeper.sleep(delay).await;
    }

    pub fn record_success(&self) {
        if let Ok(mut failures) = self.failures.lock() {
            *failures = 0;
        }
    }

    pub fn record_failure(&self) {
        if let Ok(mut failures) = self.failures.lock() {
            *failures = failures.saturating_add(1);
        }
    }

    pub fn failure_streak(&self) -> u32 {
        self.failures.lock().map(|f| *f).unwrap_or(0)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Arc;

    /// Records requested sleeps instead of sleeping
    #[derive(Clone, Default)]
    pub struct RecordingSleeper {
        pub slept: Arc<Mutex<Vec<Duration>>>,
    }

    impl RecordingSleeper {
        pub fn total(&self) -> usize {
            self.slept.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }
}
