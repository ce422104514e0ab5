//! Retry policy (C7, §4.4) — backoff schedule and retry decision,
//! generalized from `integration-service::retry::RetryPolicy` (the same
//! exponential-backoff-with-jitter shape, `calculate_delay`/`execute`) onto
//! the conductor's `ActionStatus` outcomes instead of raw HTTP results.

use crate::model::ActionStatus;
use common::config::RetryPolicyConfig;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryPolicyConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryPolicyConfig) -> Self {
        Self { config }
    }

    /// `min(maxDelay, initialDelay × backoffFactor^(attempt-1))`, then
    /// optionally jittered uniformly into `[0.5d, 1.0d]` (§4.4).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw_ms =
            self.config.initial_delay.as_millis() as f64 * self.config.backoff_factor.powi(exponent);
        let capped = Duration::from_millis(raw_ms as u64).min(self.config.max_delay);

        if self.config.use_jitter {
            let floor_ms = (capped.as_millis() as f64 * 0.5) as u64;
            let ceil_ms = capped.as_millis() as u64;
            if ceil_ms <= floor_ms {
                capped
            } else {
                let jittered_ms = rand::thread_rng().gen_range(floor_ms..=ceil_ms);
                Duration::from_millis(jittered_ms)
            }
        } else {
            capped
        }
    }

    /// `shouldRetry(attempt, result)`: only `RetriableFailure` outcomes are
    /// retried, and only while `attempt < maxAttempts` (§4.4).
    pub fn should_retry(&self, attempt: u32, status: ActionStatus) -> bool {
        status == ActionStatus::RetriableFailure && attempt < self.config.max_attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryPolicyConfig::default())
    }
}
