//! Eviction retry policy

use std::time::Duration;

use rand::Rng;

use crate::config::DrainConfig;

/// Bounded exponential backoff for a single pod's evictions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &DrainConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Delay before the retry that follows `attempt` (1-based): base * 2^(attempt-1), capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(2_u32.saturating_pow(exponent));
        delay.min(self.max_delay)
    }

    /// True while another attempt is allowed after `attempts` tries
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Spread a delay uniformly over `[delay/2, delay]` so concurrent workers
/// hitting the same disruption budget do not retry in lockstep
pub fn jittered(delay: Duration) -> Duration {
    let max = delay.as_millis() as u64;
    if max < 2 {
        return delay;
    }
    let millis = rand::thread_rng().gen_range(max / 2..=max);
    Duration::from_millis(millis)
}
