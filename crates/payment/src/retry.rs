//! Exponential backoff with full jitter.

use std::time::Duration;

use rand::Rng;

/// Retry policy for transient charge failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempt budget, counting the first try.
    pub max_attempts: u32,

    /// Backoff before the second attempt.
    pub base_delay: Duration,

    /// Growth factor per subsequent attempt.
    pub multiplier: f64,

    /// Upper bound on any single backoff.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Returns the jittered backoff to sleep after a failed `attempt`
    /// (1-based).
    ///
    /// Full jitter: uniform in `[0, min(base * multiplier^(attempt-1),
    /// max_delay)]`, so concurrent retries spread out instead of
    /// thundering back together.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=capped))
    }

    /// The un-jittered ceiling for a given attempt, exposed for tests.
    pub fn max_backoff_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(exp.min(self.max_delay.as_secs_f64()))
    }
}
