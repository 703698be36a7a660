use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter:
/// `min(base * 2^(n-1), cap) * uniform(0.5, 1.5)` for attempt `n >= 1`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    base: Duration,
    cap: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn from_secs(base_secs: u64, cap_secs: u64) -> Self {
        Self::new(Duration::from_secs(base_secs), Duration::from_secs(cap_secs))
    }

    /// Delay before the next attempt after `attempt` failures.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        self.delay_with_jitter(attempt, jitter)
    }

    /// Deterministic variant for tests: `jitter` replaces the random factor.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let unjittered = self
            .base
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.cap);
        unjittered.mul_f64(jitter)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_secs(60, 3600)
    }
}
