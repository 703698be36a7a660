use std::time::{Duration, Instant};

use dashmap::DashMap;
use pf_adapters::RateQuota;
use tracing::warn;

// ---------------------------------------------------------------------------
// Per-platform publish rate limiting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(burst: f64) -> Self {
        Self {
            tokens: burst,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, tokens_per_second: f64, burst: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * tokens_per_second).min(burst);
        self.last_refill = now;
    }

    fn try_consume(&mut self, tokens_per_second: f64, burst: f64) -> Result<(), Duration> {
        self.refill(tokens_per_second, burst);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / tokens_per_second))
        }
    }
}

/// Token buckets keyed by platform, seeded from each adapter's advertised
/// quota. Worker-local state: buckets are rebuilt full on startup, which can
/// briefly overshoot a vendor quota after a restart but never under steady
/// state.
#[derive(Debug, Default)]
pub struct PublishRateLimiter {
    buckets: DashMap<String, TokenBucket>,
}

impl PublishRateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Try to take one publish token for `platform` under `quota`. On
    /// refusal returns how long until a token is available.
    pub fn check(&self, platform: &str, quota: RateQuota) -> Result<(), Duration> {
        let tokens_per_second = quota.limit as f64 / quota.window_secs.max(1) as f64;
        let burst = quota.limit.max(1) as f64;

        let mut bucket = self
            .buckets
            .entry(platform.to_string())
            .or_insert_with(|| TokenBucket::new(burst));

        bucket.try_consume(tokens_per_second, burst).map_err(|retry_after| {
            warn!(platform, ?retry_after, "publish rate limit exceeded");
            retry_after
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumes_until_burst_exhausted() {
        let limiter = PublishRateLimiter::new();
        let quota = RateQuota {
            limit: 3,
            window_secs: 3600,
        };
        assert!(limiter.check("tiktok", quota).is_ok());
        assert!(limiter.check("tiktok", quota).is_ok());
        assert!(limiter.check("tiktok", quota).is_ok());

        let retry_after = limiter.check("tiktok", quota).expect_err("limited");
        assert!(retry_after > Duration::from_secs(0));
    }

    #[test]
    fn platforms_have_independent_buckets() {
        let limiter = PublishRateLimiter::new();
        let quota = RateQuota {
            limit: 1,
            window_secs: 3600,
        };
        assert!(limiter.check("tiktok", quota).is_ok());
        assert!(limiter.check("tiktok", quota).is_err());
        assert!(limiter.check("instagram", quota).is_ok());
    }
}
