//! Token-bucket rate limiting.
//!
//! One bucket per key (client IP and/or endpoint, per [`RateLimitConfig`]).
//! Buckets refill continuously at `rate` tokens per second up to `capacity`.
//! The limiter is shared across concurrent dispatches; each bucket is guarded
//! by its `DashMap` shard lock.

use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;
use warden_types::config::RateLimitConfig;

/// A limiter whose buckets could never yield a token.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RateLimitConfigError {
    #[error("rate_limit.rate must be a positive number of tokens per second, got {0}")]
    Rate(f64),
    #[error("rate_limit.capacity must be at least 1")]
    Capacity,
}

/// Returned when a bucket has no token available.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("rate limit exceeded, retry after {}s", retry_after_secs(.retry_after))]
pub struct RateLimitError {
    /// Time until the bucket holds one token again.
    pub retry_after: Duration,
}

fn retry_after_secs(wait: &Duration) -> u64 {
    wait.as_secs_f64().ceil().max(1.0) as u64
}

impl RateLimitError {
    /// Whole seconds for a `Retry-After` header (at least 1).
    pub fn retry_after_secs(&self) -> u64 {
        retry_after_secs(&self.retry_after)
    }
}

// ---------------------------------------------------------------------------
// TokenBucket
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            rate,
            capacity,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token, or report how long until one is available.
    pub fn try_take(&mut self) -> Result<(), Duration> {
        self.refill(Instant::now());
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        if self.rate <= 0.0 {
            return Err(Duration::MAX);
        }
        Err(Duration::from_secs_f64((1.0 - self.tokens) / self.rate))
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_refill)
    }
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<String, TokenBucket>,
}

impl RateLimiter {
    /// Fails when the limiter is enabled with a non-positive rate or a
    /// capacity below one token.
    pub fn new(config: RateLimitConfig) -> Result<Self, RateLimitConfigError> {
        if config.enabled {
            if !(config.rate.is_finite() && config.rate > 0.0) {
                return Err(RateLimitConfigError::Rate(config.rate));
            }
            if config.capacity < 1 {
                return Err(RateLimitConfigError::Capacity);
            }
        }
        Ok(Self {
            config,
            buckets: DashMap::new(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Bucket key for a request, honouring `by_ip` / `by_endpoint`.
    /// With both disabled every request shares one global bucket.
    pub fn key(&self, ip: Option<&str>, endpoint: Option<&str>) -> String {
        let mut parts = Vec::with_capacity(2);
        if self.config.by_ip {
            parts.push(format!("ip:{}", ip.unwrap_or("unknown")));
        }
        if self.config.by_endpoint {
            parts.push(format!("endpoint:{}", endpoint.unwrap_or("unknown")));
        }
        if parts.is_empty() {
            "global".to_string()
        } else {
            parts.join("|")
        }
    }

    /// Take a token from `key`'s bucket without waiting.
    pub fn try_acquire(&self, key: &str) -> Result<(), RateLimitError> {
        if !self.config.enabled {
            return Ok(());
        }
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.config.rate, f64::from(self.config.capacity)));
        bucket.try_take().map_err(|retry_after| RateLimitError { retry_after })
    }

    /// Wait until `key`'s bucket yields a token. Used for client-side pacing.
    /// Returns the error instead of sleeping when the bucket never refills.
    pub async fn acquire(&self, key: &str) -> Result<(), RateLimitError> {
        loop {
            match self.try_acquire(key) {
                Ok(()) => return Ok(()),
                Err(e) if e.retry_after == Duration::MAX => return Err(e),
                Err(e) => {
                    tracing::debug!(key, wait_ms = e.retry_after.as_millis() as u64, "rate limited, waiting");
                    tokio::time::sleep(e.retry_after).await;
                }
            }
        }
    }

    /// Drop buckets untouched for longer than `window_secs`. Returns how many
    /// were removed.
    pub fn evict_idle(&self) -> usize {
        let window = Duration::from_secs(self.config.window_secs);
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.idle_for(now) <= window);
        before - self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rate: f64, capacity: u32) -> RateLimitConfig {
        RateLimitConfig {
            rate,
            capacity,
            window_secs: 60,
            ..RateLimitConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_refill() {
        let limiter = RateLimiter::new(config(2.0, 3)).unwrap();
        for _ in 0..3 {
            limiter.try_acquire("k").unwrap();
        }
        let err = limiter.try_acquire("k").unwrap_err();
        assert_eq!(err.retry_after, Duration::from_millis(500));
        assert_eq!(err.retry_after_secs(), 1);

        tokio::time::advance(Duration::from_millis(500)).await;
        limiter.try_acquire("k").unwrap();
        assert!(limiter.try_acquire("k").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_have_independent_buckets() {
        let limiter = RateLimiter::new(config(1.0, 1)).unwrap();
        limiter.try_acquire("a").unwrap();
        assert!(limiter.try_acquire("a").is_err());
        limiter.try_acquire("b").unwrap();
        assert_eq!(limiter.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_token() {
        let limiter = RateLimiter::new(config(10.0, 1)).unwrap();
        limiter.acquire("k").await.unwrap();
        let start = Instant::now();
        limiter.acquire("k").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_idle_buckets() {
        let limiter = RateLimiter::new(config(1.0, 5)).unwrap();
        limiter.try_acquire("old").unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        limiter.try_acquire("fresh").unwrap();
        assert_eq!(limiter.evict_idle(), 1);
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_disabled_limiter_always_allows() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: false,
            ..config(0.0, 0)
        })
        .unwrap();
        for _ in 0..100 {
            limiter.try_acquire("k").unwrap();
        }
        assert!(limiter.is_empty());
    }

    #[test]
    fn test_key_composition() {
        let both = RateLimiter::new(RateLimitConfig::default()).unwrap();
        assert_eq!(
            both.key(Some("10.0.0.1"), Some("/executor/run")),
            "ip:10.0.0.1|endpoint:/executor/run"
        );
        let none = RateLimiter::new(RateLimitConfig {
            by_ip: false,
            by_endpoint: false,
            ..RateLimitConfig::default()
        })
        .unwrap();
        assert_eq!(none.key(Some("10.0.0.1"), None), "global");
    }

    #[test]
    fn test_rejects_limits_that_never_refill() {
        assert_eq!(
            RateLimiter::new(config(0.0, 5)).unwrap_err(),
            RateLimitConfigError::Rate(0.0)
        );
        assert!(RateLimiter::new(config(-1.0, 5)).is_err());
        assert!(RateLimiter::new(config(f64::NAN, 5)).is_err());
        assert_eq!(
            RateLimiter::new(config(1.0, 0)).unwrap_err(),
            RateLimitConfigError::Capacity
        );
    }

    #[test]
    fn test_bucket_without_refill_reports_unbounded_wait() {
        let mut bucket = TokenBucket::new(0.0, 1.0);
        bucket.try_take().unwrap();
        assert_eq!(bucket.try_take().unwrap_err(), Duration::MAX);
    }
}
