//! Per-route request throttling.
//!
//! Buckets are keyed by route, never by client, so no per-requester state
//! exists to correlate. A bucket refills all at once when its interval has
//! elapsed rather than trickling.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Requests allowed per route per interval.
pub const DEFAULT_CAPACITY: u32 = 100;

/// Interval after which a bucket is reset to full (seconds).
pub const DEFAULT_REFILL_SECS: u64 = 60;

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Tokens in a full bucket.
    pub capacity: u32,
    /// Time after which a bucket is reset to `capacity`.
    pub refill_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            refill_interval: Duration::from_secs(DEFAULT_REFILL_SECS),
        }
    }
}

#[derive(Debug)]
struct RateBucket {
    tokens: u32,
    last_refill: Instant,
}

/// Token buckets by route key.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, RateBucket>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Limiter with the given capacity and interval.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Take one token for `route` if available.
    pub async fn allow(&self, route: &str) -> bool {
        self.allow_at(route, Instant::now()).await
    }

    /// [`allow`](Self::allow) at an explicit instant.
    pub async fn allow_at(&self, route: &str, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().await;

        let bucket = buckets.entry(route.to_string()).or_insert_with(|| RateBucket {
            tokens: self.config.capacity,
            last_refill: now,
        });

        if now.saturating_duration_since(bucket.last_refill) > self.config.refill_interval {
            bucket.tokens = self.config.capacity;
            bucket.last_refill = now;
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Tokens left for `route`; full capacity for an unseen route.
    pub async fn remaining(&self, route: &str) -> u32 {
        self.buckets
            .lock()
            .await
            .get(route)
            .map_or(self.config.capacity, |b| b.tokens)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
