// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Token-bucket rate limiting per (user, operation).
//!
//! Each bucket starts full and refills continuously in proportion to
//! elapsed time, capped at capacity. A check consumes one token when one is
//! available and never errors; a denial is reported through logs, metrics
//! and [`Signal::RateLimitExceeded`].
//!
//! Buckets are created lazily on first use. Operations without an explicit
//! [`BucketConfig`] share the `api` budget.
//!
//! # Example
//!
//! ```
//! use highlight_sync::{RateLimiter, RateLimitConfig};
//!
//! let limiter = RateLimiter::new(RateLimitConfig::default());
//! for _ in 0..10 {
//!     assert!(limiter.check_limit("user-1", "sync"));
//! }
//! assert!(!limiter.check_limit("user-1", "sync"));
//! // Budgets are per user
//! assert!(limiter.check_limit("user-2", "sync"));
//! ```

use dashmap::DashMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::signals::{Signal, SignalBus};

/// Shape of one token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BucketConfig {
    pub capacity: u32,
    /// Tokens restored per `refill_interval`
    pub refill_tokens: u32,
    #[serde(with = "crate::config::duration_ms")]
    pub refill_interval: Duration,
}

impl BucketConfig {
    /// Sync uploads: 10 per minute.
    #[must_use]
    pub fn sync() -> Self {
        Self {
            capacity: 10,
            refill_tokens: 10,
            refill_interval: Duration::from_secs(60),
        }
    }

    /// Sign-in attempts: 5 per 15 minutes.
    #[must_use]
    pub fn auth() -> Self {
        Self {
            capacity: 5,
            refill_tokens: 5,
            refill_interval: Duration::from_secs(15 * 60),
        }
    }

    /// General API calls: 100 per minute.
    #[must_use]
    pub fn api() -> Self {
        Self {
            capacity: 100,
            refill_tokens: 100,
            refill_interval: Duration::from_secs(60),
        }
    }

    fn refill_amount(&self, elapsed: Duration) -> f64 {
        let interval = self.refill_interval.as_secs_f64();
        if interval <= 0.0 {
            return f64::from(self.capacity);
        }
        elapsed.as_secs_f64() / interval * f64::from(self.refill_tokens)
    }
}

/// Bucket table keyed by operation name.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub operations: HashMap<String, BucketConfig>,
    /// Used for operations missing from `operations`
    pub fallback: BucketConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let operations = HashMap::from([
            ("sync".to_string(), BucketConfig::sync()),
            ("auth".to_string(), BucketConfig::auth()),
            ("api".to_string(), BucketConfig::api()),
        ]);
        Self {
            operations,
            fallback: BucketConfig::api(),
        }
    }
}

impl RateLimitConfig {
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>, bucket: BucketConfig) -> Self {
        self.operations.insert(operation.into(), bucket);
        self
    }

    #[must_use]
    pub fn bucket_for(&self, operation: &str) -> BucketConfig {
        self.operations
            .get(operation)
            .copied()
            .unwrap_or(self.fallback)
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    config: BucketConfig,
    last_refill: Instant,
}

impl Bucket {
    fn full(config: BucketConfig, now: Instant) -> Self {
        Self {
            tokens: f64::from(config.capacity),
            config,
            last_refill: now,
        }
    }

    fn tokens_at(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill);
        (self.tokens + self.config.refill_amount(elapsed)).min(f64::from(self.config.capacity))
    }

    fn refill(&mut self, now: Instant) {
        self.tokens = self.tokens_at(now);
        self.last_refill = now;
    }
}

/// Snapshot of limiter activity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitMetrics {
    pub total_attempts: u64,
    pub blocked_attempts: u64,
    /// `blocked_attempts / total_attempts`, 0 when idle
    pub block_rate: f64,
    pub active_buckets: usize,
}

type BucketKey = (String, String);

pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<BucketKey, Bucket>,
    total: AtomicU64,
    blocked: AtomicU64,
    signals: Option<SignalBus>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
            total: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            signals: None,
        }
    }

    #[must_use]
    pub fn with_signals(mut self, signals: SignalBus) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Consume one token for `(user_id, operation)` if available.
    pub fn check_limit(&self, user_id: &str, operation: &str) -> bool {
        self.total.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        let (allowed, remaining) = {
            let mut bucket = self
                .buckets
                .entry((user_id.to_string(), operation.to_string()))
                .or_insert_with(|| Bucket::full(self.config.bucket_for(operation), now));
            bucket.refill(now);
            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                (true, bucket.tokens)
            } else {
                (false, bucket.tokens)
            }
        };

        crate::metrics::record_rate_limit(operation, allowed);
        if allowed {
            debug!(operation, user = user_fingerprint(user_id), remaining, "Rate limit check passed");
            return true;
        }

        self.blocked.fetch_add(1, Ordering::Relaxed);
        warn!(
            operation,
            user = user_fingerprint(user_id),
            retry_after = ?self.retry_after(user_id, operation),
            "Rate limit exceeded"
        );
        if let Some(signals) = &self.signals {
            signals.publish(Signal::RateLimitExceeded {
                user_id: user_id.to_string(),
                operation: operation.to_string(),
            });
        }
        false
    }

    /// Whole tokens available right now, without consuming any.
    #[must_use]
    pub fn remaining_tokens(&self, user_id: &str, operation: &str) -> u32 {
        let key = (user_id.to_string(), operation.to_string());
        match self.buckets.get(&key) {
            Some(bucket) => bucket.tokens_at(Instant::now()).floor() as u32,
            None => self.config.bucket_for(operation).capacity,
        }
    }

    /// How long until one token is available, or `None` if one is now.
    #[must_use]
    pub fn retry_after(&self, user_id: &str, operation: &str) -> Option<Duration> {
        let key = (user_id.to_string(), operation.to_string());
        let bucket = self.buckets.get(&key)?;
        let tokens = bucket.tokens_at(Instant::now());
        if tokens >= 1.0 {
            return None;
        }
        let config = bucket.config;
        if config.refill_tokens == 0 {
            return None;
        }
        let per_token = config.refill_interval.as_secs_f64() / f64::from(config.refill_tokens);
        Some(Duration::from_secs_f64((1.0 - tokens) * per_token))
    }

    /// Forget one bucket; the next check starts full.
    pub fn reset(&self, user_id: &str, operation: &str) {
        self.buckets
            .remove(&(user_id.to_string(), operation.to_string()));
    }

    pub fn reset_all(&self) {
        self.buckets.clear();
        self.total.store(0, Ordering::Relaxed);
        self.blocked.store(0, Ordering::Relaxed);
    }

    #[must_use]
    pub fn metrics(&self) -> RateLimitMetrics {
        let total_attempts = self.total.load(Ordering::Relaxed);
        let blocked_attempts = self.blocked.load(Ordering::Relaxed);
        let block_rate = if total_attempts == 0 {
            0.0
        } else {
            blocked_attempts as f64 / total_attempts as f64
        };
        RateLimitMetrics {
            total_attempts,
            blocked_attempts,
            block_rate,
            active_buckets: self.buckets.len(),
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

// Logs carry a hash, never the raw user id.
fn user_fingerprint(user_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_id.hash(&mut hasher);
    hasher.finish()
}
