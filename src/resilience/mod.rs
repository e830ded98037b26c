// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Failure isolation for everything that leaves the process.
//!
//! Three independent pieces, composed by the remote decorators:
//! [`retry`] with per-attempt timeouts, a [`circuit_breaker`] per
//! operation class, and a per-user token-bucket [`rate_limiter`].

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitConfig, CircuitError, CircuitMetrics, CircuitState, SyncCircuits,
};
pub use rate_limiter::{BucketConfig, RateLimitConfig, RateLimitMetrics, RateLimiter};
pub use retry::{retry, RetryConfig, Retryable};
