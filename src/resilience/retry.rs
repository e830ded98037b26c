// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff and per-attempt timeouts.
//!
//! Only transient failures are retried. What counts as transient is decided
//! by the error type through the [`Retryable`] trait: for [`SyncError`] that
//! is network errors, timeouts and closed channels. Everything else
//! (validation, authentication, explicit remote rejections, open circuits,
//! rate limits) propagates on the first attempt.
//!
//! # Example
//!
//! ```
//! use highlight_sync::RetryConfig;
//! use std::time::Duration;
//!
//! // Remote calls: 3 retries, 5s per attempt
//! let sync = RetryConfig::sync();
//! assert_eq!(sync.max_retries, Some(3));
//! assert_eq!(sync.attempt_timeout, Some(Duration::from_secs(5)));
//!
//! // Reconnect loops retry forever
//! assert_eq!(RetryConfig::daemon().max_retries, None);
//!
//! // Backoff doubles and caps at max_delay
//! assert_eq!(sync.delay_for(0), Duration::from_secs(1));
//! assert_eq!(sync.delay_for(1), Duration::from_secs(2));
//! assert_eq!(sync.delay_for(10), sync.max_delay);
//! ```

use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::error::{StorageError, SyncError};

/// Errors the retry loop knows how to classify.
pub trait Retryable: std::fmt::Display {
    /// Whether trying again might succeed.
    fn is_transient(&self) -> bool;

    /// Build the error reported when one attempt exceeds its time budget.
    fn timed_out(operation: &str, after: Duration) -> Self;
}

impl Retryable for SyncError {
    fn is_transient(&self) -> bool {
        SyncError::is_transient(self)
    }

    fn timed_out(operation: &str, after: Duration) -> Self {
        SyncError::Timeout {
            operation: operation.to_string(),
            after,
        }
    }
}

impl Retryable for StorageError {
    // Backend errors cover locked databases and dropped connections.
    fn is_transient(&self) -> bool {
        matches!(self, StorageError::Backend(_))
    }

    fn timed_out(operation: &str, after: Duration) -> Self {
        StorageError::Backend(format!("{operation} timed out after {after:?}"))
    }
}

/// Configuration for operation retry behavior.
///
/// Presets: [`sync`](RetryConfig::sync) for remote calls,
/// [`startup`](RetryConfig::startup) for opening storage,
/// [`daemon`](RetryConfig::daemon) for reconnect loops and
/// [`query`](RetryConfig::query) for single statements.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt. `None` retries forever.
    pub max_retries: Option<usize>,
    #[serde(with = "crate::config::duration_ms")]
    pub initial_delay: Duration,
    #[serde(with = "crate::config::duration_ms")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Time budget for a single attempt
    #[serde(with = "crate::config::opt_duration_ms")]
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::sync()
    }
}

impl RetryConfig {
    /// Retry policy for remote transport calls.
    #[must_use]
    pub fn sync() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            attempt_timeout: Some(Duration::from_secs(5)),
        }
    }

    /// Fast-fail retry for opening the local database.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            attempt_timeout: None,
        }
    }

    /// Infinite retry, backoff capped at 5 minutes.
    #[must_use]
    pub fn daemon() -> Self {
        Self {
            max_retries: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            attempt_timeout: Some(Duration::from_secs(5)),
        }
    }

    /// Quick retry for individual statements against a busy database.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            attempt_timeout: None,
        }
    }

    /// Millisecond delays for tests.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            attempt_timeout: Some(Duration::from_millis(200)),
        }
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: Option<usize>) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_attempt_timeout(mut self, attempt_timeout: Option<Duration>) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Backoff before retry number `retry` (0-based), capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(retry as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Run `operation` until it succeeds, fails permanently, or retries run out.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    let mut retries: u32 = 0;

    loop {
        let outcome = match config.attempt_timeout {
            Some(limit) => match timeout(limit, operation()).await {
                Ok(result) => result,
                Err(_) => {
                    crate::metrics::record_timeout(operation_name);
                    Err(E::timed_out(operation_name, limit))
                }
            },
            None => operation().await,
        };

        let err = match outcome {
            Ok(val) => {
                if retries > 0 {
                    info!(operation = operation_name, retries, "Operation succeeded after retries");
                }
                return Ok(val);
            }
            Err(err) => err,
        };

        if !err.is_transient() {
            debug!(operation = operation_name, error = %err, "Permanent failure, not retrying");
            return Err(err);
        }

        if let Some(max) = config.max_retries {
            if retries as usize >= max {
                warn!(
                    operation = operation_name,
                    attempts = retries + 1,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(err);
            }
        }

        let delay = config.delay_for(retries);
        retries += 1;
        match config.max_retries {
            Some(max) => warn!(
                operation = operation_name,
                retry = retries,
                max_retries = max,
                error = %err,
                ?delay,
                "Operation failed, retrying"
            ),
            None => warn!(
                operation = operation_name,
                retry = retries,
                error = %err,
                ?delay,
                "Operation failed, will retry forever"
            ),
        }
        crate::metrics::record_retry(operation_name);
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Runs `retry` against an operation that yields `results` in order,
    /// repeating the last one, and reports how many attempts were made.
    async fn run_script(
        config: &RetryConfig,
        results: Vec<Result<u32, SyncError>>,
    ) -> (Result<u32, SyncError>, usize) {
        let calls = Arc::new(AtomicUsize::new(0));
        let results = Arc::new(results);
        let outcome = retry("scripted", config, || {
            let calls = Arc::clone(&calls);
            let results = Arc::clone(&results);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                results[n.min(results.len() - 1)].clone()
            }
        })
        .await;
        (outcome, calls.load(Ordering::SeqCst))
    }

    fn limited(max_retries: usize) -> RetryConfig {
        RetryConfig::fast().with_max_retries(Some(max_retries))
    }

    #[tokio::test]
    async fn first_success_returns_immediately() {
        let (outcome, calls) = run_script(&RetryConfig::fast(), vec![Ok(7)]).await;
        assert_eq!(outcome.unwrap(), 7);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let script = vec![
            Err(SyncError::Network("reset".into())),
            Err(SyncError::Network("reset again".into())),
            Ok(7),
        ];
        let (outcome, calls) = run_script(&RetryConfig::fast(), script).await;
        assert_eq!(outcome.unwrap(), 7);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let script = vec![Err(SyncError::ChannelClosed("receiving end does not exist".into()))];
        let (outcome, calls) = run_script(&limited(3), script).await;
        assert!(matches!(outcome, Err(SyncError::ChannelClosed(_))));
        // one attempt plus three retries
        assert_eq!(calls, 4);
    }

    #[tokio::test]
    async fn permanent_errors_fail_on_first_attempt() {
        let permanent = [
            SyncError::Authentication,
            SyncError::Remote("400 bad request".into()),
            SyncError::CircuitOpen { name: "sync".into() },
            SyncError::RateLimited {
                operation: "sync".into(),
                retry_after: None,
            },
        ];
        for err in permanent {
            let (outcome, calls) = run_script(&limited(5), vec![Err(err.clone())]).await;
            assert_eq!(outcome.unwrap_err().kind(), err.kind());
            assert_eq!(calls, 1, "{err} was retried");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempt_becomes_timeout_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = RetryConfig::fast()
            .with_max_retries(Some(1))
            .with_attempt_timeout(Some(Duration::from_secs(5)));

        let outcome: Result<(), SyncError> = retry("slow_op", &config, || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        })
        .await;

        match outcome {
            Err(SyncError::Timeout { operation, after }) => {
                assert_eq!(operation, "slow_op");
                assert_eq!(after, Duration::from_secs(5));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn storage_errors_use_their_own_classification() {
        let outcome: Result<(), StorageError> = retry("query", &limited(2), || async {
            Err(StorageError::Serialization("bad json".into()))
        })
        .await;
        assert!(matches!(outcome, Err(StorageError::Serialization(_))));

        assert!(Retryable::is_transient(&StorageError::Backend("database is locked".into())));
        assert!(!Retryable::is_transient(&StorageError::NotFound));
    }

    #[test]
    fn presets() {
        assert_eq!(RetryConfig::startup().max_retries, Some(5));
        assert!(RetryConfig::daemon().max_retries.is_none());
        assert_eq!(RetryConfig::query().max_retries, Some(3));
        assert_eq!(RetryConfig::default(), RetryConfig::sync());
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let doubling = RetryConfig::query();
        let steps: Vec<u128> = (0..3).map(|n| doubling.delay_for(n).as_millis()).collect();
        assert_eq!(steps, [50, 100, 200]);

        let steep = RetryConfig {
            backoff_multiplier: 10.0,
            ..RetryConfig::startup()
        };
        assert_eq!(steep.delay_for(1), steep.max_delay);
        assert_eq!(steep.delay_for(30), steep.max_delay);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: RetryConfig =
            serde_json::from_str(r#"{"max_retries": 7, "initial_delay": 250}"#).unwrap();
        assert_eq!(config.max_retries, Some(7));
        assert_eq!(config.initial_delay, Duration::from_millis(250));
        assert_eq!(config.attempt_timeout, Some(Duration::from_secs(5)));
    }
}
