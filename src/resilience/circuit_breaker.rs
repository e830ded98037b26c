// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Three-state circuit breaker.
//!
//! Protects the sync core from hammering a remote that keeps failing. Wraps
//! async operations and counts consecutive failures to "trip" the breaker.
//!
//! States:
//! - Closed: Normal operation, requests pass through
//! - Open: Service unhealthy, requests fail-fast without attempting
//! - HalfOpen: Testing if service recovered, limited requests allowed
//!
//! Transitions:
//! - Closed → Open after `failure_threshold` consecutive failures
//! - Open → HalfOpen on the first call after `reset_timeout`
//! - HalfOpen → Closed after `success_threshold` consecutive successes
//! - HalfOpen → Open on any failure
//!
//! # Example
//!
//! ```
//! use highlight_sync::{CircuitBreaker, CircuitConfig, CircuitState};
//!
//! let breaker = CircuitBreaker::new("sync", CircuitConfig::aggressive());
//! assert_eq!(breaker.state(), CircuitState::Closed);
//! assert_eq!(breaker.config().failure_threshold, 3);
//! ```

use parking_lot::Mutex;
use serde::Deserialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::event::now_millis;
use crate::signals::{Signal, SignalBus};

/// Circuit breaker state for metrics/monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Error type for circuit-protected operations
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The breaker rejected the call without running it
    #[error("circuit breaker '{name}' is open, request rejected")]
    Open { name: String },

    /// The underlying operation failed
    #[error("operation failed: {0}")]
    Inner(#[source] E),
}

impl From<CircuitError<SyncError>> for SyncError {
    fn from(err: CircuitError<SyncError>) -> Self {
        match err {
            CircuitError::Open { name } => SyncError::CircuitOpen { name },
            CircuitError::Inner(e) => e,
        }
    }
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Consecutive failures that trip the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again
    pub success_threshold: u32,
    /// How long to stay open before allowing a trial call
    #[serde(with = "crate::config::duration_ms")]
    pub reset_timeout: Duration,
    /// Concurrent trial calls allowed while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

impl CircuitConfig {
    /// Trips faster, recovers cautiously
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 3,
            reset_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }

    /// Tolerates more failures
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            failure_threshold: 10,
            success_threshold: 1,
            reset_timeout: Duration::from_secs(15),
            half_open_max_calls: 5,
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitMetrics {
    pub name: String,
    pub state: CircuitState,
    /// Current consecutive failure run
    pub failures: u32,
    pub total_calls: u64,
    pub successes: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
    /// Epoch millis of the most recent failure
    pub last_failure_time: Option<i64>,
    /// Epoch millis of the most recent transition
    pub last_state_change: i64,
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    half_open_in_flight: u32,
    opened_at: Option<Instant>,
    last_failure_time: Option<i64>,
    last_state_change: i64,
    // Bumped on every transition so stale permits can't touch a new phase.
    generation: u64,
}

/// A named circuit breaker with metrics tracking
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    inner: Mutex<BreakerState>,
    signals: Option<SignalBus>,

    calls_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

/// Admission ticket for one call, stamped with the phase it was admitted
/// in. Releases its half-open slot on drop, including when the caller's
/// future is cancelled mid-flight.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    half_open: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.half_open {
            let mut s = self.breaker.inner.lock();
            if s.generation == self.generation {
                s.half_open_in_flight = s.half_open_in_flight.saturating_sub(1);
            }
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                half_open_in_flight: 0,
                opened_at: None,
                last_failure_time: None,
                last_state_change: now_millis(),
                generation: 0,
            }),
            signals: None,
            calls_total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitConfig::default())
    }

    /// Publish `CircuitStateChanged` on every transition.
    #[must_use]
    pub fn with_signals(mut self, signals: SignalBus) -> Self {
        self.signals = Some(signals);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Current state. An open breaker whose timeout has elapsed still
    /// reports `Open` until the next call probes it.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Execute an operation, counting every error as a failure.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_classified(f, |_| true).await
    }

    /// Execute an operation; only errors for which `is_failure` returns true
    /// count against the breaker. Other errors still prove the dependency
    /// answered, so they count as healthy responses.
    pub async fn call_classified<F, Fut, T, E, C>(
        &self,
        f: F,
        is_failure: C,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> bool,
    {
        self.calls_total.fetch_add(1, Ordering::Relaxed);

        let Some(permit) = self.admit() else {
            self.rejections.fetch_add(1, Ordering::Relaxed);
            debug!(circuit = %self.name, "Circuit breaker rejected call");
            crate::metrics::record_circuit_call(&self.name, "rejected");
            return Err(CircuitError::Open {
                name: self.name.clone(),
            });
        };

        match f().await {
            Ok(value) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_circuit_call(&self.name, "success");
                self.on_success(permit.generation);
                Ok(value)
            }
            Err(err) if is_failure(&err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_circuit_call(&self.name, "failure");
                self.on_failure(permit.generation);
                Err(CircuitError::Inner(err))
            }
            Err(err) => {
                crate::metrics::record_circuit_call(&self.name, "passthrough");
                self.on_success(permit.generation);
                Err(CircuitError::Inner(err))
            }
        }
    }

    fn admit(&self) -> Option<Permit<'_>> {
        let mut s = self.inner.lock();
        match s.state {
            CircuitState::Closed => Some(Permit {
                breaker: self,
                generation: s.generation,
                half_open: false,
            }),
            CircuitState::Open => {
                let elapsed = s.opened_at.map_or(Duration::MAX, |at| at.elapsed());
                if elapsed < self.config.reset_timeout {
                    return None;
                }
                self.transition(&mut s, CircuitState::HalfOpen);
                s.half_open_in_flight = 1;
                Some(Permit {
                    breaker: self,
                    generation: s.generation,
                    half_open: true,
                })
            }
            CircuitState::HalfOpen => {
                if s.half_open_in_flight >= self.config.half_open_max_calls.max(1) {
                    return None;
                }
                s.half_open_in_flight += 1;
                Some(Permit {
                    breaker: self,
                    generation: s.generation,
                    half_open: true,
                })
            }
        }
    }

    fn on_success(&self, generation: u64) {
        let mut s = self.inner.lock();
        if s.generation != generation {
            debug!(circuit = %self.name, "Ignoring success from an earlier phase");
            return;
        }
        match s.state {
            CircuitState::Closed => s.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                s.consecutive_successes += 1;
                if s.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut s, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, generation: u64) {
        let mut s = self.inner.lock();
        s.last_failure_time = Some(now_millis());
        if s.generation != generation {
            debug!(circuit = %self.name, "Ignoring failure from an earlier phase");
            return;
        }
        match s.state {
            CircuitState::Closed => {
                s.consecutive_failures += 1;
                if s.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut s, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => self.transition(&mut s, CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    fn transition(&self, s: &mut BreakerState, to: CircuitState) {
        let from = s.state;
        if from == to {
            return;
        }
        s.state = to;
        s.generation += 1;
        s.last_state_change = now_millis();
        s.consecutive_successes = 0;
        s.half_open_in_flight = 0;
        match to {
            CircuitState::Open => {
                s.opened_at = Some(Instant::now());
                warn!(
                    circuit = %self.name,
                    %from,
                    failures = s.consecutive_failures,
                    reset_timeout = ?self.config.reset_timeout,
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                info!(circuit = %self.name, %from, "Circuit breaker half-open, probing");
            }
            CircuitState::Closed => {
                s.consecutive_failures = 0;
                s.opened_at = None;
                info!(circuit = %self.name, %from, "Circuit breaker closed");
            }
        }
        crate::metrics::set_circuit_state(&self.name, to as u8);
        if let Some(signals) = &self.signals {
            signals.publish(Signal::CircuitStateChanged {
                name: self.name.clone(),
                from,
                to,
            });
        }
    }

    /// Force the breaker closed and clear its failure history.
    pub fn reset(&self) {
        let mut s = self.inner.lock();
        self.transition(&mut s, CircuitState::Closed);
        s.consecutive_failures = 0;
        s.last_failure_time = None;
    }

    #[must_use]
    pub fn metrics(&self) -> CircuitMetrics {
        let s = self.inner.lock();
        CircuitMetrics {
            name: self.name.clone(),
            state: s.state,
            failures: s.consecutive_failures,
            total_calls: self.calls_total.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            total_failures: self.failures.load(Ordering::Relaxed),
            rejected_calls: self.rejections.load(Ordering::Relaxed),
            last_failure_time: s.last_failure_time,
            last_state_change: s.last_state_change,
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Pre-configured breakers for the two remote dependencies, shared with
/// the decorators that use them.
#[derive(Debug, Clone)]
pub struct SyncCircuits {
    /// Extension messaging between background and content contexts
    pub messaging: Arc<CircuitBreaker>,
    /// Remote sync backend
    pub sync: Arc<CircuitBreaker>,
}

impl SyncCircuits {
    pub fn new(config: CircuitConfig) -> Self {
        Self::build(config, None)
    }

    /// Breakers that publish their transitions on `signals`.
    pub fn with_signals(config: CircuitConfig, signals: &SignalBus) -> Self {
        Self::build(config, Some(signals))
    }

    fn build(config: CircuitConfig, signals: Option<&SignalBus>) -> Self {
        // Local messaging recovers fast; don't hold it open for long.
        let mut messaging = CircuitBreaker::new("messaging", CircuitConfig::lenient());
        let mut sync = CircuitBreaker::new("sync", config);
        if let Some(signals) = signals {
            messaging = messaging.with_signals(signals.clone());
            sync = sync.with_signals(signals.clone());
        }
        Self {
            messaging: Arc::new(messaging),
            sync: Arc::new(sync),
        }
    }

    #[must_use]
    pub fn metrics(&self) -> [CircuitMetrics; 2] {
        [self.messaging.metrics(), self.sync.metrics()]
    }
}

impl Default for SyncCircuits {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn config(failure_threshold: u32, success_threshold: u32) -> CircuitConfig {
        CircuitConfig {
            failure_threshold,
            success_threshold,
            reset_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }

    async fn fail(cb: &CircuitBreaker) {
        let _: Result<(), CircuitError<&str>> = cb.call(|| async { Err("boom") }).await;
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<(), CircuitError<&str>> {
        cb.call(|| async { Ok(()) }).await
    }

    #[tokio::test]
    async fn test_circuit_passes_successful_calls() {
        let cb = CircuitBreaker::new("test", CircuitConfig::default());

        let result: Result<i32, CircuitError<&str>> = cb.call(|| async { Ok(42) }).await;

        assert_eq!(result.unwrap(), 42);
        let m = cb.metrics();
        assert_eq!(m.successes, 1);
        assert_eq!(m.total_failures, 0);
    }

    #[tokio::test]
    async fn test_opens_after_exactly_threshold_failures() {
        let cb = CircuitBreaker::new("test", config(3, 2));

        fail(&cb).await;
        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);

        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_without_invoking() {
        let cb = CircuitBreaker::new("test", config(3, 2));
        for _ in 0..3 {
            fail(&cb).await;
        }

        let invoked = Arc::new(AtomicUsize::new(0));
        let invoked_clone = invoked.clone();
        let result: Result<(), CircuitError<&str>> = cb
            .call(|| async move {
                invoked_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(CircuitError::Open { ref name }) if name == "test"));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(cb.metrics().rejected_calls, 1);
    }

    #[tokio::test]
    async fn test_success_resets_failure_run() {
        let cb = CircuitBreaker::new("test", config(3, 2));
        fail(&cb).await;
        fail(&cb).await;
        succeed(&cb).await.unwrap();
        fail(&cb).await;
        fail(&cb).await;

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_recovery_closes_after_success_threshold() {
        let cb = CircuitBreaker::new("test", config(2, 2));
        fail(&cb).await;
        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);

        // Once closed, every call passes straight through.
        for _ in 0..10 {
            succeed(&cb).await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new("test", config(1, 2));
        fail(&cb).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(succeed(&cb).await, Err(CircuitError::Open { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_open_before_reset_timeout() {
        let cb = CircuitBreaker::new("test", config(1, 1));
        fail(&cb).await;
        tokio::time::advance(Duration::from_secs(29)).await;

        assert!(matches!(succeed(&cb).await, Err(CircuitError::Open { .. })));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_limits_concurrent_trials() {
        let cb = Arc::new(CircuitBreaker::new(
            "test",
            CircuitConfig {
                half_open_max_calls: 1,
                ..config(1, 1)
            },
        ));
        fail(&cb).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial = {
            let cb = cb.clone();
            tokio::spawn(async move {
                let result: Result<(), CircuitError<&str>> = cb
                    .call(|| async move {
                        let _ = release_rx.await;
                        Ok(())
                    })
                    .await;
                result
            })
        };
        tokio::task::yield_now().await;

        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(matches!(succeed(&cb).await, Err(CircuitError::Open { .. })));

        release_tx.send(()).unwrap();
        trial.await.unwrap().unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_from_an_earlier_phase_are_ignored() {
        let cb = Arc::new(CircuitBreaker::new(
            "test",
            CircuitConfig {
                half_open_max_calls: 2,
                ..config(1, 2)
            },
        ));

        // Admitted while closed, finishes after the breaker has moved on.
        let (release_slow, gate) = tokio::sync::oneshot::channel::<()>();
        let slow = {
            let cb = cb.clone();
            tokio::spawn(async move {
                let result: Result<(), CircuitError<&str>> = cb
                    .call(|| async move { gate.await.map_err(|_| "gate dropped") })
                    .await;
                result
            })
        };
        tokio::task::yield_now().await;

        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(31)).await;

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        release_slow.send(()).unwrap();
        slow.await.unwrap().unwrap();
        // One fresh success of two needed; the stale one doesn't count.
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failure_does_not_reopen_half_open() {
        let cb = Arc::new(CircuitBreaker::new("test", config(1, 2)));

        let (release_slow, gate) = tokio::sync::oneshot::channel::<()>();
        let slow = {
            let cb = cb.clone();
            tokio::spawn(async move {
                let result: Result<(), CircuitError<&str>> = cb
                    .call(|| async move {
                        let _ = gate.await;
                        Err("late")
                    })
                    .await;
                result
            })
        };
        tokio::task::yield_now().await;

        fail(&cb).await;
        tokio::time::advance(Duration::from_secs(31)).await;
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        release_slow.send(()).unwrap();
        assert!(slow.await.unwrap().is_err());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_classified_errors_do_not_trip() {
        let cb = CircuitBreaker::new("test", config(2, 1));

        for _ in 0..5 {
            let result: Result<(), CircuitError<SyncError>> = cb
                .call_classified(
                    || async { Err(SyncError::Remote("409 conflict".into())) },
                    SyncError::is_transient,
                )
                .await;
            assert!(matches!(result, Err(CircuitError::Inner(SyncError::Remote(_)))));
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        for _ in 0..2 {
            let _: Result<(), CircuitError<SyncError>> = cb
                .call_classified(
                    || async { Err(SyncError::Network("reset".into())) },
                    SyncError::is_transient,
                )
                .await;
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_reset_forces_closed() {
        let cb = CircuitBreaker::new("test", config(1, 1));
        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(succeed(&cb).await.is_ok());
        assert!(cb.metrics().last_failure_time.is_none());
    }

    #[tokio::test]
    async fn test_transitions_publish_signals() {
        let bus = SignalBus::new(16);
        let mut rx = bus.subscribe();
        let cb = CircuitBreaker::new("sync", config(1, 1)).with_signals(bus);

        fail(&cb).await;

        assert_eq!(
            rx.recv().await.unwrap(),
            Signal::CircuitStateChanged {
                name: "sync".into(),
                from: CircuitState::Closed,
                to: CircuitState::Open,
            }
        );
    }

    #[tokio::test]
    async fn test_metrics_track_calls() {
        let cb = CircuitBreaker::new("test", config(100, 1));
        succeed(&cb).await.unwrap();
        fail(&cb).await;
        succeed(&cb).await.unwrap();

        let m = cb.metrics();
        assert_eq!(m.total_calls, 3);
        assert_eq!(m.successes, 2);
        assert_eq!(m.total_failures, 1);
        assert_eq!(m.state, CircuitState::Closed);
        assert!(m.last_failure_time.is_some());
    }

    #[test]
    fn test_circuit_error_into_sync_error() {
        let open: SyncError = CircuitError::<SyncError>::Open { name: "sync".into() }.into();
        assert!(matches!(open, SyncError::CircuitOpen { ref name } if name == "sync"));

        let inner: SyncError = CircuitError::Inner(SyncError::Authentication).into();
        assert!(matches!(inner, SyncError::Authentication));
    }

    #[test]
    fn test_sync_circuits_names() {
        let circuits = SyncCircuits::default();
        assert_eq!(circuits.messaging.name(), "messaging");
        assert_eq!(circuits.sync.name(), "sync");
        assert_eq!(circuits.metrics()[1].state, CircuitState::Closed);
    }

    #[test]
    fn test_circuit_config_presets() {
        let default = CircuitConfig::default();
        let aggressive = CircuitConfig::aggressive();
        let lenient = CircuitConfig::lenient();

        assert!(aggressive.failure_threshold < default.failure_threshold);
        assert!(lenient.failure_threshold > default.failure_threshold);
        assert!(aggressive.reset_timeout > lenient.reset_timeout);
    }
}
