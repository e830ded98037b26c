// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilience decorators over any [`RemoteApi`].
//!
//! Each layer owns the next one and implements the same trait, so layers
//! stack in any order. [`super::layered`] builds the order the engine uses.

use async_trait::async_trait;
use std::sync::Arc;

use super::{PushResult, RecordFilter, RemoteApi};
use crate::auth::AuthSession;
use crate::error::SyncError;
use crate::event::Event;
use crate::highlight::Highlight;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::rate_limiter::RateLimiter;
use crate::resilience::retry::{retry, RetryConfig};

/// Rate-limit bucket charged for record CRUD.
pub const API_OPERATION: &str = "api";
/// Rate-limit bucket charged for event push/pull.
pub const SYNC_OPERATION: &str = "sync";

// ═══════════════════════════════════════════════════════════════════════════
// RETRY
// ═══════════════════════════════════════════════════════════════════════════

/// Retries transient failures with backoff; bounds every attempt.
pub struct RetryingApi<A> {
    inner: A,
    config: RetryConfig,
}

impl<A> RetryingApi<A> {
    pub fn new(inner: A, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

#[async_trait]
impl<A: RemoteApi> RemoteApi for RetryingApi<A> {
    async fn create_record(&self, highlight: &Highlight) -> Result<Highlight, SyncError> {
        retry("remote.create_record", &self.config, || {
            self.inner.create_record(highlight)
        })
        .await
    }

    async fn update_record(&self, highlight: &Highlight) -> Result<Highlight, SyncError> {
        retry("remote.update_record", &self.config, || {
            self.inner.update_record(highlight)
        })
        .await
    }

    async fn delete_record(&self, id: &str) -> Result<(), SyncError> {
        retry("remote.delete_record", &self.config, || self.inner.delete_record(id)).await
    }

    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<Highlight>, SyncError> {
        retry("remote.list_records", &self.config, || self.inner.list_records(filter)).await
    }

    async fn push_events(&self, events: &[Event]) -> Result<PushResult, SyncError> {
        retry("remote.push_events", &self.config, || self.inner.push_events(events)).await
    }

    async fn pull_events(&self, since: i64) -> Result<Vec<Event>, SyncError> {
        retry("remote.pull_events", &self.config, || self.inner.pull_events(since)).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CIRCUIT BREAKER
// ═══════════════════════════════════════════════════════════════════════════

/// Fails fast while the breaker is open. Only transient errors count as
/// failures; a validation or auth rejection proves the remote is alive.
pub struct CircuitBreakingApi<A> {
    inner: A,
    breaker: Arc<CircuitBreaker>,
}

impl<A> CircuitBreakingApi<A> {
    pub fn new(inner: A, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl<A: RemoteApi> RemoteApi for CircuitBreakingApi<A> {
    async fn create_record(&self, highlight: &Highlight) -> Result<Highlight, SyncError> {
        Ok(self
            .breaker
            .call_classified(|| self.inner.create_record(highlight), SyncError::is_transient)
            .await?)
    }

    async fn update_record(&self, highlight: &Highlight) -> Result<Highlight, SyncError> {
        Ok(self
            .breaker
            .call_classified(|| self.inner.update_record(highlight), SyncError::is_transient)
            .await?)
    }

    async fn delete_record(&self, id: &str) -> Result<(), SyncError> {
        Ok(self
            .breaker
            .call_classified(|| self.inner.delete_record(id), SyncError::is_transient)
            .await?)
    }

    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<Highlight>, SyncError> {
        Ok(self
            .breaker
            .call_classified(|| self.inner.list_records(filter), SyncError::is_transient)
            .await?)
    }

    async fn push_events(&self, events: &[Event]) -> Result<PushResult, SyncError> {
        Ok(self
            .breaker
            .call_classified(|| self.inner.push_events(events), SyncError::is_transient)
            .await?)
    }

    async fn pull_events(&self, since: i64) -> Result<Vec<Event>, SyncError> {
        Ok(self
            .breaker
            .call_classified(|| self.inner.pull_events(since), SyncError::is_transient)
            .await?)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RATE LIMIT
// ═══════════════════════════════════════════════════════════════════════════

/// Charges one token per call to the signed-in user's bucket.
pub struct RateLimitedApi<A> {
    inner: A,
    limiter: Arc<RateLimiter>,
    auth: AuthSession,
}

impl<A> RateLimitedApi<A> {
    pub fn new(inner: A, limiter: Arc<RateLimiter>, auth: AuthSession) -> Self {
        Self {
            inner,
            limiter,
            auth,
        }
    }

    #[must_use]
    pub fn inner(&self) -> &A {
        &self.inner
    }

    fn admit(&self, operation: &str) -> Result<(), SyncError> {
        let user = self.auth.require_user()?;
        if self.limiter.check_limit(&user, operation) {
            Ok(())
        } else {
            Err(SyncError::RateLimited {
                operation: operation.to_string(),
                retry_after: self.limiter.retry_after(&user, operation),
            })
        }
    }
}

#[async_trait]
impl<A: RemoteApi> RemoteApi for RateLimitedApi<A> {
    async fn create_record(&self, highlight: &Highlight) -> Result<Highlight, SyncError> {
        self.admit(API_OPERATION)?;
        self.inner.create_record(highlight).await
    }

    async fn update_record(&self, highlight: &Highlight) -> Result<Highlight, SyncError> {
        self.admit(API_OPERATION)?;
        self.inner.update_record(highlight).await
    }

    async fn delete_record(&self, id: &str) -> Result<(), SyncError> {
        self.admit(API_OPERATION)?;
        self.inner.delete_record(id).await
    }

    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<Highlight>, SyncError> {
        self.admit(API_OPERATION)?;
        self.inner.list_records(filter).await
    }

    async fn push_events(&self, events: &[Event]) -> Result<PushResult, SyncError> {
        self.admit(SYNC_OPERATION)?;
        self.inner.push_events(events).await
    }

    async fn pull_events(&self, since: i64) -> Result<Vec<Event>, SyncError> {
        self.admit(SYNC_OPERATION)?;
        self.inner.pull_events(since).await
    }
}
