// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The remote store, as seen from the device.
//!
//! [`RemoteApi`] is the whole surface the sync core needs. Concrete
//! transports implement it; resilience is added by wrapping, not by
//! inheritance. The production stack is built by [`layered`]:
//!
//! ```text
//! RateLimitedApi          admission per (user, operation), fail fast
//!   └─ CircuitBreakingApi one logical call = one breaker outcome
//!        └─ RetryingApi   backoff + per-attempt timeout
//!             └─ transport
//! ```
//!
//! The limiter sits outermost so a denied call spends neither a breaker
//! slot nor a network attempt. The breaker wraps retry so that a call
//! which needed three attempts counts as one failure, not three.

pub mod layers;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::AuthSession;
use crate::error::SyncError;
use crate::event::Event;
use crate::highlight::Highlight;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::rate_limiter::RateLimiter;
use crate::resilience::retry::RetryConfig;

pub use layers::{CircuitBreakingApi, RateLimitedApi, RetryingApi};
pub use memory::InMemoryRemote;

/// Query for [`RemoteApi::list_records`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub url: Option<String>,
    /// Only records updated at or after this time (epoch millis)
    pub updated_since: Option<i64>,
    /// Include soft-deleted records
    #[serde(default)]
    pub include_deleted: bool,
}

impl RecordFilter {
    #[must_use]
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }
}

/// Per-event outcome of a push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResult {
    pub synced_ids: Vec<String>,
    pub failed_ids: Vec<String>,
}

/// Async surface of the remote highlight store.
///
/// Every call fails with [`SyncError::Authentication`] before doing any
/// work when nobody is signed in.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn create_record(&self, highlight: &Highlight) -> Result<Highlight, SyncError>;

    /// Replace an existing record.
    async fn update_record(&self, highlight: &Highlight) -> Result<Highlight, SyncError>;

    /// Soft delete: the record stays, marked `deleted`.
    async fn delete_record(&self, id: &str) -> Result<(), SyncError>;

    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<Highlight>, SyncError>;

    async fn push_events(&self, events: &[Event]) -> Result<PushResult, SyncError>;

    /// Events at or after `since`, ascending by timestamp.
    ///
    /// The bound is inclusive so a later arrival in the same millisecond
    /// as a caller's cursor is still delivered; callers dedupe by id.
    async fn pull_events(&self, since: i64) -> Result<Vec<Event>, SyncError>;
}

#[async_trait]
impl<T: RemoteApi + ?Sized> RemoteApi for Arc<T> {
    async fn create_record(&self, highlight: &Highlight) -> Result<Highlight, SyncError> {
        (**self).create_record(highlight).await
    }

    async fn update_record(&self, highlight: &Highlight) -> Result<Highlight, SyncError> {
        (**self).update_record(highlight).await
    }

    async fn delete_record(&self, id: &str) -> Result<(), SyncError> {
        (**self).delete_record(id).await
    }

    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<Highlight>, SyncError> {
        (**self).list_records(filter).await
    }

    async fn push_events(&self, events: &[Event]) -> Result<PushResult, SyncError> {
        (**self).push_events(events).await
    }

    async fn pull_events(&self, since: i64) -> Result<Vec<Event>, SyncError> {
        (**self).pull_events(since).await
    }
}

/// The fully decorated remote stack.
pub type LayeredApi<A> = RateLimitedApi<CircuitBreakingApi<RetryingApi<A>>>;

/// Wrap `transport` as `RateLimited(CircuitBreaking(Retrying(transport)))`.
pub fn layered<A: RemoteApi>(
    transport: A,
    retry: RetryConfig,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    auth: AuthSession,
) -> LayeredApi<A> {
    RateLimitedApi::new(
        CircuitBreakingApi::new(RetryingApi::new(transport, retry), breaker),
        limiter,
        auth,
    )
}
