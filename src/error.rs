// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy for the sync core.
//!
//! Every failure the engine can surface is a [`SyncError`]. The variants
//! split into three families that callers treat differently:
//!
//! - **Caller errors** (`Validation`, `Append`, `QueueFull`, `Authentication`)
//!   surface immediately and are never retried.
//! - **Transient errors** (`Network`, `Timeout`, `ChannelClosed`) are retried
//!   with backoff by the retry layer; see [`SyncError::is_transient`].
//! - **Fail-fast signals** (`CircuitOpen`, `RateLimited`) mean "try later",
//!   not "something is broken".

use std::time::Duration;
use thiserror::Error;

pub use crate::storage::traits::StorageError;
pub use crate::validation::ValidationError;

/// Store-level integrity violations raised by [`crate::EventStore::append`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppendError {
    #[error("event '{0}' already exists in the store")]
    Duplicate(String),
    #[error("failed to append event: {0}")]
    Storage(String),
}

/// Top-level error for every sync-core operation.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Append(#[from] AppendError),

    /// Queue reached its configured capacity; caller should shed load.
    #[error("queue is full (max {max} entries)")]
    QueueFull { max: usize },

    /// Circuit breaker rejected the call without attempting it.
    #[error("circuit breaker '{name}' is open, request rejected")]
    CircuitOpen { name: String },

    #[error("operation '{operation}' timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("network error: {0}")]
    Network(String),

    /// The other end of a messaging channel went away.
    #[error("could not establish connection: {0}")]
    ChannelClosed(String),

    #[error("rate limit exceeded for '{operation}'")]
    RateLimited {
        operation: String,
        retry_after: Option<Duration>,
    },

    #[error("not authenticated")]
    Authentication,

    /// Explicit application-level failure reported by the remote store.
    #[error("remote rejected request: {0}")]
    Remote(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("payload codec error: {0}")]
    Codec(String),
}

impl SyncError {
    /// Whether the retry layer may try this operation again.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout { .. } | Self::ChannelClosed(_)
        )
    }

    /// Whether a failed push should park its events in the offline queue
    /// rather than keep them in the sync queue.
    #[must_use]
    pub fn defers_to_offline(&self) -> bool {
        self.is_transient() || matches!(self, Self::CircuitOpen { .. })
    }

    /// Short label used for metrics and structured logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Append(_) => "append",
            Self::QueueFull { .. } => "queue_full",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Timeout { .. } => "timeout",
            Self::Network(_) => "network",
            Self::ChannelClosed(_) => "channel_closed",
            Self::RateLimited { .. } => "rate_limited",
            Self::Authentication => "authentication",
            Self::Remote(_) => "remote",
            Self::Storage(_) => "storage",
            Self::Codec(_) => "codec",
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.into())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}
