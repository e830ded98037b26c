// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed broadcast bus for cross-component signals.
//!
//! Components never call each other to announce state changes; they publish
//! a [`Signal`] and whoever cares subscribes. This keeps the queue, limiter,
//! breaker and detector testable in isolation.
//!
//! The bus wraps a [`tokio::sync::broadcast`] channel. Publishing with no
//! subscribers is not an error; lagging receivers lose the oldest signals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::batching::hybrid_batcher::FlushReason;
use crate::resilience::circuit_breaker::CircuitState;

/// Default ring buffer size for the bus.
pub const DEFAULT_SIGNAL_CAPACITY: usize = 1024;

/// Something observable happened inside the sync core.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// An entry was enqueued for upload.
    QueueUpdated { size: usize },
    /// The sync queue crossed 90% of capacity.
    QueueNearFull { size: usize, max: usize },
    /// A rate-limit check was denied.
    RateLimitExceeded { user_id: String, operation: String },
    CircuitStateChanged {
        name: String,
        from: CircuitState,
        to: CircuitState,
    },
    /// The batcher produced a chunk ready for transmission.
    ChunkReady {
        size: usize,
        bytes: usize,
        reason: FlushReason,
    },
    /// A chunk was transmitted and acknowledged.
    BatchSent {
        size: usize,
        synced: usize,
        failed: usize,
    },
    NetworkOnline,
    NetworkOffline,
    /// Offline entries are waiting to be resynced.
    OfflineResyncReady { pending: u64 },
    /// One sync pass finished.
    SyncCompleted { synced: usize, failed: usize, deferred: usize },
}

impl Signal {
    /// Stable event name, for logs and metrics labels.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::QueueUpdated { .. } => "QUEUE_UPDATED",
            Self::QueueNearFull { .. } => "QUEUE_NEAR_FULL",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::CircuitStateChanged { .. } => "CIRCUIT_STATE_CHANGED",
            Self::ChunkReady { .. } => "CHUNK_READY",
            Self::BatchSent { .. } => "BATCH_SENT",
            Self::NetworkOnline => "NETWORK_ONLINE",
            Self::NetworkOffline => "NETWORK_OFFLINE",
            Self::OfflineResyncReady { .. } => "OFFLINE_RESYNC_READY",
            Self::SyncCompleted { .. } => "SYNC_COMPLETED",
        }
    }
}

/// Broadcast bus for [`Signal`]s. Cheap to clone; clones share the channel.
#[derive(Debug, Clone)]
pub struct SignalBus {
    sender: broadcast::Sender<Signal>,
}

impl SignalBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to all current subscribers. Returns how many received it.
    pub fn publish(&self, signal: Signal) -> usize {
        tracing::trace!(signal = signal.name(), "Publishing signal");
        self.sender.send(signal).unwrap_or(0)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNAL_CAPACITY)
    }
}

/// Handle returned by callback-style `subscribe` methods.
///
/// [`unsubscribe`](Self::unsubscribe) is idempotent: the release action runs
/// at most once no matter how often it is called. Dropping the handle does
/// not unsubscribe.
pub struct Subscription {
    released: Arc<AtomicBool>,
    release: Box<dyn Fn() + Send + Sync>,
}

impl Subscription {
    pub fn new(release: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            released: Arc::new(AtomicBool::new(false)),
            release: Box::new(release),
        }
    }

    pub fn unsubscribe(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            (self.release)();
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.released.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
