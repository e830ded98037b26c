// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sync engine.

use crate::backpressure::QueuePressure;
use crate::error::SyncError;
use crate::resilience::circuit_breaker::CircuitState;

/// Engine lifecycle state.
///
/// Use [`super::SyncEngine::state()`] to check the current state or
/// [`super::SyncEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Built, background loop not started
    Created,
    /// Background loop running, nothing in flight
    Running,
    /// A sync pass is pushing events
    Syncing,
    /// Network reported down; new events park in the offline queue
    Offline,
    /// Final flush in progress
    ShuttingDown,
    /// Background loop exited
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::Syncing => write!(f, "Syncing"),
            Self::Offline => write!(f, "Offline"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Where [`super::SyncEngine::record`] put an event after storing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Waiting in the sync queue
    Queued,
    /// Parked until the network returns
    Offline,
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Events handed to the remote
    pub attempted: usize,
    /// Acknowledged and removed from the queue
    pub synced: usize,
    /// Rejected per event or by a permanent error; still queued
    pub failed: usize,
    /// Moved to the offline queue after transient failure or an open circuit
    pub deferred: usize,
    pub batches: usize,
    /// The error that stopped the pass early, if any
    pub error: Option<SyncError>,
}

impl SyncReport {
    /// Nothing failed and nothing was deferred.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.deferred == 0 && self.error.is_none()
    }
}

/// Outcome of pulling remote events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    pub pulled: usize,
    /// New events stored locally
    pub appended: usize,
    /// Already known locally
    pub duplicates: usize,
    /// Failed validation and were dropped
    pub rejected: usize,
    /// Highlight changes applied to the repository
    pub applied: usize,
    /// Timestamp of the newest pulled event; pass as `since` next time
    pub latest_timestamp: Option<i64>,
}

/// Point-in-time view of the sync pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub state: EngineState,
    pub online: bool,
    pub queue_size: usize,
    pub queue_pressure: QueuePressure,
    pub offline_size: u64,
    pub unsynced_events: u64,
    pub circuit: CircuitState,
}
