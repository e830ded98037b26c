// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Event batching for upload, announcing every released chunk.

use crate::event::Event;
use crate::signals::{Signal, SignalBus};

use super::hybrid_batcher::{BatchConfig, FlushBatch, FlushReason, HybridBatcher};

/// [`HybridBatcher`] over [`Event`]s that publishes [`Signal::ChunkReady`]
/// whenever it releases a batch.
pub struct SyncBatcher {
    inner: HybridBatcher<Event>,
    signals: SignalBus,
}

impl SyncBatcher {
    pub fn new(config: BatchConfig, signals: SignalBus) -> Self {
        Self {
            inner: HybridBatcher::new(config),
            signals,
        }
    }

    /// Add an event; returns a batch if this event tripped a threshold.
    /// Events already pending are ignored.
    pub fn add(&mut self, event: Event) -> Option<FlushBatch<Event>> {
        if self.inner.contains(&event.id) {
            return None;
        }
        let reason = self.inner.add(event)?;
        self.release(reason)
    }

    /// Release the pending batch if any threshold (including age) is met.
    pub fn take_if_ready(&mut self) -> Option<FlushBatch<Event>> {
        let reason = self.inner.ready_reason()?;
        self.release(reason)
    }

    /// Release whatever is pending.
    pub fn flush(&mut self) -> Option<FlushBatch<Event>> {
        self.release(FlushReason::Manual)
    }

    pub fn flush_for_shutdown(&mut self) -> Option<FlushBatch<Event>> {
        self.release(FlushReason::Shutdown)
    }

    fn release(&mut self, reason: FlushReason) -> Option<FlushBatch<Event>> {
        let batch = self.inner.take(reason)?;
        crate::metrics::record_batch_size(batch.len());
        crate::metrics::record_batch_bytes(batch.total_bytes);
        self.signals.publish(Signal::ChunkReady {
            size: batch.len(),
            bytes: batch.total_bytes,
            reason,
        });
        Some(batch)
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
