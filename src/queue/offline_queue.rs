// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Holding area for events that could not be sent.
//!
//! Events land here while the device is offline, when the sync circuit is
//! open, or when a background remote write fails. This is NOT a second
//! sync queue: nothing here is sent directly. Entries are moved back into
//! the [`SyncQueue`] by [`OfflineQueue::drain_to`] once connectivity
//! returns.
//!
//! The queue does not drain itself. When attached to a
//! [`NetworkDetector`] it only announces `OfflineResyncReady` on each
//! online transition; the engine decides when to drain.

use parking_lot::Mutex;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::event::{now_millis, Event};
use crate::network::NetworkDetector;
use crate::queue::sync_queue::SyncQueue;
use crate::signals::{Signal, SignalBus, Subscription};
use crate::storage::sql::{placeholders, LocalDb};

/// Offline queue counters for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfflineStats {
    pub pending: u64,
    pub total_queued: u64,
    pub total_drained: u64,
    pub draining: bool,
}

pub struct OfflineQueue {
    pool: SqlitePool,
    max_items: Option<usize>,
    signals: SignalBus,
    pending: Arc<AtomicU64>,
    total_queued: AtomicU64,
    total_drained: AtomicU64,
    draining: AtomicBool,
    subscription: Mutex<Option<Subscription>>,
    // Serializes the capacity check with the insert, and every delete.
    write_lock: tokio::sync::Mutex<()>,
}

impl OfflineQueue {
    pub async fn open(
        db: &LocalDb,
        max_items: Option<usize>,
        signals: SignalBus,
    ) -> Result<Self, SyncError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM offline_queue")
            .fetch_one(db.pool())
            .await?;
        let pending: i64 = row.try_get("n")?;
        if pending > 0 {
            warn!(pending, "Offline queue has entries from previous run, will resync");
        }
        crate::metrics::set_queue_size("offline", pending as usize);

        Ok(Self {
            pool: db.pool().clone(),
            max_items,
            signals,
            pending: Arc::new(AtomicU64::new(pending as u64)),
            total_queued: AtomicU64::new(0),
            total_drained: AtomicU64::new(0),
            draining: AtomicBool::new(false),
            subscription: Mutex::new(None),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Park an event until connectivity returns. Returns the new size.
    ///
    /// An event already parked is left as is.
    pub async fn queue_offline(&self, event: &Event) -> Result<u64, SyncError> {
        let _guard = self.write_lock.lock().await;
        let pending = self.pending.load(Ordering::Acquire);
        if let Some(max) = self.max_items {
            if pending >= max as u64 {
                crate::metrics::record_queue_full("offline");
                warn!(pending, max, event_id = %event.id, "Offline queue full, rejecting event");
                return Err(SyncError::QueueFull { max });
            }
        }

        let record = serde_json::to_string(event)?;
        let inserted = sqlx::query(
            "INSERT INTO offline_queue (event_id, event, enqueued_at) VALUES (?, ?, ?)
             ON CONFLICT(event_id) DO NOTHING",
        )
        .bind(&event.id)
        .bind(&record)
        .bind(now_millis())
        .execute(&self.pool)
        .await?
        .rows_affected();

        let pending = if inserted > 0 {
            self.total_queued.fetch_add(1, Ordering::Relaxed);
            self.pending.fetch_add(1, Ordering::AcqRel) + 1
        } else {
            self.pending.load(Ordering::Acquire)
        };
        crate::metrics::set_queue_size("offline", pending as usize);
        debug!(event_id = %event.id, pending, "Event parked offline");
        Ok(pending)
    }

    #[must_use]
    pub fn offline_queue_size(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.offline_queue_size() > 0
    }

    /// Oldest parked events first. Undecodable rows are purged.
    pub async fn pending(&self, limit: usize) -> Result<Vec<Event>, SyncError> {
        let rows = sqlx::query(
            "SELECT event_id, event FROM offline_queue ORDER BY enqueued_at ASC, rowid ASC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        let mut corrupt = Vec::new();
        for row in &rows {
            let record: String = row.try_get("event")?;
            match serde_json::from_str::<Event>(&record) {
                Ok(event) => events.push(event),
                Err(e) => {
                    let event_id: String = row.try_get("event_id")?;
                    crate::metrics::record_corrupt_queue_entry("offline");
                    error!(%event_id, error = %e, "Undecodable offline entry, purging");
                    corrupt.push(event_id);
                }
            }
        }
        if !corrupt.is_empty() {
            self.remove(&corrupt).await?;
        }
        Ok(events)
    }

    pub async fn remove(&self, ids: &[String]) -> Result<u64, SyncError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "DELETE FROM offline_queue WHERE event_id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let _guard = self.write_lock.lock().await;
        let removed = query.execute(&self.pool).await?.rows_affected();

        let remaining = self.decrement(removed);
        debug!(removed, remaining, "Offline entries removed");
        Ok(removed)
    }

    pub async fn clear_offline_queue(&self) -> Result<(), SyncError> {
        let _guard = self.write_lock.lock().await;
        let removed = sqlx::query("DELETE FROM offline_queue")
            .execute(&self.pool)
            .await?
            .rows_affected();
        self.pending.store(0, Ordering::Release);
        crate::metrics::set_queue_size("offline", 0);
        info!(removed, "Offline queue cleared");
        Ok(())
    }

    /// Announce `OfflineResyncReady` whenever `detector` comes back online
    /// with entries waiting. Replaces any previous attachment.
    pub fn attach(&self, detector: &NetworkDetector) {
        let pending = Arc::clone(&self.pending);
        let signals = self.signals.clone();
        let subscription = detector.subscribe(move |online| {
            if !online {
                return;
            }
            let pending = pending.load(Ordering::Acquire);
            if pending > 0 {
                info!(pending, "Back online, offline entries ready for resync");
                signals.publish(Signal::OfflineResyncReady { pending });
            }
        });

        if let Some(previous) = self.subscription.lock().replace(subscription) {
            previous.unsubscribe();
        }
    }

    /// Release the network subscription. Safe to call more than once.
    pub fn destroy(&self) {
        let subscription = self.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
            debug!("Offline queue detached from network detector");
        }
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.subscription.lock().is_some()
    }

    /// Move up to `batch_size` of the oldest entries into `queue`.
    ///
    /// Returns how many moved. Stops early, keeping the rest parked, when
    /// the sync queue fills up. A drain already in progress makes this a
    /// no-op returning 0.
    pub async fn drain_to(&self, queue: &SyncQueue, batch_size: usize) -> Result<usize, SyncError> {
        if self.draining.swap(true, Ordering::AcqRel) {
            return Ok(0);
        }
        let _guard = DrainGuard(&self.draining);

        if !self.has_pending() {
            return Ok(0);
        }

        let events = self.pending(batch_size).await?;
        let mut moved = Vec::with_capacity(events.len());
        let mut outcome = Ok(());
        for event in &events {
            match queue.enqueue(event).await {
                Ok(_) => moved.push(event.id.clone()),
                Err(SyncError::QueueFull { max }) => {
                    warn!(max, moved = moved.len(), "Sync queue full, pausing offline drain");
                    break;
                }
                Err(e) => {
                    error!(event_id = %event.id, error = %e, "Failed to move offline entry");
                    outcome = Err(e);
                    break;
                }
            }
        }

        // Entries already in the sync queue are safe to drop here; a crash
        // before this point only re-enqueues them, which is a no-op.
        if let Err(e) = self.remove(&moved).await {
            error!(error = %e, "Failed to remove drained offline entries");
        }
        self.total_drained
            .fetch_add(moved.len() as u64, Ordering::Relaxed);
        crate::metrics::record_offline_drain(moved.len(), outcome.is_ok());

        info!(
            drained = moved.len(),
            remaining = self.offline_queue_size(),
            "Offline drain step complete"
        );
        outcome.map(|()| moved.len())
    }

    #[must_use]
    pub fn stats(&self) -> OfflineStats {
        OfflineStats {
            pending: self.pending.load(Ordering::Acquire),
            total_queued: self.total_queued.load(Ordering::Relaxed),
            total_drained: self.total_drained.load(Ordering::Relaxed),
            draining: self.draining.load(Ordering::Acquire),
        }
    }

    fn decrement(&self, by: u64) -> u64 {
        let mut current = self.pending.load(Ordering::Acquire);
        loop {
            let next = current.saturating_sub(by);
            match self
                .pending
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    crate::metrics::set_queue_size("offline", next as usize);
                    return next;
                }
                Err(actual) => current = actual,
            }
        }
    }
}

impl Drop for OfflineQueue {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Resets the draining flag however the drain exits.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
