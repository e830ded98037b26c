// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable, priority-ordered outbound queue.
//!
//! Entries live in the `sync_queue` table and are read back through the
//! `(priority DESC, timestamp ASC)` index, so the drain order survives
//! restarts without an in-memory heap: deletes before updates before
//! creates, oldest first within a class.
//!
//! All mutations take an async write lock and run in a SQLite transaction.
//! The size is cached in an atomic so hot-path checks never touch the
//! database.

use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::backpressure::QueuePressure;
use crate::error::{StorageError, SyncError};
use crate::event::{now_millis, Event, Priority};
use crate::signals::{Signal, SignalBus};
use crate::storage::sql::{placeholders, LocalDb};

const ORDER: &str = "ORDER BY priority DESC, timestamp ASC, rowid ASC";

/// One queued event with its derived priority.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub event: Event,
    pub priority: Priority,
    /// When the entry was (last) enqueued, epoch millis
    pub enqueued_at: i64,
}

pub struct SyncQueue {
    pool: SqlitePool,
    max_size: usize,
    signals: SignalBus,
    size: AtomicUsize,
    write_lock: Mutex<()>,
}

impl SyncQueue {
    /// Open the queue over `db`, picking up entries left by a previous run.
    pub async fn open(db: &LocalDb, max_size: usize, signals: SignalBus) -> Result<Self, SyncError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM sync_queue")
            .fetch_one(db.pool())
            .await?;
        let existing: i64 = row.try_get("n")?;
        if existing > 0 {
            info!(pending = existing, "Sync queue has entries from previous run");
        }
        crate::metrics::set_queue_size("sync", existing as usize);

        Ok(Self {
            pool: db.pool().clone(),
            max_size,
            signals,
            size: AtomicUsize::new(existing as usize),
            write_lock: Mutex::new(()),
        })
    }

    /// Add an event; returns the new queue size.
    ///
    /// Re-enqueueing an id that is already queued replaces the row and
    /// never grows the queue. A new id on a full queue fails with
    /// [`SyncError::QueueFull`].
    pub async fn enqueue(&self, event: &Event) -> Result<usize, SyncError> {
        let _guard = self.write_lock.lock().await;
        let record = serde_json::to_string(event)?;

        let mut tx = self.pool.begin().await?;
        let present = sqlx::query("SELECT 1 FROM sync_queue WHERE event_id = ?")
            .bind(&event.id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();

        let current = self.size.load(Ordering::Acquire);
        if !present && current >= self.max_size {
            crate::metrics::record_queue_full("sync");
            warn!(size = current, max = self.max_size, event_id = %event.id, "Sync queue full, rejecting event");
            return Err(SyncError::QueueFull { max: self.max_size });
        }

        sqlx::query(
            "INSERT OR REPLACE INTO sync_queue (event_id, priority, timestamp, event, enqueued_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&event.id)
        .bind(event.priority().as_i64())
        .bind(event.timestamp)
        .bind(&record)
        .bind(now_millis())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        let size = if present {
            current
        } else {
            self.size.fetch_add(1, Ordering::AcqRel) + 1
        };
        crate::metrics::set_queue_size("sync", size);
        debug!(event_id = %event.id, priority = ?event.priority(), size, "Event enqueued");

        match QueuePressure::from_fill(size, self.max_size) {
            QueuePressure::Normal => {}
            QueuePressure::Warn => {
                warn!(size, max = self.max_size, "Sync queue above 80% capacity");
            }
            QueuePressure::NearFull | QueuePressure::Full => {
                warn!(size, max = self.max_size, "Sync queue above 90% capacity");
                self.signals.publish(Signal::QueueNearFull {
                    size,
                    max: self.max_size,
                });
            }
        }
        self.signals.publish(Signal::QueueUpdated { size });
        Ok(size)
    }

    /// Remove and return the highest-priority, oldest entry.
    ///
    /// Rows that no longer decode are dropped on the way; the event log
    /// still holds those events as unsynced.
    pub async fn dequeue(&self) -> Result<Option<QueueEntry>, SyncError> {
        let _guard = self.write_lock.lock().await;
        let sql = format!("SELECT event_id, event, enqueued_at FROM sync_queue {ORDER} LIMIT 1");

        loop {
            let mut tx = self.pool.begin().await?;
            let Some(row) = sqlx::query(&sql).fetch_optional(&mut *tx).await? else {
                return Ok(None);
            };
            let event_id: String = row.try_get("event_id")?;
            let decoded = decode(&row);
            sqlx::query("DELETE FROM sync_queue WHERE event_id = ?")
                .bind(&event_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            let size = self.shrink(1);

            match decoded {
                Ok(entry) => {
                    debug!(%event_id, size, "Event dequeued");
                    return Ok(Some(entry));
                }
                Err(e) => {
                    crate::metrics::record_corrupt_queue_entry("sync");
                    error!(%event_id, error = %e, "Undecodable queue entry dropped");
                }
            }
        }
    }

    /// The entry [`dequeue`](Self::dequeue) would return, left in place.
    pub async fn peek(&self) -> Result<Option<QueueEntry>, SyncError> {
        Ok(self.peek_batch(1).await?.into_iter().next())
    }

    /// Up to `limit` entries in drain order, left in place.
    ///
    /// Undecodable rows are purged rather than returned, so the batch can
    /// come back shorter than `limit` while more entries remain.
    pub async fn peek_batch(&self, limit: usize) -> Result<Vec<QueueEntry>, SyncError> {
        let sql = format!("SELECT event_id, event, enqueued_at FROM sync_queue {ORDER} LIMIT ?");
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        let mut corrupt = Vec::new();
        for row in &rows {
            match decode(row) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    let event_id: String = row.try_get("event_id")?;
                    crate::metrics::record_corrupt_queue_entry("sync");
                    error!(%event_id, error = %e, "Undecodable queue entry, purging");
                    corrupt.push(event_id);
                }
            }
        }
        if !corrupt.is_empty() {
            self.remove(&corrupt).await?;
        }
        Ok(entries)
    }

    /// Acknowledge entries by event id. Returns how many were removed.
    pub async fn remove(&self, ids: &[String]) -> Result<usize, SyncError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_lock.lock().await;

        let sql = format!(
            "DELETE FROM sync_queue WHERE event_id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let mut tx = self.pool.begin().await?;
        let removed = query.execute(&mut *tx).await?.rows_affected() as usize;
        tx.commit().await?;

        let size = self.shrink(removed);
        debug!(removed, size, "Queue entries acknowledged");
        Ok(removed)
    }

    pub async fn contains(&self, id: &str) -> Result<bool, SyncError> {
        let row = sqlx::query("SELECT 1 FROM sync_queue WHERE event_id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn clear(&self) -> Result<(), SyncError> {
        let _guard = self.write_lock.lock().await;
        let removed = sqlx::query("DELETE FROM sync_queue")
            .execute(&self.pool)
            .await?
            .rows_affected();
        self.size.store(0, Ordering::Release);
        crate::metrics::set_queue_size("sync", 0);
        info!(removed, "Sync queue cleared");
        Ok(())
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    #[must_use]
    pub fn pressure(&self) -> QueuePressure {
        QueuePressure::from_fill(self.size(), self.max_size)
    }

    // Caller holds the write lock.
    fn shrink(&self, by: usize) -> usize {
        let before = self.size.load(Ordering::Acquire);
        let after = before.saturating_sub(by);
        self.size.store(after, Ordering::Release);
        crate::metrics::set_queue_size("sync", after);
        after
    }
}

fn decode(row: &SqliteRow) -> Result<QueueEntry, StorageError> {
    let record: String = row.try_get("event")?;
    let event: Event = serde_json::from_str(&record)?;
    Ok(QueueEntry {
        priority: event.priority(),
        enqueued_at: row.try_get("enqueued_at")?,
        event,
    })
}
