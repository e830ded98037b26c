// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Append-only local event log.
//!
//! Every local mutation is recorded here before anything else happens to
//! it. The log is:
//!
//! - **Append-only**: events are never updated; only the `synced_at`
//!   bookkeeping column changes after upload.
//! - **Verified**: appends are validated (including the payload checksum)
//!   and duplicate ids are refused. Reads re-verify checksums and skip rows
//!   that no longer match.
//! - **Ordered**: reads return ascending timestamp, ties broken by
//!   insertion order, regardless of the order events were appended in.

use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::{debug, error, info};

use crate::codec::PayloadCodec;
use crate::error::{AppendError, StorageError, SyncError};
use crate::event::{now_millis, Event, EventType};
use crate::storage::sql::{placeholders, LocalDb};
use crate::validation::{validate_event_at, DEFAULT_CLOCK_SKEW_MS};

const COLUMNS: &str =
    "id, event_type, payload, timestamp, device_id, vector_clock, checksum, user_id";

/// Query for [`EventStore::get_events`]. All criteria are optional and
/// combine with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub event_type: Option<EventType>,
    pub entity_id: Option<String>,
    /// Inclusive lower bound (epoch millis)
    pub since: Option<i64>,
    /// Exclusive upper bound (epoch millis)
    pub until: Option<i64>,
    /// Oldest N matches
    pub limit: Option<usize>,
}

impl EventFilter {
    #[must_use]
    pub fn of_type(event_type: EventType) -> Self {
        Self {
            event_type: Some(event_type),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn for_entity(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: Some(entity_id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn since(mut self, timestamp: i64) -> Self {
        self.since = Some(timestamp);
        self
    }

    #[must_use]
    pub fn until(mut self, timestamp: i64) -> Self {
        self.until = Some(timestamp);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

pub struct EventStore {
    pool: SqlitePool,
    codec: PayloadCodec,
    clock_skew_ms: i64,
}

impl EventStore {
    #[must_use]
    pub fn new(db: &LocalDb) -> Self {
        Self {
            pool: db.pool().clone(),
            codec: PayloadCodec::default(),
            clock_skew_ms: DEFAULT_CLOCK_SKEW_MS,
        }
    }

    /// Encode payloads at rest with this codec (e.g. to seal them).
    #[must_use]
    pub fn with_codec(mut self, codec: PayloadCodec) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub fn with_clock_skew(mut self, clock_skew_ms: i64) -> Self {
        self.clock_skew_ms = clock_skew_ms;
        self
    }

    /// Validate and persist one event.
    ///
    /// Fails with [`SyncError::Validation`] when the event breaks an
    /// invariant and with [`AppendError::Duplicate`] when its id is already
    /// stored. Nothing is written in either case.
    pub async fn append(&self, event: &Event) -> Result<(), SyncError> {
        if let Err(e) = validate_event_at(event, now_millis(), self.clock_skew_ms) {
            crate::metrics::record_append_rejected("validation");
            debug!(event_id = %event.id, error = %e, "Event rejected by validation");
            return Err(e.into());
        }

        let payload = self.codec.encode(&event.payload)?;
        let vector_clock = event.vector_clock.as_ref().map(|v| v.to_string());

        let mut tx = self.pool.begin().await.map_err(append_failure)?;
        let existing = sqlx::query("SELECT 1 FROM events WHERE id = ?")
            .bind(&event.id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(append_failure)?;
        if existing.is_some() {
            crate::metrics::record_append_rejected("duplicate");
            return Err(AppendError::Duplicate(event.id.clone()).into());
        }

        sqlx::query(
            "INSERT INTO events
                (id, event_type, entity_id, payload, timestamp, device_id, vector_clock, checksum, user_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.id)
        .bind(event.event_type.as_str())
        .bind(event.entity_id())
        .bind(payload)
        .bind(event.timestamp)
        .bind(&event.device_id)
        .bind(vector_clock)
        .bind(&event.checksum)
        .bind(&event.user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                SyncError::from(AppendError::Duplicate(event.id.clone()))
            } else {
                append_failure(e)
            }
        })?;
        tx.commit().await.map_err(append_failure)?;

        crate::metrics::record_event_appended(event.event_type.as_str());
        debug!(event_id = %event.id, event_type = %event.event_type, "Event appended");
        Ok(())
    }

    /// Events matching `filter`, oldest first.
    pub async fn get_events(&self, filter: &EventFilter) -> Result<Vec<Event>, SyncError> {
        let mut sql = format!("SELECT {COLUMNS} FROM events WHERE 1 = 1");
        if filter.event_type.is_some() {
            sql.push_str(" AND event_type = ?");
        }
        if filter.entity_id.is_some() {
            sql.push_str(" AND entity_id = ?");
        }
        if filter.since.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        if filter.until.is_some() {
            sql.push_str(" AND timestamp < ?");
        }
        sql.push_str(" ORDER BY timestamp ASC, rowid ASC");
        if filter.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(event_type) = filter.event_type {
            query = query.bind(event_type.as_str());
        }
        if let Some(entity_id) = &filter.entity_id {
            query = query.bind(entity_id);
        }
        if let Some(since) = filter.since {
            query = query.bind(since);
        }
        if let Some(until) = filter.until {
            query = query.bind(until);
        }
        if let Some(limit) = filter.limit {
            query = query.bind(limit as i64);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(self.decode_rows(&rows))
    }

    pub async fn get_all(&self) -> Result<Vec<Event>, SyncError> {
        self.get_events(&EventFilter::default()).await
    }

    /// Events with `timestamp >= since`, oldest first.
    pub async fn get_events_since(&self, since: i64) -> Result<Vec<Event>, SyncError> {
        self.get_events(&EventFilter::default().since(since)).await
    }

    /// Most recent event about `entity_id`.
    pub async fn get_latest_event(&self, entity_id: &str) -> Result<Option<Event>, SyncError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM events WHERE entity_id = ? ORDER BY timestamp DESC, rowid DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().and_then(|r| self.decode_verified(r)))
    }

    pub async fn contains(&self, id: &str) -> Result<bool, SyncError> {
        let row = sqlx::query("SELECT 1 FROM events WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn count(&self) -> Result<u64, SyncError> {
        self.scalar("SELECT COUNT(*) AS n FROM events").await
    }

    /// Remove every event. Only for resets and tests.
    pub async fn clear(&self) -> Result<(), SyncError> {
        let result = sqlx::query("DELETE FROM events").execute(&self.pool).await?;
        info!(removed = result.rows_affected(), "Event store cleared");
        Ok(())
    }

    /// Record that the remote acknowledged these events.
    pub async fn mark_synced(&self, ids: &[String]) -> Result<u64, SyncError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE events SET synced_at = ? WHERE synced_at IS NULL AND id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql).bind(now_millis());
        for id in ids {
            query = query.bind(id);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    pub async fn unsynced_count(&self) -> Result<u64, SyncError> {
        self.scalar("SELECT COUNT(*) AS n FROM events WHERE synced_at IS NULL")
            .await
    }

    /// Oldest events not yet acknowledged by the remote.
    pub async fn get_unsynced(&self, limit: usize) -> Result<Vec<Event>, SyncError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM events WHERE synced_at IS NULL ORDER BY timestamp ASC, rowid ASC LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(self.decode_rows(&rows))
    }

    /// Whether an unsynced local event exists for `entity_id`.
    pub async fn has_unsynced_for(&self, entity_id: &str) -> Result<bool, SyncError> {
        let row = sqlx::query("SELECT 1 FROM events WHERE entity_id = ? AND synced_at IS NULL LIMIT 1")
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn scalar(&self, sql: &str) -> Result<u64, SyncError> {
        let row = sqlx::query(sql).fetch_one(&self.pool).await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    fn decode_rows(&self, rows: &[SqliteRow]) -> Vec<Event> {
        rows.iter().filter_map(|r| self.decode_verified(r)).collect()
    }

    // Undecodable or tampered rows are logged and skipped; one bad row must
    // not hide the rest of the log.
    fn decode_verified(&self, row: &SqliteRow) -> Option<Event> {
        match self.decode(row) {
            Ok(event) if event.verify_checksum() => Some(event),
            Ok(event) => {
                let actual = Event::compute_checksum(&event.payload);
                let err = StorageError::Corruption {
                    id: event.id.clone(),
                    expected: event.checksum.clone(),
                    actual,
                };
                error!(event_id = %event.id, error = %err, "Stored event failed checksum, skipping");
                crate::metrics::record_corruption(&event.id);
                None
            }
            Err(e) => {
                error!(error = %e, "Undecodable event row, skipping");
                crate::metrics::record_corruption("undecodable");
                None
            }
        }
    }

    fn decode(&self, row: &SqliteRow) -> Result<Event, StorageError> {
        let event_type: String = row.try_get("event_type")?;
        let payload: Vec<u8> = row.try_get("payload")?;
        let vector_clock: Option<String> = row.try_get("vector_clock")?;

        Ok(Event {
            id: row.try_get("id")?,
            event_type: event_type.parse().map_err(StorageError::Serialization)?,
            payload: self
                .codec
                .decode(&payload)
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
            timestamp: row.try_get("timestamp")?,
            device_id: row.try_get("device_id")?,
            vector_clock: vector_clock
                .map(|s| serde_json::from_str(&s))
                .transpose()?,
            checksum: row.try_get("checksum")?,
            user_id: row.try_get("user_id")?,
        })
    }
}

fn append_failure(err: sqlx::Error) -> SyncError {
    AppendError::Storage(err.to_string()).into()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}
