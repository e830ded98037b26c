// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite storage for everything the sync core keeps on the device.
//!
//! One database holds four tables:
//!
//! ```sql
//! CREATE TABLE events (
//!   id TEXT PRIMARY KEY,
//!   event_type TEXT NOT NULL,
//!   entity_id TEXT,            -- payload.id, for per-entity lookups
//!   payload BLOB NOT NULL,     -- codec output (JSON, optionally compressed/sealed)
//!   timestamp INTEGER NOT NULL,
//!   device_id TEXT NOT NULL,
//!   vector_clock TEXT,
//!   checksum TEXT NOT NULL,
//!   user_id TEXT,
//!   synced_at INTEGER          -- set once the remote acknowledged the event
//! );
//! CREATE TABLE sync_queue (
//!   event_id TEXT PRIMARY KEY, priority INTEGER, timestamp INTEGER,
//!   event TEXT, enqueued_at INTEGER
//! );  -- drained by (priority DESC, timestamp ASC)
//! CREATE TABLE offline_queue (event_id TEXT PRIMARY KEY, event TEXT, enqueued_at INTEGER);
//! CREATE TABLE highlights (id TEXT PRIMARY KEY, url TEXT, record TEXT, updated_at INTEGER);
//! ```
//!
//! File databases run in WAL mode with `synchronous = NORMAL`: readers never
//! block the writer and each commit costs one fsync.

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Row;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::traits::{HighlightStore, StorageError};
use crate::highlight::Highlight;
use crate::resilience::retry::{retry, RetryConfig};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS events (
        id TEXT PRIMARY KEY,
        event_type TEXT NOT NULL,
        entity_id TEXT,
        payload BLOB NOT NULL,
        timestamp INTEGER NOT NULL,
        device_id TEXT NOT NULL,
        vector_clock TEXT,
        checksum TEXT NOT NULL,
        user_id TEXT,
        synced_at INTEGER
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events (timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_events_entity ON events (entity_id, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_events_unsynced ON events (synced_at) WHERE synced_at IS NULL",
    r#"CREATE TABLE IF NOT EXISTS sync_queue (
        event_id TEXT PRIMARY KEY,
        priority INTEGER NOT NULL,
        timestamp INTEGER NOT NULL,
        event TEXT NOT NULL,
        enqueued_at INTEGER NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_order ON sync_queue (priority DESC, timestamp ASC)",
    r#"CREATE TABLE IF NOT EXISTS offline_queue (
        event_id TEXT PRIMARY KEY,
        event TEXT NOT NULL,
        enqueued_at INTEGER NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_offline_queue_order ON offline_queue (enqueued_at)",
    r#"CREATE TABLE IF NOT EXISTS highlights (
        id TEXT PRIMARY KEY,
        url TEXT NOT NULL,
        record TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_highlights_url ON highlights (url)",
];

/// Handle to the device-local SQLite database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LocalDb {
    pool: SqlitePool,
}

impl LocalDb {
    /// Open (creating if needed) a database file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool_options = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10));

        let db = Self::connect(options, pool_options).await?;
        info!(path = %path.as_ref().display(), "Opened local database");
        Ok(db)
    }

    /// Open from a connection URL; `sqlite::memory:` selects [`in_memory`](Self::in_memory).
    pub async fn open_url(url: &str) -> Result<Self, StorageError> {
        if url.contains(":memory:") {
            return Self::in_memory().await;
        }
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);
        Self::open(path).await
    }

    /// Private in-memory database, alive as long as this handle.
    pub async fn in_memory() -> Result<Self, StorageError> {
        // Each connection to :memory: is a separate database, so pin the
        // pool to one connection that never expires.
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .journal_mode(SqliteJournalMode::Memory);

        let pool_options = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>);

        Self::connect(options, pool_options).await
    }

    async fn connect(
        options: SqliteConnectOptions,
        pool_options: SqlitePoolOptions,
    ) -> Result<Self, StorageError> {
        let pool = retry("sqlite_connect", &RetryConfig::startup(), || {
            let options = options.clone();
            let pool_options = pool_options.clone();
            async move {
                pool_options
                    .connect_with(options)
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))
            }
        })
        .await?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!(statements = SCHEMA.len(), "Schema ready");
        Ok(())
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// `?, ?, ?` for an IN-list of `n` binds.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// [`HighlightStore`] backed by the `highlights` table.
///
/// Records are stored whole as JSON; `url` is duplicated into its own
/// indexed column for [`find_by_url`](HighlightStore::find_by_url).
#[derive(Debug, Clone)]
pub struct SqlHighlightStore {
    pool: SqlitePool,
}

impl SqlHighlightStore {
    #[must_use]
    pub fn new(db: &LocalDb) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<Highlight, StorageError> {
        let record: String = row.try_get("record")?;
        Ok(serde_json::from_str(&record)?)
    }
}

#[async_trait]
impl HighlightStore for SqlHighlightStore {
    async fn get(&self, id: &str) -> Result<Option<Highlight>, StorageError> {
        let row = retry("sql_highlight_get", &RetryConfig::query(), || async {
            Ok::<_, StorageError>(sqlx::query("SELECT record FROM highlights WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?)
        })
        .await?;
        row.as_ref().map(Self::decode).transpose()
    }

    async fn put(&self, highlight: &Highlight) -> Result<(), StorageError> {
        let record = serde_json::to_string(highlight)?;
        retry("sql_highlight_put", &RetryConfig::query(), || async {
            sqlx::query(
                "INSERT INTO highlights (id, url, record, updated_at) VALUES (?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    url = excluded.url,
                    record = excluded.record,
                    updated_at = excluded.updated_at",
            )
            .bind(&highlight.id)
            .bind(&highlight.url)
            .bind(&record)
            .bind(highlight.updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        retry("sql_highlight_delete", &RetryConfig::query(), || async {
            let result = sqlx::query("DELETE FROM highlights WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn find_by_url(&self, url: &str) -> Result<Vec<Highlight>, StorageError> {
        let rows = retry("sql_highlight_find_by_url", &RetryConfig::query(), || async {
            Ok::<_, StorageError>(sqlx::query("SELECT record FROM highlights WHERE url = ? ORDER BY rowid")
                .bind(url)
                .fetch_all(&self.pool)
                .await?)
        })
        .await?;
        rows.iter().map(Self::decode).collect()
    }

    async fn list(&self) -> Result<Vec<Highlight>, StorageError> {
        let rows = retry("sql_highlight_list", &RetryConfig::query(), || async {
            Ok::<_, StorageError>(sqlx::query("SELECT record FROM highlights ORDER BY rowid")
                .fetch_all(&self.pool)
                .await?)
        })
        .await?;
        rows.iter().map(Self::decode).collect()
    }

    async fn count(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM highlights")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    /// All-or-nothing: one transaction for the whole batch.
    async fn put_batch(&self, highlights: &[Highlight]) -> Result<usize, StorageError> {
        if highlights.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        for highlight in highlights {
            let record = serde_json::to_string(highlight)?;
            sqlx::query(
                "INSERT INTO highlights (id, url, record, updated_at) VALUES (?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    url = excluded.url,
                    record = excluded.record,
                    updated_at = excluded.updated_at",
            )
            .bind(&highlight.id)
            .bind(&highlight.url)
            .bind(&record)
            .bind(highlight.updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(count = highlights.len(), "Highlight batch written");
        Ok(highlights.len())
    }
}
