// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use crate::highlight::Highlight;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Item not found")]
    NotFound,
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Data corruption detected for '{id}': expected hash {expected}, got {actual}")]
    Corruption {
        id: String,
        expected: String,
        actual: String,
    },
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Local highlight storage used by the dual-write repository.
///
/// The local copy is authoritative for reads, so implementations must make
/// a successful `put` visible to every later `get`/`find_by_url`.
#[async_trait]
pub trait HighlightStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Highlight>, StorageError>;
    async fn put(&self, highlight: &Highlight) -> Result<(), StorageError>;
    /// Returns whether a record was removed.
    async fn delete(&self, id: &str) -> Result<bool, StorageError>;
    async fn find_by_url(&self, url: &str) -> Result<Vec<Highlight>, StorageError>;
    async fn list(&self) -> Result<Vec<Highlight>, StorageError>;
    async fn count(&self) -> Result<u64, StorageError>;

    /// Write several highlights. Default implementation falls back to
    /// sequential puts.
    async fn put_batch(&self, highlights: &[Highlight]) -> Result<usize, StorageError> {
        for highlight in highlights {
            self.put(highlight).await?;
        }
        Ok(highlights.len())
    }
}
