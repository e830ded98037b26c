// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{HighlightStore, StorageError};
use crate::highlight::Highlight;

/// [`HighlightStore`] kept entirely in memory. Useful for tests and for
/// hosts that persist highlights somewhere else.
#[derive(Debug, Default)]
pub struct InMemoryHighlightStore {
    data: DashMap<String, Highlight>,
}

impl InMemoryHighlightStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&self) {
        self.data.clear();
    }
}

#[async_trait]
impl HighlightStore for InMemoryHighlightStore {
    async fn get(&self, id: &str) -> Result<Option<Highlight>, StorageError> {
        Ok(self.data.get(id).map(|r| r.value().clone()))
    }

    async fn put(&self, highlight: &Highlight) -> Result<(), StorageError> {
        self.data.insert(highlight.id.clone(), highlight.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.data.remove(id).is_some())
    }

    async fn find_by_url(&self, url: &str) -> Result<Vec<Highlight>, StorageError> {
        let mut found: Vec<Highlight> = self
            .data
            .iter()
            .filter(|r| r.value().url == url)
            .map(|r| r.value().clone())
            .collect();
        // DashMap iteration order is arbitrary.
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn list(&self) -> Result<Vec<Highlight>, StorageError> {
        let mut all: Vec<Highlight> = self.data.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }

    async fn count(&self) -> Result<u64, StorageError> {
        Ok(self.data.len() as u64)
    }
}
