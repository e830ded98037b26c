// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process loopback remote.
//!
//! Behaves like the real backend (auth check first, soft deletes, event
//! log ordered by timestamp) and adds knobs for failure injection: queued
//! one-shot errors, an offline switch, artificial latency and per-event
//! rejections. Used by tests, demos and hosts running without a backend.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use super::{PushResult, RecordFilter, RemoteApi};
use crate::auth::AuthSession;
use crate::error::SyncError;
use crate::event::{now_millis, Event};
use crate::highlight::Highlight;

pub struct InMemoryRemote {
    auth: AuthSession,
    records: DashMap<String, Highlight>,
    events: Mutex<Vec<Event>>,
    failures: Mutex<VecDeque<SyncError>>,
    rejected_events: DashSet<String>,
    offline: AtomicBool,
    latency: Mutex<Option<Duration>>,
    calls: AtomicU64,
}

impl InMemoryRemote {
    #[must_use]
    pub fn new(auth: AuthSession) -> Self {
        Self {
            auth,
            records: DashMap::new(),
            events: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            rejected_events: DashSet::new(),
            offline: AtomicBool::new(false),
            latency: Mutex::new(None),
            calls: AtomicU64::new(0),
        }
    }

    /// Fail the next `n` calls with `error`, after the auth check.
    pub fn fail_next(&self, n: usize, error: SyncError) {
        let mut failures = self.failures.lock();
        for _ in 0..n {
            failures.push_back(error.clone());
        }
    }

    /// While offline every call fails with [`SyncError::Network`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Report these event ids in `failed_ids` on push.
    pub fn reject_events<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in ids {
            self.rejected_events.insert(id.into());
        }
    }

    pub fn accept_all_events(&self) {
        self.rejected_events.clear();
    }

    /// Calls that got past authentication.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Seed a record directly, bypassing auth and failure injection.
    pub fn insert_record(&self, highlight: Highlight) {
        self.records.insert(highlight.id.clone(), highlight);
    }

    #[must_use]
    pub fn record(&self, id: &str) -> Option<Highlight> {
        self.records.get(id).map(|r| r.value().clone())
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Seed an event as if another device had pushed it.
    pub fn insert_event(&self, event: Event) {
        self.events.lock().push(event);
    }

    /// Every event accepted so far, in arrival order.
    #[must_use]
    pub fn pushed_events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    async fn begin(&self) -> Result<String, SyncError> {
        let user = self.auth.require_user()?;
        self.calls.fetch_add(1, Ordering::Relaxed);

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::Acquire) {
            return Err(SyncError::Network("remote unreachable".into()));
        }
        let injected = self.failures.lock().pop_front();
        match injected {
            Some(err) => Err(err),
            None => Ok(user),
        }
    }
}

#[async_trait]
impl RemoteApi for InMemoryRemote {
    async fn create_record(&self, highlight: &Highlight) -> Result<Highlight, SyncError> {
        let user = self.begin().await?;
        let mut record = highlight.clone();
        record.user_id.get_or_insert(user);
        self.records.insert(record.id.clone(), record.clone());
        debug!(id = %record.id, "Remote record created");
        Ok(record)
    }

    async fn update_record(&self, highlight: &Highlight) -> Result<Highlight, SyncError> {
        self.begin().await?;
        let Some(mut existing) = self.records.get_mut(&highlight.id) else {
            return Err(SyncError::Remote(format!(
                "record '{}' not found",
                highlight.id
            )));
        };
        let user_id = existing.user_id.clone();
        *existing = highlight.clone();
        if existing.user_id.is_none() {
            existing.user_id = user_id;
        }
        Ok(existing.clone())
    }

    async fn delete_record(&self, id: &str) -> Result<(), SyncError> {
        self.begin().await?;
        if let Some(mut record) = self.records.get_mut(id) {
            record.deleted = true;
            record.updated_at = now_millis().max(record.updated_at);
        }
        Ok(())
    }

    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<Highlight>, SyncError> {
        self.begin().await?;
        let mut records: Vec<Highlight> = self
            .records
            .iter()
            .map(|r| r.value().clone())
            .filter(|r| filter.include_deleted || !r.deleted)
            .filter(|r| filter.url.as_ref().map_or(true, |url| &r.url == url))
            .filter(|r| filter.updated_since.map_or(true, |since| r.updated_at >= since))
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn push_events(&self, events: &[Event]) -> Result<PushResult, SyncError> {
        self.begin().await?;
        let mut result = PushResult::default();
        let mut log = self.events.lock();
        for event in events {
            if self.rejected_events.contains(&event.id) || !event.verify_checksum() {
                result.failed_ids.push(event.id.clone());
                continue;
            }
            // Pushes are idempotent per event id.
            if !log.iter().any(|e| e.id == event.id) {
                log.push(event.clone());
            }
            result.synced_ids.push(event.id.clone());
        }
        debug!(
            synced = result.synced_ids.len(),
            failed = result.failed_ids.len(),
            "Remote accepted push"
        );
        Ok(result)
    }

    async fn pull_events(&self, since: i64) -> Result<Vec<Event>, SyncError> {
        self.begin().await?;
        let mut events: Vec<Event> = self
            .events
            .lock()
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }
}
