// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Dual-write highlight repository.
//!
//! Every mutation has two halves:
//!
//! 1. A local write, awaited. Its result is the caller's result.
//! 2. When signed in and not `skip_sync`, a remote mirror of the same
//!    change on a background task. A failed mirror is logged and parked in
//!    the offline queue as an event; it never reaches the caller.
//!
//! `skip_sync` exists for writes that came *from* the remote (pulls, read
//! repair) so they don't echo back.
//!
//! Background tasks are detached from the repository: dropping it, or
//! cancelling [`HighlightRepository::settle`], never cancels a mirror
//! that is already in flight.
//!
//! Reads are local, except [`HighlightRepository::find_by_url`], which asks
//! both sides concurrently, merges with local winning, and backfills
//! remote-only records into local storage in the background.

use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::auth::AuthSession;
use crate::error::{StorageError, SyncError};
use crate::event::{Event, EventType};
use crate::highlight::{Highlight, HighlightPatch};
use crate::queue::OfflineQueue;
use crate::remote::{RecordFilter, RemoteApi};
use crate::storage::traits::HighlightStore;
use crate::validation::validate_highlight;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Write locally only; never mirror to the remote.
    pub skip_sync: bool,
}

impl WriteOptions {
    #[must_use]
    pub fn local_only() -> Self {
        Self { skip_sync: true }
    }
}

/// A change to replay on the remote.
#[derive(Debug, Clone)]
enum Mirror {
    Create(Highlight),
    Update(Highlight),
    Delete(String),
}

impl Mirror {
    fn operation(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Update(_) => "update",
            Self::Delete(_) => "delete",
        }
    }

    fn id(&self) -> &str {
        match self {
            Self::Create(h) | Self::Update(h) => &h.id,
            Self::Delete(id) => id,
        }
    }

    async fn apply(&self, remote: &dyn RemoteApi) -> Result<(), SyncError> {
        match self {
            Self::Create(h) => remote.create_record(h).await.map(|_| ()),
            Self::Update(h) => remote.update_record(h).await.map(|_| ()),
            Self::Delete(id) => remote.delete_record(id).await,
        }
    }

    /// The event that replays this change through the sync queue later.
    fn into_event(self, device_id: &str, user_id: Option<String>) -> Result<Event, SyncError> {
        let (event_type, payload) = match self {
            Self::Create(h) => (EventType::HighlightCreated, serde_json::to_value(h)?),
            Self::Update(h) => (EventType::HighlightUpdated, serde_json::to_value(h)?),
            Self::Delete(id) => (EventType::HighlightDeleted, json!({ "id": id })),
        };
        let event = Event::new(event_type, payload, device_id);
        Ok(match user_id {
            Some(user) => event.with_user(user),
            None => event,
        })
    }
}

pub struct HighlightRepository {
    local: Arc<dyn HighlightStore>,
    remote: Arc<dyn RemoteApi>,
    auth: AuthSession,
    offline: Arc<OfflineQueue>,
    device_id: String,
    tasks: TaskTracker,
    settling: tokio::sync::Mutex<()>,
}

impl HighlightRepository {
    pub fn new(
        local: Arc<dyn HighlightStore>,
        remote: Arc<dyn RemoteApi>,
        auth: AuthSession,
        offline: Arc<OfflineQueue>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            local,
            remote,
            auth,
            offline,
            device_id: device_id.into(),
            tasks: TaskTracker::new(),
            settling: tokio::sync::Mutex::new(()),
        }
    }

    /// Sanitize, validate and store a new highlight.
    pub async fn add(&self, highlight: Highlight, options: WriteOptions) -> Result<Highlight, SyncError> {
        let mut highlight = highlight.sanitized()?;
        validate_highlight(&highlight)?;
        if highlight.user_id.is_none() {
            highlight.user_id = self.auth.current_user();
        }

        self.local.put(&highlight).await?;
        debug!(id = %highlight.id, "Highlight stored locally");

        self.mirror(Mirror::Create(highlight.clone()), options);
        Ok(highlight)
    }

    pub async fn update(
        &self,
        id: &str,
        patch: HighlightPatch,
        options: WriteOptions,
    ) -> Result<Highlight, SyncError> {
        let mut highlight = self.local.get(id).await?.ok_or(StorageError::NotFound)?;
        highlight.apply(patch);
        let highlight = highlight.sanitized()?;
        validate_highlight(&highlight)?;

        self.local.put(&highlight).await?;
        debug!(id = %highlight.id, "Highlight updated locally");

        self.mirror(Mirror::Update(highlight.clone()), options);
        Ok(highlight)
    }

    /// Hard delete locally; the remote gets a soft delete. Returns whether
    /// a local record existed.
    pub async fn remove(&self, id: &str, options: WriteOptions) -> Result<bool, SyncError> {
        let removed = self.local.delete(id).await?;
        if removed {
            debug!(id, "Highlight removed locally");
            self.mirror(Mirror::Delete(id.to_string()), options);
        }
        Ok(removed)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Highlight>, SyncError> {
        Ok(self.local.get(id).await?)
    }

    pub async fn list_all(&self) -> Result<Vec<Highlight>, SyncError> {
        Ok(self.local.list().await?)
    }

    pub async fn count(&self) -> Result<u64, SyncError> {
        Ok(self.local.count().await?)
    }

    /// Local and remote highlights for `url`, merged by id (local wins).
    ///
    /// Remote failures degrade to the local result. Remote-only records
    /// are written back locally in the background.
    pub async fn find_by_url(&self, url: &str) -> Result<Vec<Highlight>, SyncError> {
        let _timer = crate::metrics::LatencyTimer::new("find_by_url");
        let (local, remote) = tokio::join!(self.local.find_by_url(url), self.remote_for_url(url));
        let mut merged = local?;

        let remote = match remote {
            Ok(records) => records,
            Err(e) => {
                warn!(url, error = %e, "Remote read failed, serving local highlights");
                Vec::new()
            }
        };

        let known: HashSet<String> = merged.iter().map(|h| h.id.clone()).collect();
        let missing: Vec<Highlight> = remote
            .into_iter()
            .filter(|h| !h.deleted && !known.contains(&h.id))
            .collect();

        if !missing.is_empty() {
            merged.extend(missing.iter().cloned());
            self.spawn_read_repair(missing);
        }
        Ok(merged)
    }

    /// Apply a highlight event that came from the remote, without echoing
    /// it back. Returns whether local state changed.
    pub async fn apply_remote_event(&self, event: &Event) -> Result<bool, SyncError> {
        match event.event_type {
            EventType::HighlightCreated | EventType::HighlightUpdated => {
                let incoming: Highlight = serde_json::from_value(event.payload.clone())?;
                if let Some(current) = self.local.get(&incoming.id).await? {
                    if current.updated_at > incoming.updated_at {
                        debug!(id = %incoming.id, "Local highlight is newer, keeping it");
                        return Ok(false);
                    }
                }
                self.local.put(&incoming.sanitized()?).await?;
                Ok(true)
            }
            EventType::HighlightDeleted => match event.entity_id() {
                Some(id) => Ok(self.local.delete(&id).await?),
                None => Ok(false),
            },
            _ => {
                debug!(event_type = %event.event_type, "Not a highlight event, ignoring");
                Ok(false)
            }
        }
    }

    /// Wait for every background mirror and repair task to finish,
    /// including tasks spawned while waiting.
    pub async fn settle(&self) {
        // Closing is what lets `wait` complete; overlapping settles would
        // reopen the tracker under each other.
        let _settling = self.settling.lock().await;
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Background tasks still running.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    async fn remote_for_url(&self, url: &str) -> Result<Vec<Highlight>, SyncError> {
        if !self.auth.is_authenticated() {
            return Ok(Vec::new());
        }
        self.remote.list_records(&RecordFilter::for_url(url)).await
    }

    fn mirror(&self, change: Mirror, options: WriteOptions) {
        if options.skip_sync || !self.auth.is_authenticated() {
            return;
        }
        let remote = Arc::clone(&self.remote);
        let offline = Arc::clone(&self.offline);
        let device_id = self.device_id.clone();
        let user_id = self.auth.current_user();

        self.spawn(async move {
            let Err(err) = change.apply(remote.as_ref()).await else {
                debug!(operation = change.operation(), id = change.id(), "Remote mirror complete");
                return;
            };

            crate::metrics::record_remote_write_failure(change.operation());
            warn!(
                operation = change.operation(),
                id = change.id(),
                error = %err,
                "Remote write failed, parking change in offline queue"
            );
            let parked = match change.into_event(&device_id, user_id) {
                Ok(event) => offline.queue_offline(&event).await.map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = parked {
                error!(error = %e, "Failed to park remote write, change will not sync");
            }
        });
    }

    fn spawn_read_repair(&self, missing: Vec<Highlight>) {
        let local = Arc::clone(&self.local);
        self.spawn(async move {
            match local.put_batch(&missing).await {
                Ok(written) => {
                    crate::metrics::record_read_repair(written);
                    info!(repaired = written, "Read repair backfilled remote highlights");
                }
                Err(e) => warn!(error = %e, "Read repair failed"),
            }
        });
    }

    fn spawn(&self, task: impl std::future::Future<Output = ()> + Send + 'static) {
        self.tasks.spawn(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::highlight::HighlightColor;
    use crate::remote::InMemoryRemote;
    use crate::signals::SignalBus;
    use crate::storage::memory::InMemoryHighlightStore;
    use crate::storage::sql::LocalDb;
    use std::time::Duration;

    const URL: &str = "https://example.com/article";

    struct Fixture {
        repo: HighlightRepository,
        local: Arc<InMemoryHighlightStore>,
        remote: Arc<InMemoryRemote>,
        offline: Arc<OfflineQueue>,
        auth: AuthSession,
    }

    async fn fixture(signed_in: bool) -> Fixture {
        let auth = if signed_in {
            AuthSession::signed_in("user-1")
        } else {
            AuthSession::new()
        };
        let db = LocalDb::in_memory().await.unwrap();
        let offline = Arc::new(OfflineQueue::open(&db, None, SignalBus::default()).await.unwrap());
        let local = Arc::new(InMemoryHighlightStore::new());
        let remote = Arc::new(InMemoryRemote::new(auth.clone()));
        let repo = HighlightRepository::new(
            local.clone(),
            remote.clone(),
            auth.clone(),
            Arc::clone(&offline),
            "device-a",
        );
        Fixture {
            repo,
            local,
            remote,
            offline,
            auth,
        }
    }

    async fn wait_for(done: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition reached in time");
    }

    fn highlight(text: &str) -> Highlight {
        Highlight::new(URL, text, vec!["/p[1]:0-5".into()], HighlightColor::Yellow)
    }

    #[tokio::test]
    async fn test_add_writes_local_and_mirrors() {
        let f = fixture(true).await;
        let h = f.repo.add(highlight("hello"), WriteOptions::default()).await.unwrap();

        assert_eq!(f.local.get(&h.id).await.unwrap(), Some(h.clone()));
        f.repo.settle().await;
        assert_eq!(f.remote.record(&h.id).unwrap().text, "hello");
        assert_eq!(h.user_id.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn test_dropped_repository_still_finishes_mirror() {
        let f = fixture(true).await;
        f.remote.set_latency(Some(Duration::from_millis(50)));

        let h = f.repo.add(highlight("in flight"), WriteOptions::default()).await.unwrap();
        drop(f.repo);

        wait_for(|| f.remote.record(&h.id).is_some()).await;
        assert_eq!(f.remote.record(&h.id).unwrap().text, "in flight");
        assert_eq!(f.offline.offline_queue_size(), 0);
    }

    #[tokio::test]
    async fn test_dropped_repository_still_parks_failed_mirror() {
        let f = fixture(true).await;
        f.remote.set_latency(Some(Duration::from_millis(50)));
        f.remote.set_offline(true);

        f.repo.add(highlight("doomed"), WriteOptions::default()).await.unwrap();
        drop(f.repo);

        let offline = Arc::clone(&f.offline);
        wait_for(move || offline.offline_queue_size() == 1).await;
    }

    #[tokio::test]
    async fn test_cancelled_settle_keeps_tasks_running() {
        let f = fixture(true).await;
        f.remote.set_latency(Some(Duration::from_millis(50)));

        let h = f.repo.add(highlight("slow"), WriteOptions::default()).await.unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(1), f.repo.settle())
            .await
            .is_err());

        f.repo.settle().await;
        assert!(f.remote.record(&h.id).is_some());
        assert_eq!(f.repo.pending_tasks(), 0);
    }

    #[tokio::test]
    async fn test_skip_sync_stays_local() {
        let f = fixture(true).await;
        let h = f.repo.add(highlight("local"), WriteOptions::local_only()).await.unwrap();
        f.repo.settle().await;

        assert!(f.remote.record(&h.id).is_none());
        assert_eq!(f.remote.calls(), 0);
    }

    #[tokio::test]
    async fn test_signed_out_never_touches_remote() {
        let f = fixture(false).await;
        f.repo.add(highlight("anon"), WriteOptions::default()).await.unwrap();
        f.repo.find_by_url(URL).await.unwrap();
        f.repo.settle().await;
        assert_eq!(f.remote.calls(), 0);
        assert!(!f.auth.is_authenticated());
    }

    #[tokio::test]
    async fn test_remote_failure_parks_event_offline() {
        let f = fixture(true).await;
        f.remote.set_offline(true);

        let h = f.repo.add(highlight("offline"), WriteOptions::default()).await.unwrap();
        f.repo.settle().await;

        assert!(f.local.get(&h.id).await.unwrap().is_some());
        let parked = f.offline.pending(10).await.unwrap();
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].event_type, EventType::HighlightCreated);
        assert_eq!(parked[0].entity_id().as_deref(), Some(h.id.as_str()));
        assert_eq!(parked[0].user_id.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn test_update_and_remove() {
        let f = fixture(true).await;
        let h = f.repo.add(highlight("before"), WriteOptions::default()).await.unwrap();
        f.repo.settle().await;

        let patch = HighlightPatch {
            text: Some("after".into()),
            ..HighlightPatch::default()
        };
        let updated = f.repo.update(&h.id, patch, WriteOptions::default()).await.unwrap();
        assert_eq!(updated.text, "after");
        assert_ne!(updated.content_hash, h.content_hash);

        assert!(f.repo.remove(&h.id, WriteOptions::default()).await.unwrap());
        assert!(!f.repo.remove(&h.id, WriteOptions::default()).await.unwrap());
        f.repo.settle().await;

        assert!(f.repo.find_by_id(&h.id).await.unwrap().is_none());
        let remote = f.remote.record(&h.id).unwrap();
        assert!(remote.deleted);
        assert_eq!(remote.text, "after");
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let f = fixture(true).await;
        let err = f
            .repo
            .update("nope", HighlightPatch::default(), WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Storage(StorageError::NotFound)));
    }

    #[tokio::test]
    async fn test_invalid_highlight_rejected_before_write() {
        let f = fixture(true).await;
        let bad = Highlight::new("javascript:alert(1)", "x", vec!["r".into()], HighlightColor::Yellow);
        assert!(matches!(
            f.repo.add(bad, WriteOptions::default()).await,
            Err(SyncError::Validation(_))
        ));

        let no_ranges = Highlight::new(URL, "x", vec![], HighlightColor::Yellow);
        assert!(f.repo.add(no_ranges, WriteOptions::default()).await.is_err());
        assert_eq!(f.repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_repair_backfills_remote_only_records() {
        let f = fixture(true).await;
        let a = f.repo.add(highlight("A"), WriteOptions::local_only()).await.unwrap();
        let b = highlight("B").sanitized().unwrap();
        f.remote.insert_record(a.clone());
        f.remote.insert_record(b.clone());

        let found = f.repo.find_by_url(&a.url).await.unwrap();
        let ids: HashSet<_> = found.iter().map(|h| h.id.clone()).collect();
        assert_eq!(ids, HashSet::from([a.id.clone(), b.id.clone()]));

        f.repo.settle().await;
        assert_eq!(f.repo.find_by_id(&b.id).await.unwrap(), Some(b));
    }

    #[tokio::test]
    async fn test_local_wins_on_conflict() {
        let f = fixture(true).await;
        let local = f.repo.add(highlight("local text"), WriteOptions::local_only()).await.unwrap();
        let mut remote_copy = local.clone();
        remote_copy.text = "remote text".into();
        f.remote.insert_record(remote_copy);

        let found = f.repo.find_by_url(&local.url).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].text, "local text");
    }

    #[tokio::test]
    async fn test_soft_deleted_remote_records_ignored() {
        let f = fixture(true).await;
        let mut gone = highlight("gone").sanitized().unwrap();
        gone.deleted = true;
        f.remote.insert_record(gone);

        let found = f.repo.find_by_url(&highlight("x").sanitized().unwrap().url).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_remote_read_failure_degrades_to_local() {
        let f = fixture(true).await;
        let a = f.repo.add(highlight("A"), WriteOptions::local_only()).await.unwrap();
        f.remote.set_offline(true);

        let found = f.repo.find_by_url(&a.url).await.unwrap();
        assert_eq!(found, vec![a]);
    }

    #[tokio::test]
    async fn test_apply_remote_event() {
        let f = fixture(true).await;
        let h = highlight("from elsewhere").sanitized().unwrap();
        let created = Event::new(
            EventType::HighlightCreated,
            serde_json::to_value(&h).unwrap(),
            "device-b",
        );
        assert!(f.repo.apply_remote_event(&created).await.unwrap());
        assert!(f.repo.find_by_id(&h.id).await.unwrap().is_some());

        let deleted = Event::new(EventType::HighlightDeleted, json!({"id": h.id}), "device-b");
        assert!(f.repo.apply_remote_event(&deleted).await.unwrap());
        assert!(f.repo.find_by_id(&h.id).await.unwrap().is_none());

        f.repo.settle().await;
        assert_eq!(f.remote.calls(), 0);
    }
}
