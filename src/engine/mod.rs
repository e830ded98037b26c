// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync engine: ties the event log, both queues and the remote together.
//!
//! # Data flow
//!
//! ```text
//! record(event) ──► EventStore (append, validated)
//!                      │
//!          online? ────┼──── yes ──► SyncQueue ──► sync_once() ──► RemoteApi::push_events
//!                      │                  ▲                           │
//!                      └─ no ──► OfflineQueue                         │ transient failure
//!                                      │  ▲                           │ or circuit open
//!                    resync_offline() ─┘  └───────────────────────────┘
//! ```
//!
//! A push acknowledges events one by one: synced ids leave the queue and
//! are marked synced in the log, failed ids stay queued for the next pass.
//! When the whole push fails with something that will likely clear up on
//! its own ([`SyncError::defers_to_offline`]), the batch moves to the
//! offline queue and comes back when the network does.
//!
//! # Wiring
//!
//! [`SyncEngineDeps::open`] builds every component bottom-up from a
//! [`SyncConfig`] and a transport. Tests and hosts with their own storage
//! can fill [`SyncEngineDeps`] by hand instead.
//!
//! # Example
//!
//! ```rust,no_run
//! use highlight_sync::auth::AuthSession;
//! use highlight_sync::engine::{SyncEngine, SyncEngineDeps};
//! use highlight_sync::remote::InMemoryRemote;
//! use highlight_sync::{Event, EventType, SyncConfig};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), highlight_sync::SyncError> {
//! let auth = AuthSession::signed_in("user-1");
//! let transport = Arc::new(InMemoryRemote::new(auth.clone()));
//! let deps = SyncEngineDeps::open(SyncConfig::for_device("laptop"), transport, auth, true).await?;
//! let engine = Arc::new(SyncEngine::new(deps));
//!
//! engine
//!     .record(Event::new(EventType::HighlightCreated, json!({"id": "hl-1"}), "laptop"))
//!     .await?;
//! let report = engine.sync_once().await?;
//! assert_eq!(report.synced, 1);
//!
//! let (stop, stopped) = tokio::sync::watch::channel(false);
//! let runner = tokio::spawn({
//!     let engine = Arc::clone(&engine);
//!     async move { engine.run(stopped).await }
//! });
//! let _ = stop.send(true);
//! let _ = runner.await;
//! # Ok(())
//! # }
//! ```

mod types;

pub use types::{EngineState, PullReport, Routed, SyncReport, SyncStatus};

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::auth::AuthSession;
use crate::batching::{FlushBatch, SyncBatcher};
use crate::config::SyncConfig;
use crate::error::{AppendError, SyncError};
use crate::event::{Event, EventType};
use crate::event_store::EventStore;
use crate::messaging::{MessageChannel, ReliableChannel};
use crate::network::NetworkDetector;
use crate::queue::{OfflineQueue, SyncQueue};
use crate::remote::{layered, RemoteApi};
use crate::repository::HighlightRepository;
use crate::resilience::circuit_breaker::SyncCircuits;
use crate::resilience::rate_limiter::RateLimiter;
use crate::signals::{Signal, SignalBus};
use crate::storage::sql::LocalDb;
use crate::storage::traits::HighlightStore;

/// Everything the engine needs, already constructed.
pub struct SyncEngineDeps {
    pub config: SyncConfig,
    pub db: LocalDb,
    pub signals: SignalBus,
    pub events: Arc<EventStore>,
    pub queue: Arc<SyncQueue>,
    pub offline: Arc<OfflineQueue>,
    pub network: NetworkDetector,
    pub circuits: SyncCircuits,
    pub limiter: Arc<RateLimiter>,
    pub auth: AuthSession,
    /// Fully decorated remote; see [`crate::remote::layered`]
    pub remote: Arc<dyn RemoteApi>,
}

impl SyncEngineDeps {
    /// Open the local database named by `config.database_url` (in memory
    /// when unset) and build the component graph around `transport`.
    pub async fn open<A>(
        config: SyncConfig,
        transport: A,
        auth: AuthSession,
        online: bool,
    ) -> Result<Self, SyncError>
    where
        A: RemoteApi + 'static,
    {
        let db = match &config.database_url {
            Some(url) => LocalDb::open_url(url).await?,
            None => LocalDb::in_memory().await?,
        };

        let signals = SignalBus::new(config.signal_capacity);
        let network = NetworkDetector::with_signals(online, signals.clone());
        let events = Arc::new(EventStore::new(&db).with_clock_skew(config.clock_skew_ms));
        let queue = Arc::new(SyncQueue::open(&db, config.max_queue_size, signals.clone()).await?);
        let offline = Arc::new(
            OfflineQueue::open(&db, config.max_offline_items, signals.clone()).await?,
        );
        let circuits = SyncCircuits::with_signals(config.circuit.clone(), &signals);
        let limiter =
            Arc::new(RateLimiter::new(config.rate_limits.clone()).with_signals(signals.clone()));
        let remote: Arc<dyn RemoteApi> = Arc::new(layered(
            transport,
            config.retry.clone(),
            Arc::clone(&circuits.sync),
            Arc::clone(&limiter),
            auth.clone(),
        ));

        Ok(Self {
            config,
            db,
            signals,
            events,
            queue,
            offline,
            network,
            circuits,
            limiter,
            auth,
            remote,
        })
    }
}

pub struct SyncEngine {
    config: SyncConfig,
    db: LocalDb,
    signals: SignalBus,
    events: Arc<EventStore>,
    queue: Arc<SyncQueue>,
    offline: Arc<OfflineQueue>,
    network: NetworkDetector,
    circuits: SyncCircuits,
    limiter: Arc<RateLimiter>,
    auth: AuthSession,
    remote: Arc<dyn RemoteApi>,
    batcher: Mutex<SyncBatcher>,
    /// One sync pass at a time
    pass: tokio::sync::Mutex<()>,
    state: watch::Sender<EngineState>,
}

impl SyncEngine {
    /// Assemble the engine and attach the offline queue to the network
    /// detector, so a reconnect announces pending entries.
    pub fn new(deps: SyncEngineDeps) -> Self {
        deps.offline.attach(&deps.network);
        let batcher = SyncBatcher::new(deps.config.batch.clone(), deps.signals.clone());
        let initial = if deps.network.is_online() {
            EngineState::Created
        } else {
            EngineState::Offline
        };
        let (state, _) = watch::channel(initial);

        Self {
            config: deps.config,
            db: deps.db,
            signals: deps.signals,
            events: deps.events,
            queue: deps.queue,
            offline: deps.offline,
            network: deps.network,
            circuits: deps.circuits,
            limiter: deps.limiter,
            auth: deps.auth,
            remote: deps.remote,
            batcher: Mutex::new(batcher),
            pass: tokio::sync::Mutex::new(()),
            state,
        }
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn signals(&self) -> &SignalBus {
        &self.signals
    }

    #[must_use]
    pub fn network(&self) -> &NetworkDetector {
        &self.network
    }

    #[must_use]
    pub fn events(&self) -> &EventStore {
        &self.events
    }

    #[must_use]
    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    #[must_use]
    pub fn offline(&self) -> &OfflineQueue {
        &self.offline
    }

    #[must_use]
    pub fn circuits(&self) -> &SyncCircuits {
        &self.circuits
    }

    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    #[must_use]
    pub fn db(&self) -> &LocalDb {
        &self.db
    }

    /// A repository over `local` that mirrors through this engine's remote
    /// stack and parks failed mirrors in this engine's offline queue.
    pub fn repository(&self, local: Arc<dyn HighlightStore>) -> HighlightRepository {
        HighlightRepository::new(
            local,
            Arc::clone(&self.remote),
            self.auth.clone(),
            Arc::clone(&self.offline),
            self.config.device_id.clone(),
        )
    }

    /// Wrap an extension messaging channel with the messaging breaker,
    /// the configured retry policy and `message_timeout`.
    pub fn reliable_channel<C: MessageChannel>(&self, inner: C) -> ReliableChannel<C> {
        ReliableChannel::new(
            inner,
            Arc::clone(&self.circuits.messaging),
            self.config.retry.clone(),
            self.config.message_timeout,
        )
    }

    /// Build an event for this device and the signed-in user, then
    /// [`record`](Self::record) it.
    pub async fn emit(&self, event_type: EventType, payload: Value) -> Result<Event, SyncError> {
        let mut event = Event::new(event_type, payload, self.config.device_id.clone());
        if let Some(user) = self.auth.current_user() {
            event = event.with_user(user);
        }
        self.record(event.clone()).await?;
        Ok(event)
    }

    /// Append `event` to the log and route it for upload.
    ///
    /// While offline the event goes to the offline queue; otherwise to the
    /// sync queue. A full queue fails the call, but the event stays in the
    /// log as unsynced.
    #[tracing::instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn record(&self, event: Event) -> Result<Routed, SyncError> {
        self.events.append(&event).await?;

        if !self.network.is_online() {
            self.offline.queue_offline(&event).await?;
            debug!("Recorded while offline, parked");
            return Ok(Routed::Offline);
        }
        self.queue.enqueue(&event).await?;
        Ok(Routed::Queued)
    }

    /// Push everything currently queued, in priority order.
    ///
    /// Returns `Ok` with per-event accounting even when the remote failed;
    /// the error that cut the pass short is in [`SyncReport::error`].
    /// Storage failures are returned as `Err`.
    #[tracing::instrument(skip(self))]
    pub async fn sync_once(&self) -> Result<SyncReport, SyncError> {
        let _pass = self.pass.lock().await;
        let mut report = SyncReport::default();

        if !self.network.is_online() {
            debug!("Offline, skipping sync pass");
            return Ok(report);
        }

        let entries = self.queue.peek_batch(self.queue.size().max(1)).await?;
        if entries.is_empty() {
            return Ok(report);
        }

        let batches = self.cut_batches(entries.into_iter().map(|entry| entry.event));
        let previous = self.state.send_replace(EngineState::Syncing);
        let _timer = crate::metrics::LatencyTimer::new("sync_pass");

        let outcome = self.push_batches(batches, &mut report).await;

        self.state.send_replace(previous);
        outcome?;

        crate::metrics::record_sync_outcome("synced", report.synced);
        crate::metrics::record_sync_outcome("failed", report.failed);
        crate::metrics::record_sync_outcome("deferred", report.deferred);
        self.signals.publish(Signal::SyncCompleted {
            synced: report.synced,
            failed: report.failed,
            deferred: report.deferred,
        });
        info!(
            attempted = report.attempted,
            synced = report.synced,
            failed = report.failed,
            deferred = report.deferred,
            batches = report.batches,
            "Sync pass complete"
        );
        Ok(report)
    }

    /// Move parked entries back into the sync queue, then sync.
    #[tracing::instrument(skip(self))]
    pub async fn resync_offline(&self) -> Result<SyncReport, SyncError> {
        if !self.network.is_online() {
            return Ok(SyncReport::default());
        }

        let mut moved = 0;
        loop {
            let step = self
                .offline
                .drain_to(&self.queue, self.config.drain_batch_size)
                .await?;
            if step == 0 {
                break;
            }
            moved += step;
        }
        if moved > 0 {
            info!(moved, remaining = self.offline.offline_queue_size(), "Offline entries requeued");
        }
        self.sync_once().await
    }

    /// Pull remote events from `since` on, store the new ones and apply
    /// highlight changes through `repository` without echoing them back.
    ///
    /// Passing the previous report's `latest_timestamp` as `since` is safe:
    /// events already stored come back as duplicates and are skipped.
    ///
    /// Remote events that touch an entity with unsynced local edits are
    /// flagged in the log and metrics; the newer `updated_at` still wins.
    #[tracing::instrument(skip(self, repository))]
    pub async fn pull_remote(
        &self,
        since: i64,
        repository: &HighlightRepository,
    ) -> Result<PullReport, SyncError> {
        let incoming = self.remote.pull_events(since).await?;
        let mut report = PullReport {
            pulled: incoming.len(),
            ..PullReport::default()
        };

        for event in incoming {
            report.latest_timestamp = Some(
                report
                    .latest_timestamp
                    .map_or(event.timestamp, |latest| latest.max(event.timestamp)),
            );

            if event.device_id != self.config.device_id {
                if let Some(entity_id) = event.entity_id() {
                    if self.events.has_unsynced_for(&entity_id).await? {
                        debug!(
                            %entity_id,
                            event_id = %event.id,
                            from_device = %event.device_id,
                            "Remote change overlaps unsynced local edits"
                        );
                        crate::metrics::record_conflict_flagged(event.event_type.as_str());
                    }
                }
            }

            match self.events.append(&event).await {
                Ok(()) => report.appended += 1,
                Err(SyncError::Append(AppendError::Duplicate(_))) => {
                    report.duplicates += 1;
                    continue;
                }
                Err(SyncError::Validation(e)) => {
                    warn!(event_id = %event.id, error = %e, "Rejected remote event");
                    report.rejected += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }
            self.events
                .mark_synced(std::slice::from_ref(&event.id))
                .await?;
            if repository.apply_remote_event(&event).await? {
                report.applied += 1;
            }
        }

        info!(
            pulled = report.pulled,
            appended = report.appended,
            duplicates = report.duplicates,
            rejected = report.rejected,
            applied = report.applied,
            "Pull complete"
        );
        Ok(report)
    }

    pub async fn status(&self) -> Result<SyncStatus, SyncError> {
        Ok(SyncStatus {
            state: self.state(),
            online: self.network.is_online(),
            queue_size: self.queue.size(),
            queue_pressure: self.queue.pressure(),
            offline_size: self.offline.offline_queue_size(),
            unsynced_events: self.events.unsynced_count().await?,
            circuit: self.circuits.sync.state(),
        })
    }

    /// Background loop: syncs on every tick, resyncs when the offline
    /// queue announces pending entries, and pushes early when the sync
    /// queue is nearly full. Returns after `shutdown` flips to `true` (or
    /// its sender is dropped) and a final flush.
    #[tracing::instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut signals = self.signals.subscribe();
        let mut tick = tokio::time::interval(self.config.sync_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.state.send_replace(if self.network.is_online() {
            EngineState::Running
        } else {
            EngineState::Offline
        });
        info!(interval = ?self.config.sync_interval, "Sync engine running");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                signal = signals.recv() => match signal {
                    Ok(Signal::OfflineResyncReady { pending }) => {
                        info!(pending, "Network back, resyncing offline entries");
                        self.log_pass("resync", self.resync_offline().await);
                    }
                    Ok(Signal::QueueNearFull { size, max }) => {
                        debug!(size, max, "Queue nearly full, syncing early");
                        self.log_pass("pressure", self.sync_once().await);
                    }
                    Ok(Signal::NetworkOffline) => {
                        self.state.send_replace(EngineState::Offline);
                    }
                    Ok(Signal::NetworkOnline) => {
                        self.state.send_replace(EngineState::Running);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Engine fell behind on signals");
                    }
                    Err(RecvError::Closed) => break,
                },

                _ = tick.tick() => {
                    if !self.network.is_online() {
                        continue;
                    }
                    if self.offline.has_pending() {
                        self.log_pass("tick", self.resync_offline().await);
                    } else if !self.queue.is_empty() {
                        self.log_pass("tick", self.sync_once().await);
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Flush what can be flushed and mark the engine stopped.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        info!("Initiating sync engine shutdown...");
        self.state.send_replace(EngineState::ShuttingDown);

        if self.network.is_online() && !self.queue.is_empty() {
            info!(queued = self.queue.size(), "Flushing sync queue on shutdown");
            self.log_pass("shutdown", self.sync_once().await);
        }
        let leftover = self.batcher.lock().flush_for_shutdown();
        if let Some(batch) = leftover {
            // Still in the sync queue; the next start picks them up.
            warn!(pending = batch.len(), "Unsent batch left at shutdown");
        }

        self.offline.destroy();
        self.state.send_replace(EngineState::Stopped);
        info!(
            queued = self.queue.size(),
            offline = self.offline.offline_queue_size(),
            "Sync engine stopped"
        );
    }

    fn cut_batches(&self, events: impl Iterator<Item = Event>) -> Vec<FlushBatch<Event>> {
        let mut batcher = self.batcher.lock();
        let mut batches: Vec<FlushBatch<Event>> = events.filter_map(|e| batcher.add(e)).collect();
        batches.extend(batcher.flush());
        batches
    }

    async fn push_batches(
        &self,
        batches: Vec<FlushBatch<Event>>,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let mut batches = batches.into_iter();

        while let Some(batch) = batches.next() {
            report.batches += 1;
            report.attempted += batch.len();

            match self.remote.push_events(&batch.items).await {
                Ok(result) => {
                    self.queue.remove(&result.synced_ids).await?;
                    self.events.mark_synced(&result.synced_ids).await?;
                    report.synced += result.synced_ids.len();
                    report.failed += result.failed_ids.len();
                    if !result.failed_ids.is_empty() {
                        warn!(failed = ?result.failed_ids, "Remote rejected events, keeping them queued");
                    }
                    self.signals.publish(Signal::BatchSent {
                        size: batch.len(),
                        synced: result.synced_ids.len(),
                        failed: result.failed_ids.len(),
                    });
                }
                Err(e) if e.defers_to_offline() => {
                    warn!(error = %e, size = batch.len(), "Push failed, deferring to offline queue");
                    report.deferred += self.defer(batch.items).await?;
                    for rest in batches.by_ref() {
                        report.deferred += self.defer(rest.items).await?;
                    }
                    report.error = Some(e);
                }
                Err(e) => {
                    warn!(error = %e, kind = e.kind(), size = batch.len(), "Push failed, keeping batch queued");
                    report.failed += batch.len();
                    report.error = Some(e);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Park `events` offline and drop them from the sync queue. Entries the
    /// offline queue has no room for stay in the sync queue.
    async fn defer(&self, events: Vec<Event>) -> Result<usize, SyncError> {
        let mut parked = Vec::with_capacity(events.len());
        for event in events {
            match self.offline.queue_offline(&event).await {
                Ok(_) => parked.push(event.id),
                Err(SyncError::QueueFull { max }) => {
                    error!(max, event_id = %event.id, "Offline queue full, event stays in sync queue");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        self.queue.remove(&parked).await?;
        Ok(parked.len())
    }

    fn log_pass(&self, trigger: &str, outcome: Result<SyncReport, SyncError>) {
        match outcome {
            Ok(report) => {
                if let Some(e) = report.error {
                    warn!(trigger, error = %e, "Sync pass ended early");
                }
            }
            Err(e) => error!(trigger, error = %e, "Sync pass failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batching::BatchConfig;
    use crate::highlight::{Highlight, HighlightColor};
    use crate::remote::InMemoryRemote;
    use crate::resilience::circuit_breaker::{CircuitConfig, CircuitState};
    use crate::resilience::retry::RetryConfig;
    use crate::storage::memory::InMemoryHighlightStore;
    use crate::event::now_millis;
    use serde_json::json;
    use std::time::Duration;

    fn test_config() -> SyncConfig {
        SyncConfig {
            retry: RetryConfig::fast().with_max_retries(Some(1)),
            batch: BatchConfig {
                max_items: 2,
                max_bytes: usize::MAX,
                max_age: Duration::from_secs(60),
            },
            circuit: CircuitConfig {
                failure_threshold: 2,
                ..CircuitConfig::default()
            },
            ..SyncConfig::for_device("device-a")
        }
    }

    async fn engine_with(config: SyncConfig, online: bool) -> (SyncEngine, Arc<InMemoryRemote>) {
        let auth = AuthSession::signed_in("user-1");
        let remote = Arc::new(InMemoryRemote::new(auth.clone()));
        let deps = SyncEngineDeps::open(config, Arc::clone(&remote), auth, online)
            .await
            .unwrap();
        (SyncEngine::new(deps), remote)
    }

    async fn engine() -> (SyncEngine, Arc<InMemoryRemote>) {
        engine_with(test_config(), true).await
    }

    fn created(id: &str) -> Event {
        Event::new(EventType::HighlightCreated, json!({"id": id}), "device-a")
    }

    #[tokio::test]
    async fn test_record_routes_by_connectivity() {
        let (engine, _remote) = engine().await;

        assert_eq!(engine.record(created("a")).await.unwrap(), Routed::Queued);
        engine.network().set_online(false);
        assert_eq!(engine.record(created("b")).await.unwrap(), Routed::Offline);

        assert_eq!(engine.queue().size(), 1);
        assert_eq!(engine.offline().offline_queue_size(), 1);
        assert_eq!(engine.events().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_record_rejects_duplicates_and_invalid_events() {
        let (engine, _remote) = engine().await;
        let event = created("a");
        engine.record(event.clone()).await.unwrap();

        let err = engine.record(event).await.unwrap_err();
        assert!(matches!(err, SyncError::Append(AppendError::Duplicate(_))));

        let mut tampered = created("b");
        tampered.checksum = "0".repeat(64);
        assert!(matches!(
            engine.record(tampered).await.unwrap_err(),
            SyncError::Validation(_)
        ));
        assert_eq!(engine.queue().size(), 1);
    }

    #[tokio::test]
    async fn test_sync_once_pushes_in_batches_and_marks_synced() {
        let (engine, remote) = engine().await;
        for id in ["a", "b", "c"] {
            engine.record(created(id)).await.unwrap();
        }

        let report = engine.sync_once().await.unwrap();

        assert!(report.is_clean());
        assert_eq!(report.synced, 3);
        assert_eq!(report.batches, 2);
        assert!(engine.queue().is_empty());
        assert_eq!(engine.events().unsynced_count().await.unwrap(), 0);
        assert_eq!(remote.pushed_events().len(), 3);
    }

    #[tokio::test]
    async fn test_push_order_follows_priority() {
        let (engine, remote) = engine().await;
        engine.record(created("a")).await.unwrap();
        engine
            .record(Event::new(EventType::HighlightDeleted, json!({"id": "b"}), "device-a"))
            .await
            .unwrap();

        engine.sync_once().await.unwrap();

        let order: Vec<EventType> = remote.pushed_events().iter().map(|e| e.event_type).collect();
        assert_eq!(order, vec![EventType::HighlightDeleted, EventType::HighlightCreated]);
    }

    #[tokio::test]
    async fn test_rejected_events_stay_queued() {
        let (engine, remote) = engine().await;
        let keep = created("a");
        let reject = created("b");
        remote.reject_events([reject.id.clone()]);
        engine.record(keep.clone()).await.unwrap();
        engine.record(reject.clone()).await.unwrap();

        let report = engine.sync_once().await.unwrap();

        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, 1);
        assert!(engine.queue().contains(&reject.id).await.unwrap());
        assert!(!engine.queue().contains(&keep.id).await.unwrap());

        remote.accept_all_events();
        let report = engine.sync_once().await.unwrap();
        assert_eq!(report.synced, 1);
        assert!(engine.queue().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_defers_batch_offline() {
        let (engine, remote) = engine().await;
        engine.record(created("a")).await.unwrap();
        remote.set_offline(true);

        let report = engine.sync_once().await.unwrap();

        assert_eq!(report.deferred, 1);
        assert!(matches!(report.error, Some(SyncError::Network(_))));
        assert!(engine.queue().is_empty());
        assert_eq!(engine.offline().offline_queue_size(), 1);
        assert_eq!(engine.events().unsynced_count().await.unwrap(), 1);

        remote.set_offline(false);
        let report = engine.resync_offline().await.unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(engine.offline().offline_queue_size(), 0);
    }

    #[tokio::test]
    async fn test_open_circuit_defers_without_calling_remote() {
        let (engine, remote) = engine().await;
        for _ in 0..2 {
            let _ = engine
                .circuits()
                .sync
                .call(|| async { Err::<(), _>("down") })
                .await;
        }
        assert_eq!(engine.circuits().sync.state(), CircuitState::Open);

        engine.record(created("a")).await.unwrap();
        let report = engine.sync_once().await.unwrap();

        assert_eq!(report.deferred, 1);
        assert!(matches!(report.error, Some(SyncError::CircuitOpen { .. })));
        assert_eq!(remote.calls(), 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_keeps_batch_queued() {
        let (engine, remote) = engine().await;
        engine.record(created("a")).await.unwrap();
        remote.fail_next(1, SyncError::Remote("bad request".into()));

        let report = engine.sync_once().await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.deferred, 0);
        assert_eq!(engine.queue().size(), 1);
        assert_eq!(engine.offline().offline_queue_size(), 0);
    }

    #[tokio::test]
    async fn test_sync_skipped_while_offline() {
        let (engine, remote) = engine().await;
        engine.record(created("a")).await.unwrap();
        engine.network().set_online(false);

        let report = engine.sync_once().await.unwrap();

        assert_eq!(report.attempted, 0);
        assert_eq!(remote.calls(), 0);
        assert_eq!(engine.queue().size(), 1);
    }

    #[tokio::test]
    async fn test_emit_stamps_device_and_user() {
        let (engine, _remote) = engine().await;
        let event = engine
            .emit(EventType::CollectionCreated, json!({"id": "c-1", "name": "Reading"}))
            .await
            .unwrap();

        assert_eq!(event.device_id, "device-a");
        assert_eq!(event.user_id.as_deref(), Some("user-1"));
        assert!(engine.events().contains(&event.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_pull_remote_applies_and_dedupes() {
        let (engine, remote) = engine().await;
        let repo = engine.repository(Arc::new(InMemoryHighlightStore::new()));
        let highlight = Highlight::new(
            "https://example.com/",
            "remote text",
            vec!["r".into()],
            HighlightColor::Green,
        );
        let event = Event::new(
            EventType::HighlightCreated,
            serde_json::to_value(&highlight).unwrap(),
            "device-b",
        );
        remote.insert_event(event.clone());

        let first = engine.pull_remote(0, &repo).await.unwrap();
        assert_eq!(first.appended, 1);
        assert_eq!(first.applied, 1);
        assert_eq!(first.latest_timestamp, Some(event.timestamp));
        assert!(repo.find_by_id(&highlight.id).await.unwrap().is_some());
        assert_eq!(engine.events().unsynced_count().await.unwrap(), 0);

        let second = engine.pull_remote(0, &repo).await.unwrap();
        assert_eq!(second.duplicates, 1);
        assert_eq!(second.appended, 0);
        assert_eq!(remote.pushed_events().len(), 1);
    }

    #[tokio::test]
    async fn test_pull_cursor_catches_same_millisecond_arrivals() {
        let (engine, remote) = engine().await;
        let repo = engine.repository(Arc::new(InMemoryHighlightStore::new()));
        let at = now_millis() - 1_000;
        let event_for = |text: &str| {
            let highlight = Highlight::new(
                "https://example.com/",
                text,
                vec!["r".into()],
                HighlightColor::Green,
            );
            Event::new(
                EventType::HighlightCreated,
                serde_json::to_value(&highlight).unwrap(),
                "device-b",
            )
            .with_timestamp(at)
        };

        remote.insert_event(event_for("first"));
        let first = engine.pull_remote(0, &repo).await.unwrap();
        let cursor = first.latest_timestamp.unwrap();
        assert_eq!(cursor, at);

        // Lands on the remote later, stamped in the cursor's millisecond.
        remote.insert_event(event_for("late"));
        let second = engine.pull_remote(cursor, &repo).await.unwrap();
        assert_eq!(second.appended, 1);
        assert_eq!(second.duplicates, 1);
        assert_eq!(repo.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_pull_rejects_tampered_events() {
        let (engine, remote) = engine().await;
        let repo = engine.repository(Arc::new(InMemoryHighlightStore::new()));
        let mut event = created("x");
        event.payload = json!({"id": "x", "text": "changed"});
        remote.insert_event(event);

        let report = engine.pull_remote(0, &repo).await.unwrap();

        assert_eq!(report.rejected, 1);
        assert_eq!(engine.events().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let (engine, _remote) = engine().await;
        engine.record(created("a")).await.unwrap();

        let status = engine.status().await.unwrap();

        assert_eq!(status.state, EngineState::Created);
        assert!(status.online);
        assert_eq!(status.queue_size, 1);
        assert_eq!(status.unsynced_events, 1);
        assert_eq!(status.circuit, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_run_resyncs_on_reconnect_and_stops() {
        let config = SyncConfig {
            sync_interval: Duration::from_secs(3600),
            ..test_config()
        };
        let (engine, remote) = engine_with(config, false).await;
        let engine = Arc::new(engine);
        engine.record(created("a")).await.unwrap();
        assert_eq!(engine.state(), EngineState::Offline);

        let (stop, stopped) = watch::channel(false);
        let runner = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.run(stopped).await }
        });
        let mut completed = engine.signals().subscribe();
        tokio::task::yield_now().await;

        engine.network().set_online(true);
        let synced = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(Signal::SyncCompleted { synced, .. }) = completed.recv().await {
                    if synced > 0 {
                        return synced;
                    }
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(synced, 1);
        assert_eq!(remote.pushed_events().len(), 1);
        assert_eq!(engine.offline().offline_queue_size(), 0);

        stop.send(true).unwrap();
        runner.await.unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(!engine.offline().is_attached());
    }
}
