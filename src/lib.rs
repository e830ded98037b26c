//! # Highlight Sync
//!
//! Offline-first, event-sourced sync core for web-page highlights.
//!
//! ## Architecture
//!
//! Every change a device makes is recorded as an immutable, checksummed
//! [`Event`]. Events flow through durable local queues to the remote store,
//! and the remote is only ever reached through resilience layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     HighlightRepository                     │
//! │  • Sanitize + validate, local write awaited                │
//! │  • Remote mirror in the background, read repair on fetch   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         EventStore                          │
//! │  • Append-only SQLite log, SHA-256 payload checksums       │
//! │  • Duplicate ids rejected, corrupt rows skipped on read    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               (online: SyncQueue / offline: OfflineQueue)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                SyncQueue  ·  OfflineQueue                   │
//! │  • Priority order: delete > update > create, then FIFO     │
//! │  • Bounded, backpressure signals at 80% / 90%              │
//! │  • Offline entries drain back when the network returns     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                    (HybridBatcher chunks)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          RemoteApi                          │
//! │  • RateLimited → CircuitBreaking → Retrying → transport    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use highlight_sync::auth::AuthSession;
//! use highlight_sync::engine::{SyncEngine, SyncEngineDeps};
//! use highlight_sync::remote::InMemoryRemote;
//! use highlight_sync::storage::SqlHighlightStore;
//! use highlight_sync::{Highlight, HighlightColor, SyncConfig, WriteOptions};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), highlight_sync::SyncError> {
//!     let auth = AuthSession::signed_in("user-1");
//!     let transport = Arc::new(InMemoryRemote::new(auth.clone()));
//!     let config = SyncConfig {
//!         database_url: Some("sqlite://highlights.db".into()),
//!         ..SyncConfig::for_device("laptop")
//!     };
//!
//!     let deps = SyncEngineDeps::open(config, transport, auth, true).await?;
//!     let engine = SyncEngine::new(deps);
//!     let highlights = engine.repository(Arc::new(SqlHighlightStore::new(engine.db())));
//!
//!     let saved = highlights
//!         .add(
//!             Highlight::new(
//!                 "https://example.com/",
//!                 "worth keeping",
//!                 vec!["0:13".into()],
//!                 HighlightColor::Yellow,
//!             ),
//!             WriteOptions::default(),
//!         )
//!         .await?;
//!     println!("saved {}", saved.id);
//!
//!     engine.sync_once().await?;
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Event Log**: Append-only, checksummed, validated with clock-skew tolerance
//! - **Priority Queue**: Durable, bounded, deduplicated by event id
//! - **Offline Queue**: Parks work while offline, resyncs on reconnect
//! - **Circuit Breakers**: Separate breakers for messaging and sync
//! - **Rate Limiting**: Token buckets per (user, operation)
//! - **Retry Logic**: Exponential backoff with per-attempt timeouts
//! - **Dual Write**: Local-first repository with background remote mirror
//! - **Sanitizing**: Text, HTML and URL cleanup before anything is stored
//!
//! ## Configuration
//!
//! See [`SyncConfig`] for all configuration options.
//!
//! ## Modules
//!
//! - [`engine`]: The [`SyncEngine`] orchestrating queues and the remote
//! - [`event_store`]: Durable event log
//! - [`queue`]: Sync and offline queues
//! - [`remote`]: Remote API trait, resilience layers, in-memory remote
//! - [`repository`]: Dual-write highlight repository
//! - [`resilience`]: Circuit breakers, rate limiter, retry
//! - [`messaging`]: Request/response channel between extension contexts
//! - [`network`]: Connectivity tracking
//! - [`signals`]: Typed broadcast bus

pub mod auth;
pub mod backpressure;
pub mod batching;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod event_store;
pub mod highlight;
pub mod messaging;
pub mod metrics;
pub mod network;
pub mod queue;
pub mod remote;
pub mod repository;
pub mod resilience;
pub mod sanitize;
pub mod signals;
pub mod storage;
pub mod validation;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use auth::AuthSession;
pub use backpressure::QueuePressure;
pub use batching::{BatchConfig, FlushBatch, FlushReason, HybridBatcher, SyncBatcher};
pub use config::SyncConfig;
pub use engine::{EngineState, PullReport, Routed, SyncEngine, SyncEngineDeps, SyncReport, SyncStatus};
pub use error::{AppendError, StorageError, SyncError, ValidationError};
pub use event::{Event, EventType, Priority};
pub use event_store::{EventFilter, EventStore};
pub use highlight::{Highlight, HighlightColor, HighlightPatch};
pub use messaging::{LocalChannel, Message, MessageChannel, ReliableChannel};
pub use network::{ConnectionType, NetworkDetector, NetworkStatus};
pub use queue::{OfflineQueue, QueueEntry, SyncQueue};
pub use remote::{InMemoryRemote, PushResult, RecordFilter, RemoteApi};
pub use repository::{HighlightRepository, WriteOptions};
pub use resilience::{
    retry, CircuitBreaker, CircuitConfig, CircuitError, CircuitState, RateLimitConfig,
    RateLimiter, RetryConfig, SyncCircuits,
};
pub use signals::{Signal, SignalBus, Subscription};
pub use storage::{HighlightStore, LocalDb};
pub use metrics::LatencyTimer;
