// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Online/offline detection.
//!
//! The platform feeds connectivity readings in through
//! [`NetworkDetector::report`]; everything else observes. Listeners fire
//! only when the online flag flips, never for repeated readings of the
//! same state. The connection type is a hint for scheduling decisions and
//! never gates a call.
//!
//! # Example
//!
//! ```
//! use highlight_sync::network::{ConnectionType, NetworkDetector};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let detector = NetworkDetector::new(true);
//! let flips = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&flips);
//! let subscription = detector.subscribe(move |_online| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! detector.report(true, ConnectionType::Wifi);   // no transition
//! detector.report(false, ConnectionType::Offline);
//! detector.report(true, ConnectionType::Cellular);
//! assert_eq!(flips.load(Ordering::SeqCst), 2);
//!
//! subscription.unsubscribe();
//! subscription.unsubscribe(); // idempotent
//! assert_eq!(detector.listener_count(), 0);
//! ```

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::info;

use crate::signals::{Signal, SignalBus, Subscription};

/// Coarse link classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    Wifi,
    Cellular,
    Ethernet,
    Unknown,
    Offline,
}

impl ConnectionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wifi => "wifi",
            Self::Cellular => "cellular",
            Self::Ethernet => "ethernet",
            Self::Unknown => "unknown",
            Self::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkStatus {
    pub online: bool,
    pub connection_type: ConnectionType,
}

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

struct Inner {
    status: watch::Sender<NetworkStatus>,
    listeners: DashMap<u64, Listener>,
    next_id: AtomicU64,
    signals: Option<SignalBus>,
}

/// Shared connectivity state. Clones observe the same detector.
#[derive(Clone)]
pub struct NetworkDetector {
    inner: Arc<Inner>,
}

impl NetworkDetector {
    #[must_use]
    pub fn new(online: bool) -> Self {
        Self::build(online, None)
    }

    /// Also publish `NetworkOnline`/`NetworkOffline` on the bus.
    #[must_use]
    pub fn with_signals(online: bool, signals: SignalBus) -> Self {
        Self::build(online, Some(signals))
    }

    fn build(online: bool, signals: Option<SignalBus>) -> Self {
        let status = NetworkStatus {
            online,
            connection_type: if online {
                ConnectionType::Unknown
            } else {
                ConnectionType::Offline
            },
        };
        let (status, _) = watch::channel(status);
        crate::metrics::set_network_online(online);
        Self {
            inner: Arc::new(Inner {
                status,
                listeners: DashMap::new(),
                next_id: AtomicU64::new(0),
                signals,
            }),
        }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.inner.status.borrow().online
    }

    #[must_use]
    pub fn connection_type(&self) -> ConnectionType {
        self.inner.status.borrow().connection_type
    }

    #[must_use]
    pub fn status(&self) -> NetworkStatus {
        *self.inner.status.borrow()
    }

    /// Feed a platform reading. Offline readings always carry
    /// [`ConnectionType::Offline`].
    pub fn report(&self, online: bool, connection_type: ConnectionType) {
        let next = NetworkStatus {
            online,
            connection_type: if online {
                connection_type
            } else {
                ConnectionType::Offline
            },
        };
        let previous = self.inner.status.send_replace(next);
        if previous.online == online {
            return;
        }

        info!(
            online,
            connection_type = next.connection_type.as_str(),
            "Network state changed"
        );
        crate::metrics::set_network_online(online);
        if let Some(signals) = &self.inner.signals {
            signals.publish(if online {
                Signal::NetworkOnline
            } else {
                Signal::NetworkOffline
            });
        }

        // Snapshot first so a listener may (un)subscribe without deadlocking the map.
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for listener in listeners {
            listener(online);
        }
    }

    pub fn set_online(&self, online: bool) {
        self.report(online, ConnectionType::Unknown);
    }

    /// Register for transitions. The callback receives the new online flag.
    pub fn subscribe(&self, callback: impl Fn(bool) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.insert(id, Arc::new(callback));

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.remove(&id);
            }
        })
    }

    /// Async view of the status, for `select!` loops.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<NetworkStatus> {
        self.inner.status.subscribe()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }
}

impl Default for NetworkDetector {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for NetworkDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkDetector")
            .field("status", &self.status())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
