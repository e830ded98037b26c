// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Request/response messaging between extension contexts.
//!
//! [`MessageChannel`] is the abstract channel: targeted requests with a
//! reply, plus fire-and-forget publish/subscribe by message kind.
//! [`LocalChannel`] implements it in-process. [`ReliableChannel`] adds the
//! same protection the remote gets: a per-request timeout and retry on
//! closed channels, inside a circuit breaker.
//!
//! A request to a target nobody answers for fails with
//! [`SyncError::ChannelClosed`], which the retry layer treats as transient
//! (the other side may simply not have loaded yet).

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::SyncError;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::retry::{retry, RetryConfig};
use crate::signals::Subscription;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Message {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

pub type ResponseFuture = Pin<Box<dyn Future<Output = Result<Message, SyncError>> + Send>>;
type Responder = Arc<dyn Fn(Message) -> ResponseFuture + Send + Sync>;
type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Send a request to `target` and wait for its reply.
    async fn send(&self, target: &str, message: Message) -> Result<Message, SyncError>;

    /// Deliver to every handler subscribed to `kind`. Returns how many ran.
    fn publish(&self, kind: &str, payload: Value) -> usize;

    fn subscribe(&self, kind: &str, handler: Box<dyn Fn(&Value) + Send + Sync>) -> Subscription;
}

struct LocalInner {
    responders: DashMap<String, Responder>,
    handlers: DashMap<u64, (String, Handler)>,
    next_id: AtomicU64,
}

/// In-process channel. Clones share responders and subscriptions.
#[derive(Clone)]
pub struct LocalChannel {
    inner: Arc<LocalInner>,
}

impl LocalChannel {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LocalInner {
                responders: DashMap::new(),
                handlers: DashMap::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Answer requests sent to `target`. Replaces any earlier responder.
    pub fn register<F, Fut>(&self, target: impl Into<String>, responder: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Message, SyncError>> + Send + 'static,
    {
        let responder: Responder = Arc::new(move |message| Box::pin(responder(message)));
        self.inner.responders.insert(target.into(), responder);
    }

    /// Stop answering for `target`, as when a tab closes.
    pub fn unregister(&self, target: &str) {
        self.inner.responders.remove(target);
    }
}

impl Default for LocalChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageChannel for LocalChannel {
    async fn send(&self, target: &str, message: Message) -> Result<Message, SyncError> {
        let responder = self
            .inner
            .responders
            .get(target)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| {
                SyncError::ChannelClosed(format!("receiving end does not exist for '{target}'"))
            })?;
        trace!(target, kind = %message.kind, "Sending message");
        responder(message).await
    }

    fn publish(&self, kind: &str, payload: Value) -> usize {
        let handlers: Vec<Handler> = self
            .inner
            .handlers
            .iter()
            .filter(|entry| entry.value().0 == kind)
            .map(|entry| Arc::clone(&entry.value().1))
            .collect();
        for handler in &handlers {
            handler(&payload);
        }
        trace!(kind, delivered = handlers.len(), "Published message");
        handlers.len()
    }

    fn subscribe(&self, kind: &str, handler: Box<dyn Fn(&Value) + Send + Sync>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .insert(id, (kind.to_string(), Arc::from(handler)));

        let weak: Weak<LocalInner> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.handlers.remove(&id);
            }
        })
    }
}

/// Timeout + retry + circuit breaker around any channel.
pub struct ReliableChannel<C> {
    inner: C,
    breaker: Arc<CircuitBreaker>,
    retry: RetryConfig,
}

impl<C: MessageChannel> ReliableChannel<C> {
    /// `timeout` bounds each request attempt.
    pub fn new(inner: C, breaker: Arc<CircuitBreaker>, retry: RetryConfig, timeout: Duration) -> Self {
        Self {
            inner,
            breaker,
            retry: retry.with_attempt_timeout(Some(timeout)),
        }
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl<C: MessageChannel> MessageChannel for ReliableChannel<C> {
    async fn send(&self, target: &str, message: Message) -> Result<Message, SyncError> {
        let result = self
            .breaker
            .call_classified(
                || {
                    retry("message.send", &self.retry, || {
                        self.inner.send(target, message.clone())
                    })
                },
                SyncError::is_transient,
            )
            .await;
        if let Err(e) = &result {
            debug!(target, kind = %message.kind, error = %e, "Message delivery failed");
        }
        Ok(result?)
    }

    fn publish(&self, kind: &str, payload: Value) -> usize {
        self.inner.publish(kind, payload)
    }

    fn subscribe(&self, kind: &str, handler: Box<dyn Fn(&Value) + Send + Sync>) -> Subscription {
        self.inner.subscribe(kind, handler)
    }
}
