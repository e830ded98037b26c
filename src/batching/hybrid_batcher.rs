// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Hybrid batching for upload chunks.
//!
//! The [`HybridBatcher`] collects items and hands them out in batches once
//! any threshold is reached: item count, total bytes, or age of the oldest
//! pending item. Whichever comes first wins; when count and size trip on
//! the same item, count is reported.
//!
//! Age is measured on the tokio clock, so paused-time tests can drive the
//! time threshold deterministically.
//!
//! # Example
//!
//! ```
//! use highlight_sync::batching::{BatchConfig, FlushReason, HybridBatcher, SizedItem};
//! use std::time::Duration;
//!
//! struct Note(String);
//! impl SizedItem for Note {
//!     fn size_bytes(&self) -> usize { self.0.len() }
//! }
//!
//! let mut batcher = HybridBatcher::new(BatchConfig {
//!     max_items: 2,
//!     max_bytes: 1024,
//!     max_age: Duration::from_secs(5),
//! });
//!
//! assert_eq!(batcher.add(Note("a".into())), None);
//! assert_eq!(batcher.add(Note("b".into())), Some(FlushReason::Count));
//! let batch = batcher.take_if_ready().unwrap();
//! assert_eq!(batch.items.len(), 2);
//! ```

use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Why a batch was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushReason {
    /// Item count threshold reached
    Count,
    /// Byte size threshold reached
    Size,
    /// Oldest item waited `max_age`
    Time,
    /// Caller forced a flush
    Manual,
    /// Final flush before stopping
    Shutdown,
}

impl FlushReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Size => "size",
            Self::Time => "time",
            Self::Manual => "manual",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Thresholds for hybrid batching
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_items: usize,
    pub max_bytes: usize,
    #[serde(with = "crate::config::duration_ms")]
    pub max_age: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_items: 50,
            max_bytes: 256 * 1024,
            max_age: Duration::from_secs(2),
        }
    }
}

/// Items released together, with the threshold that released them.
#[derive(Debug)]
pub struct FlushBatch<T> {
    pub items: Vec<T>,
    pub total_bytes: usize,
    pub reason: FlushReason,
}

impl<T> FlushBatch<T> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Batcher that releases on count, size or age thresholds.
pub struct HybridBatcher<T> {
    config: BatchConfig,
    items: Vec<T>,
    total_bytes: usize,
    // Set when the first item of a batch arrives.
    oldest: Option<Instant>,
}

impl<T> HybridBatcher<T> {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            items: Vec::new(),
            total_bytes: 0,
            oldest: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Add an item of known size; returns the threshold it tripped, if any.
    pub fn push(&mut self, item: T, size_bytes: usize) -> Option<FlushReason> {
        if self.items.is_empty() {
            self.oldest = Some(Instant::now());
        }
        self.items.push(item);
        self.total_bytes += size_bytes;
        self.size_threshold()
    }

    fn size_threshold(&self) -> Option<FlushReason> {
        if self.items.len() >= self.config.max_items.max(1) {
            Some(FlushReason::Count)
        } else if self.total_bytes >= self.config.max_bytes {
            Some(FlushReason::Size)
        } else {
            None
        }
    }

    /// Age of the oldest pending item.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.oldest.map_or(Duration::ZERO, |at| at.elapsed())
    }

    #[must_use]
    pub fn should_flush_time(&self) -> bool {
        !self.items.is_empty() && self.age() >= self.config.max_age
    }

    /// The threshold currently met, if any.
    #[must_use]
    pub fn ready_reason(&self) -> Option<FlushReason> {
        self.size_threshold().or_else(|| {
            if self.should_flush_time() {
                Some(FlushReason::Time)
            } else {
                None
            }
        })
    }

    /// Take the pending batch if a threshold is met.
    pub fn take_if_ready(&mut self) -> Option<FlushBatch<T>> {
        let reason = self.ready_reason()?;
        self.take(reason)
    }

    /// Take whatever is pending, regardless of thresholds.
    pub fn flush(&mut self) -> Option<FlushBatch<T>> {
        self.take(FlushReason::Manual)
    }

    pub fn take(&mut self, reason: FlushReason) -> Option<FlushBatch<T>> {
        if self.items.is_empty() {
            return None;
        }
        let total_bytes = std::mem::take(&mut self.total_bytes);
        let items = std::mem::take(&mut self.items);
        self.oldest = None;
        debug!(count = items.len(), bytes = total_bytes, reason = reason.as_str(), "Batch released");
        Some(FlushBatch {
            items,
            total_bytes,
            reason,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// (pending items, pending bytes, age of oldest)
    #[must_use]
    pub fn stats(&self) -> (usize, usize, Duration) {
        (self.items.len(), self.total_bytes, self.age())
    }
}

impl<T: SizedItem> HybridBatcher<T> {
    /// Add an item using its intrinsic size
    pub fn add(&mut self, item: T) -> Option<FlushReason> {
        let size = item.size_bytes();
        self.push(item, size)
    }
}

impl<T: BatchableItem> HybridBatcher<T> {
    /// Whether an item with this id is already pending.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.id() == id)
    }
}

/// Items that know their own encoded size
pub trait SizedItem {
    #[must_use]
    fn size_bytes(&self) -> usize;
}

/// Items with a stable id
pub trait BatchableItem: SizedItem {
    fn id(&self) -> &str;
}
