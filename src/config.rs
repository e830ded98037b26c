// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the sync core.
//!
//! Configuration is programmatic: the host builds a [`SyncConfig`] (or
//! deserializes one from its own settings store) and hands it to the
//! engine. Every field has a default, so a partial document is fine.
//!
//! Durations are expressed in milliseconds on the wire.
//!
//! # Example
//!
//! ```
//! use highlight_sync::SyncConfig;
//! use std::time::Duration;
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.max_queue_size, 1000);
//!
//! // Partial config from JSON
//! let config: SyncConfig = serde_json::from_str(r#"{
//!     "device_id": "laptop",
//!     "max_queue_size": 500,
//!     "retry": { "max_retries": 5 }
//! }"#).unwrap();
//! assert_eq!(config.max_queue_size, 500);
//! assert_eq!(config.retry.max_retries, Some(5));
//! assert_eq!(config.message_timeout, Duration::from_secs(5));
//! ```

use serde::Deserialize;
use std::time::Duration;

use crate::batching::BatchConfig;
use crate::resilience::circuit_breaker::CircuitConfig;
use crate::resilience::rate_limiter::RateLimitConfig;
use crate::resilience::retry::RetryConfig;
use crate::validation::DEFAULT_CLOCK_SKEW_MS;

/// Configuration for the sync core.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyncConfig {
    /// Stable id of this installation, stamped on every event
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// SQLite location, e.g. "sqlite://highlights.db". `None` keeps
    /// everything in memory.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Sync queue capacity
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Offline queue capacity (`None` = unbounded)
    #[serde(default)]
    pub max_offline_items: Option<usize>,

    /// Entries moved per step when draining the offline queue
    #[serde(default = "default_drain_batch_size")]
    pub drain_batch_size: usize,

    /// Tolerated clock drift for incoming event timestamps
    #[serde(default = "default_clock_skew_ms")]
    pub clock_skew_ms: i64,

    /// Budget for one extension message round trip
    #[serde(default = "default_message_timeout", with = "duration_ms")]
    pub message_timeout: Duration,

    /// Period of the background sync tick
    #[serde(default = "default_sync_interval", with = "duration_ms")]
    pub sync_interval: Duration,

    /// Signal bus ring size
    #[serde(default = "default_signal_capacity")]
    pub signal_capacity: usize,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub circuit: CircuitConfig,

    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    #[serde(default)]
    pub batch: BatchConfig,
}

fn default_device_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
fn default_max_queue_size() -> usize { 1000 }
fn default_drain_batch_size() -> usize { 100 }
fn default_clock_skew_ms() -> i64 { DEFAULT_CLOCK_SKEW_MS }
fn default_message_timeout() -> Duration { Duration::from_secs(5) }
fn default_sync_interval() -> Duration { Duration::from_secs(30) }
fn default_signal_capacity() -> usize { crate::signals::DEFAULT_SIGNAL_CAPACITY }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            database_url: None,
            max_queue_size: default_max_queue_size(),
            max_offline_items: None,
            drain_batch_size: default_drain_batch_size(),
            clock_skew_ms: default_clock_skew_ms(),
            message_timeout: default_message_timeout(),
            sync_interval: default_sync_interval(),
            signal_capacity: default_signal_capacity(),
            retry: RetryConfig::default(),
            circuit: CircuitConfig::default(),
            rate_limits: RateLimitConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Defaults with a fixed device id.
    pub fn for_device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Self::default()
        }
    }
}

/// `Duration` as integer milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// `Option<Duration>` as integer milliseconds or null.
pub mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
