// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Gatekeeping checks applied before an event reaches the store.
//!
//! Validators are pure: they inspect and never mutate. Each invariant has
//! its own [`ValidationError`] variant so callers can tell exactly which
//! rule failed.
//!
//! The event type is not checked here: [`EventType`](crate::EventType) is a
//! closed enum, so an event with a missing or unknown type cannot be
//! deserialized in the first place.

use serde_json::Value;
use thiserror::Error;

use crate::event::{now_millis, Event};
use crate::highlight::Highlight;

/// Default tolerance for clocks running slightly ahead of ours.
pub const DEFAULT_CLOCK_SKEW_MS: i64 = 5_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("event id is required")]
    MissingId,
    #[error("event device id is required")]
    MissingDeviceId,
    #[error("event payload is required")]
    MissingPayload,
    #[error("event timestamp {timestamp} is in the future (now {now})")]
    FutureTimestamp { timestamp: i64, now: i64 },
    #[error("event timestamp {0} must not be negative")]
    NegativeTimestamp(i64),
    #[error("vector clock must be an object")]
    InvalidVectorClock,
    #[error("checksum mismatch for event '{id}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        id: String,
        expected: String,
        actual: String,
    },
    #[error("highlight field '{0}' is required")]
    MissingField(&'static str),
    #[error("highlight must carry at least one range")]
    NoRanges,
    #[error("url is missing or uses a disallowed scheme")]
    InvalidUrl,
}

/// Validate an event against the current clock with the default skew.
pub fn validate_event(event: &Event) -> Result<(), ValidationError> {
    validate_event_at(event, now_millis(), DEFAULT_CLOCK_SKEW_MS)
}

/// Validate an event against an explicit clock reading.
pub fn validate_event_at(event: &Event, now: i64, skew_ms: i64) -> Result<(), ValidationError> {
    if event.id.trim().is_empty() {
        return Err(ValidationError::MissingId);
    }
    if event.device_id.trim().is_empty() {
        return Err(ValidationError::MissingDeviceId);
    }
    if event.payload.is_null() {
        return Err(ValidationError::MissingPayload);
    }
    if event.timestamp < 0 {
        return Err(ValidationError::NegativeTimestamp(event.timestamp));
    }
    if event.timestamp > now.saturating_add(skew_ms) {
        return Err(ValidationError::FutureTimestamp {
            timestamp: event.timestamp,
            now,
        });
    }
    if let Some(clock) = &event.vector_clock {
        if !is_plain_clock(clock) {
            return Err(ValidationError::InvalidVectorClock);
        }
    }

    let actual = Event::compute_checksum(&event.payload);
    if actual != event.checksum {
        return Err(ValidationError::ChecksumMismatch {
            id: event.id.clone(),
            expected: event.checksum.clone(),
            actual,
        });
    }
    Ok(())
}

// Object with non-negative integer counters.
fn is_plain_clock(clock: &Value) -> bool {
    match clock {
        Value::Object(map) => map.values().all(|v| v.as_u64().is_some()),
        _ => false,
    }
}

pub fn validate_highlight(highlight: &Highlight) -> Result<(), ValidationError> {
    if highlight.id.trim().is_empty() {
        return Err(ValidationError::MissingField("id"));
    }
    if highlight.url.trim().is_empty() {
        return Err(ValidationError::MissingField("url"));
    }
    if highlight.text.trim().is_empty() {
        return Err(ValidationError::MissingField("text"));
    }
    if highlight.ranges.is_empty() {
        return Err(ValidationError::NoRanges);
    }
    Ok(())
}
