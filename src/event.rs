// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The [`Event`]: the unit of durable change that flows through the sync core.
//!
//! Every local mutation becomes one event. Events are checksummed at
//! creation, appended to the [`EventStore`](crate::EventStore), optionally
//! queued for upload, and never mutated in place afterwards; a correction
//! is a new event.
//!
//! # Example
//!
//! ```
//! use highlight_sync::{Event, EventType};
//! use serde_json::json;
//!
//! let event = Event::new(
//!     EventType::HighlightCreated,
//!     json!({"id": "hl-1", "text": "hello"}),
//!     "device-a",
//! );
//!
//! assert_eq!(event.entity_id().as_deref(), Some("hl-1"));
//! assert!(event.verify_checksum());
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::batching::hybrid_batcher::{BatchableItem, SizedItem};

/// Current wall-clock time as epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Kinds of domain mutation carried by an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "highlight.created")]
    HighlightCreated,
    #[serde(rename = "highlight.updated")]
    HighlightUpdated,
    #[serde(rename = "highlight.deleted")]
    HighlightDeleted,
    #[serde(rename = "collection.created")]
    CollectionCreated,
    #[serde(rename = "collection.updated")]
    CollectionUpdated,
    #[serde(rename = "collection.deleted")]
    CollectionDeleted,
}

/// Upload priority derived from the event type. Higher drains first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Create = 1,
    Update = 2,
    Delete = 3,
}

impl Priority {
    #[must_use]
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        Self::HighlightCreated,
        Self::HighlightUpdated,
        Self::HighlightDeleted,
        Self::CollectionCreated,
        Self::CollectionUpdated,
        Self::CollectionDeleted,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HighlightCreated => "highlight.created",
            Self::HighlightUpdated => "highlight.updated",
            Self::HighlightDeleted => "highlight.deleted",
            Self::CollectionCreated => "collection.created",
            Self::CollectionUpdated => "collection.updated",
            Self::CollectionDeleted => "collection.deleted",
        }
    }

    /// Deletes outrank updates, which outrank creates.
    #[must_use]
    pub fn priority(self) -> Priority {
        match self {
            Self::HighlightDeleted | Self::CollectionDeleted => Priority::Delete,
            Self::HighlightUpdated | Self::CollectionUpdated => Priority::Update,
            Self::HighlightCreated | Self::CollectionCreated => Priority::Create,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown event type '{s}'"))
    }
}

/// An immutable record of one domain mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Client-generated unique id (UUID v4)
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Opaque domain record; `payload.id` names the entity
    pub payload: Value,
    /// Creation time (epoch millis)
    pub timestamp: i64,
    pub device_id: String,
    /// Device → counter map. Stored and shipped, not compared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_clock: Option<Value>,
    /// Hex SHA-256 of the canonical payload JSON
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Event {
    /// Create a new event stamped with a fresh id, the current time, a
    /// checksum and an initial vector clock for `device_id`.
    pub fn new(event_type: EventType, payload: Value, device_id: impl Into<String>) -> Self {
        let device_id = device_id.into();
        let checksum = Self::compute_checksum(&payload);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            vector_clock: Some(json!({ device_id.as_str(): 1 })),
            payload,
            timestamp: now_millis(),
            device_id,
            checksum,
            user_id: None,
        }
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// The entity this event is about (`payload.id`), if any.
    #[must_use]
    pub fn entity_id(&self) -> Option<String> {
        match self.payload.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    #[must_use]
    pub fn priority(&self) -> Priority {
        self.event_type.priority()
    }

    /// Content hash of a payload.
    ///
    /// `serde_json` serializes object keys in sorted order, so two equal
    /// values always hash the same regardless of construction order.
    #[must_use]
    pub fn compute_checksum(payload: &Value) -> String {
        let canonical = payload.to_string();
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }

    /// Whether the stored checksum matches the payload.
    #[must_use]
    pub fn verify_checksum(&self) -> bool {
        Self::compute_checksum(&self.payload) == self.checksum
    }
}

impl SizedItem for Event {
    fn size_bytes(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.id.len()
            + self.device_id.len()
            + self.checksum.len()
            + self.payload.to_string().len()
            + self.vector_clock.as_ref().map_or(0, |v| v.to_string().len())
            + self.user_id.as_ref().map_or(0, String::len)
    }
}

impl BatchableItem for Event {
    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_event() {
        let event = Event::new(
            EventType::HighlightCreated,
            json!({"id": "hl-1", "text": "hello"}),
            "device-a",
        );

        assert!(!event.id.is_empty());
        assert_eq!(event.device_id, "device-a");
        assert!(event.timestamp > 0);
        assert!(event.user_id.is_none());
        assert_eq!(event.vector_clock, Some(json!({"device-a": 1})));
        assert!(event.verify_checksum());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Event::new(EventType::HighlightCreated, json!({}), "d");
        let b = Event::new(EventType::HighlightCreated, json!({}), "d");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_checksum_ignores_key_order() {
        let a = json!({"id": "x", "text": "t", "color": "yellow"});
        let b: Value = serde_json::from_str(r#"{"color":"yellow","text":"t","id":"x"}"#).unwrap();
        assert_eq!(Event::compute_checksum(&a), Event::compute_checksum(&b));
    }

    #[test]
    fn test_tampered_payload_fails_checksum() {
        let mut event = Event::new(EventType::HighlightUpdated, json!({"id": "x", "text": "a"}), "d");
        event.payload = json!({"id": "x", "text": "b"});
        assert!(!event.verify_checksum());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(EventType::HighlightDeleted.priority() > EventType::HighlightUpdated.priority());
        assert!(EventType::HighlightUpdated.priority() > EventType::HighlightCreated.priority());
        assert_eq!(EventType::CollectionDeleted.priority(), Priority::Delete);
        assert_eq!(Priority::Delete.as_i64(), 3);
    }

    #[test]
    fn test_event_type_wire_names() {
        for t in EventType::ALL {
            let encoded = serde_json::to_string(&t).unwrap();
            assert_eq!(encoded, format!("\"{}\"", t.as_str()));
            assert_eq!(t.as_str().parse::<EventType>().unwrap(), t);
        }
        assert!("highlight.moved".parse::<EventType>().is_err());
    }

    #[test]
    fn test_entity_id_variants() {
        let numeric = Event::new(EventType::CollectionCreated, json!({"id": 42}), "d");
        assert_eq!(numeric.entity_id().as_deref(), Some("42"));

        let missing = Event::new(EventType::CollectionCreated, json!({"name": "x"}), "d");
        assert!(missing.entity_id().is_none());
    }

    #[test]
    fn test_serialize_skips_none_fields() {
        let mut event = Event::new(EventType::HighlightCreated, json!({"id": "a"}), "d");
        event.vector_clock = None;

        let encoded = serde_json::to_string(&event).unwrap();
        assert!(!encoded.contains("user_id"));
        assert!(!encoded.contains("vector_clock"));
        assert!(encoded.contains("\"type\":\"highlight.created\""));

        let decoded: Event = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_size_bytes_grows_with_payload() {
        let small = Event::new(EventType::HighlightCreated, json!({"id": "a"}), "d");
        let large = Event::new(
            EventType::HighlightCreated,
            json!({"id": "a", "text": "x".repeat(10_000)}),
            "d",
        );
        assert!(large.size_bytes() > small.size_bytes() + 9_000);
    }
}
