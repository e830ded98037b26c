//! Property-based tests (fuzzing) for sync core invariants.
//!
//! Uses proptest to generate random inputs and verify that ordering,
//! admission and integrity guarantees hold, and that malformed input only
//! ever produces clean errors.
//!
//! Run with: `cargo test --test proptest_fuzz`

use proptest::prelude::*;
use serde_json::{json, Value};
use std::time::Duration;

use highlight_sync::resilience::BucketConfig;
use highlight_sync::sanitize::{sanitize_text, sanitize_url};
use highlight_sync::validation::validate_event;
use highlight_sync::{
    BatchConfig, Event, EventType, LocalDb, QueuePressure, RateLimitConfig, RateLimiter,
    SignalBus, SyncBatcher, SyncQueue,
};

// =============================================================================
// Strategies for generating test data
// =============================================================================

fn event_type_strategy() -> impl Strategy<Value = EventType> {
    prop::sample::select(EventType::ALL.to_vec())
}

/// Generate arbitrary JSON values (including odd structures)
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];

    leaf.prop_recursive(
        4,  // depth
        64, // max nodes
        10, // items per collection
        |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..10).prop_map(Value::Array),
                prop::collection::hash_map("[a-z]{1,8}", inner, 0..10)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        },
    )
}

/// Event type plus timestamp offset, the inputs that decide queue order.
fn queued_event_strategy() -> impl Strategy<Value = (EventType, i64)> {
    (event_type_strategy(), 0i64..10_000)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

// =============================================================================
// Integrity
// =============================================================================

proptest! {
    #[test]
    fn fresh_events_always_verify(event_type in event_type_strategy(), payload in arbitrary_json_strategy()) {
        let event = Event::new(event_type, json!({"id": "e", "body": payload}), "device");
        prop_assert!(event.verify_checksum());
        prop_assert!(validate_event(&event).is_ok());
    }

    #[test]
    fn any_payload_change_breaks_checksum(payload in arbitrary_json_strategy(), extra in ".*") {
        let mut event = Event::new(EventType::HighlightUpdated, json!({"id": "e", "body": payload}), "device");
        event.payload["tamper"] = Value::String(extra);
        prop_assert!(!event.verify_checksum());
        prop_assert!(validate_event(&event).is_err());
    }

    #[test]
    fn arbitrary_json_never_panics_validation(value in arbitrary_json_strategy()) {
        // Either it fails to deserialize or validation gives a clean answer.
        if let Ok(event) = serde_json::from_value::<Event>(value) {
            let _ = validate_event(&event);
        }
    }
}

// =============================================================================
// Ordering and batching
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn queue_drains_by_priority_then_age(specs in prop::collection::vec(queued_event_strategy(), 1..30)) {
        let rt = runtime();
        let drained = rt.block_on(async {
            let db = LocalDb::in_memory().await.unwrap();
            let queue = SyncQueue::open(&db, 100, SignalBus::default()).await.unwrap();
            for (n, (event_type, ts)) in specs.iter().enumerate() {
                let event = Event::new(*event_type, json!({"id": format!("e-{n}")}), "device")
                    .with_timestamp(1_000 + ts);
                queue.enqueue(&event).await.unwrap();
            }
            let mut out = Vec::new();
            while let Some(entry) = queue.dequeue().await.unwrap() {
                out.push(entry.event);
            }
            out
        });

        prop_assert_eq!(drained.len(), specs.len());
        for pair in drained.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            prop_assert!(
                a.priority() > b.priority()
                    || (a.priority() == b.priority() && a.timestamp <= b.timestamp),
                "{:?}@{} before {:?}@{}", a.event_type, a.timestamp, b.event_type, b.timestamp
            );
        }
    }

    #[test]
    fn batches_never_exceed_item_limit(count in 0usize..200, max_items in 1usize..20) {
        let mut batcher = SyncBatcher::new(
            BatchConfig {
                max_items,
                max_bytes: usize::MAX,
                max_age: Duration::from_secs(3600),
            },
            SignalBus::default(),
        );

        let mut released = 0;
        for n in 0..count {
            let event = Event::new(EventType::HighlightCreated, json!({"id": n}), "device");
            if let Some(batch) = batcher.add(event) {
                prop_assert!(batch.len() <= max_items);
                released += batch.len();
            }
        }
        if let Some(batch) = batcher.flush() {
            prop_assert!(batch.len() <= max_items);
            released += batch.len();
        }
        prop_assert_eq!(released, count);
    }
}

// =============================================================================
// Admission control
// =============================================================================

proptest! {
    #[test]
    fn burst_admits_at_most_capacity(capacity in 1u32..50, attempts in 0usize..120) {
        let limiter = RateLimiter::new(RateLimitConfig::default().with_operation(
            "sync",
            BucketConfig {
                capacity,
                refill_tokens: capacity,
                refill_interval: Duration::from_secs(3600),
            },
        ));

        let allowed = (0..attempts).filter(|_| limiter.check_limit("user", "sync")).count();

        prop_assert_eq!(allowed, attempts.min(capacity as usize));
        // Other users have their own bucket.
        prop_assert!(limiter.check_limit("someone-else", "sync"));
    }

    #[test]
    fn pressure_is_monotonic_in_fill(capacity in 1usize..10_000, a in 0usize..10_000, b in 0usize..10_000) {
        let (low, high) = (a.min(b), a.max(b));
        prop_assert!(
            QueuePressure::from_fill(low, capacity) <= QueuePressure::from_fill(high, capacity)
        );
        prop_assert_eq!(
            QueuePressure::from_fill(capacity, capacity),
            QueuePressure::Full
        );
    }
}

// =============================================================================
// Sanitizing
// =============================================================================

proptest! {
    #[test]
    fn sanitized_text_has_no_control_chars(input in ".*") {
        let clean = sanitize_text(&input);
        prop_assert!(clean.chars().all(|c| !c.is_control() || c == '\n' || c == '\t'));
    }

    #[test]
    fn sanitized_urls_use_allowed_schemes(input in "(https?|javascript|data|ftp|mailto):[ -~]{0,40}") {
        if let Some(url) = sanitize_url(&input) {
            let parsed = url::Url::parse(&url).unwrap();
            prop_assert!(["http", "https", "mailto"].contains(&parsed.scheme()));
        }
    }
}
