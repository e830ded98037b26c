// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the sync core.
//!
//! Uses the `metrics` crate for backend-agnostic collection. The host
//! (extension background process, daemon, test harness) installs whichever
//! recorder/exporter it wants; without one these calls are no-ops.
//!
//! # Metric Naming Convention
//! - `highlight_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `queue`: sync, offline
//! - `operation`: remote operation or rate-limit operation class
//! - `circuit`: breaker name
//! - `outcome` / `status`: success, failure, rejected, ...

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// EVENT STORE
// ═══════════════════════════════════════════════════════════════════════════

pub fn record_event_appended(event_type: &str) {
    counter!(
        "highlight_sync_events_appended_total",
        "type" => event_type.to_string()
    )
    .increment(1);
}

/// Record an append refused by validation or integrity checks
pub fn record_append_rejected(reason: &str) {
    counter!(
        "highlight_sync_append_rejected_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record a stored event whose checksum no longer matches its payload
pub fn record_corruption(id: &str) {
    counter!(
        "highlight_sync_corruption_detected_total",
        "id" => id.to_string()
    )
    .increment(1);
}

/// Record a remote event that raced with an unsynced local edit
pub fn record_conflict_flagged(entity_type: &str) {
    counter!(
        "highlight_sync_conflicts_flagged_total",
        "type" => entity_type.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// QUEUES
// ═══════════════════════════════════════════════════════════════════════════

pub fn set_queue_size(queue: &str, size: usize) {
    gauge!(
        "highlight_sync_queue_entries",
        "queue" => queue.to_string()
    )
    .set(size as f64);
}

pub fn record_queue_full(queue: &str) {
    counter!(
        "highlight_sync_queue_full_total",
        "queue" => queue.to_string()
    )
    .increment(1);
}

/// Queue row dropped because it no longer decodes.
pub fn record_corrupt_queue_entry(queue: &str) {
    counter!(
        "highlight_sync_queue_corrupt_entries_total",
        "queue" => queue.to_string()
    )
    .increment(1);
}

/// Record entries moved from the offline queue back into the sync queue
pub fn record_offline_drain(count: usize, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "highlight_sync_offline_drained_total",
        "status" => status
    )
    .increment(count as u64);
}

// ═══════════════════════════════════════════════════════════════════════════
// RESILIENCE
// ═══════════════════════════════════════════════════════════════════════════

/// Set circuit breaker state (0 = closed, 1 = half-open, 2 = open)
pub fn set_circuit_state(circuit: &str, state: u8) {
    gauge!(
        "highlight_sync_circuit_breaker_state",
        "circuit" => circuit.to_string()
    )
    .set(f64::from(state));
}

pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "highlight_sync_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_rate_limit(operation: &str, allowed: bool) {
    let decision = if allowed { "allowed" } else { "blocked" };
    counter!(
        "highlight_sync_rate_limit_checks_total",
        "operation" => operation.to_string(),
        "decision" => decision
    )
    .increment(1);
}

pub fn record_retry(operation: &str) {
    counter!(
        "highlight_sync_retries_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

pub fn record_timeout(operation: &str) {
    counter!(
        "highlight_sync_timeouts_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

pub fn set_network_online(online: bool) {
    gauge!("highlight_sync_network_online").set(if online { 1.0 } else { 0.0 });
}

// ═══════════════════════════════════════════════════════════════════════════
// SYNC PIPELINE
// ═══════════════════════════════════════════════════════════════════════════

pub fn record_batch_size(count: usize) {
    histogram!("highlight_sync_batch_size").record(count as f64);
}

pub fn record_batch_bytes(bytes: usize) {
    histogram!("highlight_sync_batch_bytes").record(bytes as f64);
}

/// Record events by sync outcome (synced, failed, deferred)
pub fn record_sync_outcome(outcome: &str, count: usize) {
    counter!(
        "highlight_sync_events_total",
        "outcome" => outcome.to_string()
    )
    .increment(count as u64);
}

pub fn record_remote_write_failure(operation: &str) {
    counter!(
        "highlight_sync_remote_write_failures_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record highlights backfilled into local storage during a read
pub fn record_read_repair(count: usize) {
    counter!("highlight_sync_read_repairs_total").increment(count as u64);
}

pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "highlight_sync_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    #[must_use]
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
    }
}
