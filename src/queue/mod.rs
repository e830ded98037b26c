// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Outbound queues: the priority sync queue and the offline holding area.

pub mod offline_queue;
pub mod sync_queue;

pub use offline_queue::{OfflineQueue, OfflineStats};
pub use sync_queue::{QueueEntry, SyncQueue};
