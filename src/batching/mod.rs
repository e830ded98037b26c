// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Size-, count- and age-bounded batching of outgoing events.

pub mod hybrid_batcher;
pub mod sync_batcher;

pub use hybrid_batcher::{
    BatchConfig, BatchableItem, FlushBatch, FlushReason, HybridBatcher, SizedItem,
};
pub use sync_batcher::SyncBatcher;
