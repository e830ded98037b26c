// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local storage: the SQLite database and highlight stores.

pub mod memory;
pub mod sql;
pub mod traits;

pub use memory::InMemoryHighlightStore;
pub use sql::{LocalDb, SqlHighlightStore};
pub use traits::{HighlightStore, StorageError};
