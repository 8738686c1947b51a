// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Multi-version concurrency control for a single tablet.
//!
//! # Key Concepts
//!
//! Each write is versioned with a [`HybridTime`](crate::time::HybridTime)
//! issued by the [`MvccManager`] after the writer holds its key locks.
//! Until the write commits its hybrid time is *in flight*; a snapshot taken
//! meanwhile records it and keeps it invisible even after it commits.
//!
//! - **Visible**: `ht <= snapshot.bound()` and `ht` was not in flight at capture
//! - **Safe time**: every write at or below it has committed or aborted
//! - **History cutoff**: compaction may discard versions only a reader below
//!   it could see; the [`ActiveReaderRegistry`] keeps it at or below the oldest
//!   live reader
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tabletkv::mvcc::MvccManager;
//! use tabletkv::time::HybridClock;
//!
//! let mvcc = MvccManager::new(Arc::new(HybridClock::default()));
//!
//! let ht = mvcc.start_operation();
//! let before = mvcc.capture_snapshot();
//! mvcc.start_applying(ht);
//! mvcc.commit(ht);
//!
//! assert!(!before.is_visible(ht));
//! assert!(mvcc.capture_snapshot().is_visible(ht));
//! ```

mod error;
mod manager;
mod readers;
mod snapshot;

pub use error::MvccError;
pub use manager::MvccManager;
pub use readers::ActiveReaderRegistry;
pub use snapshot::MvccSnapshot;
