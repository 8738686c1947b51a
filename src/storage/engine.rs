// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The boundary between the tablet and the embedded storage engine.

use std::path::Path;
use std::sync::Arc;

use crate::time::HybridTime;

use super::{KeyRange, KvWriteBatch, OpId, StorageError, VersionedEntry};

/// Durability mode for write operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// Writes are appended to the WAL but not fsynced.
    /// Durable against process crashes but not power failures.
    #[default]
    WalOnly,
    /// Writes are fsynced to disk on every operation.
    FsyncEveryWrite,
}

/// Options for opening a storage engine.
#[derive(Debug, Clone)]
pub struct StorageOptions {
    pub create_if_missing: bool,
    pub write_buffer_size: usize,
    pub max_write_buffer_number: i32,
    /// Bloom filter bits per key; zero disables the filter.
    pub bloom_filter_bits: f64,
    pub durability: DurabilityMode,
    /// Number of raw entries an iterator reads per refill.
    pub iterator_batch_size: usize,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            write_buffer_size: 64 * 1024 * 1024,
            max_write_buffer_number: 4,
            bloom_filter_bits: 10.0,
            durability: DurabilityMode::default(),
            iterator_batch_size: 1024,
        }
    }
}

impl StorageOptions {
    pub fn with_durability(mut self, durability: DurabilityMode) -> Self {
        self.durability = durability;
        self
    }

    pub fn with_write_buffer_size(mut self, bytes: usize) -> Self {
        self.write_buffer_size = bytes;
        self
    }

    pub fn with_iterator_batch_size(mut self, entries: usize) -> Self {
        self.iterator_batch_size = entries.max(1);
        self
    }

    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }
}

/// Options for [`StorageEngine::new_iterator`].
#[derive(Debug, Clone)]
pub struct IteratorOptions {
    /// Restricts iteration to keys in this range; `None` scans everything.
    pub range: Option<KeyRange>,
    /// Versions newer than this are skipped.
    pub max_hybrid_time: HybridTime,
}

impl IteratorOptions {
    pub fn new(max_hybrid_time: HybridTime) -> Self {
        Self {
            range: None,
            max_hybrid_time,
        }
    }

    pub fn with_range(mut self, range: Option<KeyRange>) -> Self {
        self.range = range;
        self
    }
}

/// Persisted position of the last applied write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Frontier {
    pub op_id: Option<OpId>,
    pub max_hybrid_time: Option<HybridTime>,
}

/// Statistics from a compaction pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CompactionStats {
    pub versions_scanned: u64,
    pub versions_deleted: u64,
    pub bytes_reclaimed: u64,
}

/// A stream of stored versions.
///
/// Entries of one user key are contiguous and ordered newest first.
pub type StorageIterator = Box<dyn Iterator<Item = Result<VersionedEntry, StorageError>> + Send>;

/// The embedded storage engine consumed by the tablet.
///
/// Implementations must make a successful [`write`](StorageEngine::write)
/// durable and atomic, and must give iterators a view that includes at least
/// everything committed before the iterator was created.
pub trait StorageEngine: Send + Sync + 'static {
    /// Opens or creates the engine rooted at `path`.
    fn open(path: &Path, options: &StorageOptions) -> Result<Self, StorageError>
    where
        Self: Sized;

    /// Atomically applies a batch, persisting its op id with the data.
    fn write(&self, batch: KvWriteBatch) -> Result<(), StorageError>;

    /// Creates an iterator that keeps this engine alive until dropped.
    fn new_iterator(self: Arc<Self>, options: IteratorOptions) -> Result<StorageIterator, StorageError>;

    /// Persists in-memory buffers into the permanent structure, waiting for completion.
    fn flush(&self) -> Result<(), StorageError>;

    /// Discards versions that no reader at or after `history_cutoff` can see.
    fn compact(&self, history_cutoff: HybridTime) -> Result<CompactionStats, StorageError>;

    /// Creates a consistent on-disk copy in `dir`, which must not exist.
    fn checkpoint(&self, dir: &Path) -> Result<(), StorageError>;

    /// Approximate bytes used in memory buffers and on disk.
    fn approximate_size(&self) -> Result<u64, StorageError>;

    /// Bytes used by persisted sorted files only.
    fn total_sst_file_sizes(&self) -> Result<u64, StorageError>;

    /// The last persisted op id and hybrid time.
    fn frontier(&self) -> Result<Frontier, StorageError>;
}
