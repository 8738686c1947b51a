// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! tabletkv: the storage and concurrency core of one shard of a distributed table
//!
//! This crate provides hybrid-time MVCC over an embedded RocksDB instance,
//! ranged key locking for writers, flush and compaction coordination bounded
//! by active readers, and a lifecycle that shuts down only once every
//! running operation has finished.

pub mod lock;
pub mod mvcc;
pub mod storage;
pub mod tablet;
pub mod time;

pub use lock::{LockBatch, LockError, LockMode, LockRequest, SharedLockManager};
pub use mvcc::{ActiveReaderRegistry, MvccError, MvccManager, MvccSnapshot};
pub use storage::{Key, KeyRange, OpId, RocksStorage, StorageEngine, StorageError, Value};
pub use tablet::{
    FlushMode, ReadOptions, Row, RowIterator, RowOp, Schema, Tablet, TabletError, TabletMetadata,
    TabletOptions, TabletState, WriteRequest,
};
pub use time::{Clock, HybridClock, HybridTime};
