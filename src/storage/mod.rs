// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Versioned key/value storage beneath the tablet.
//!
//! Every mutation is stored as a separate version keyed by
//! `(user key, hybrid time)`. Versions of one key are laid out newest first,
//! so a reader bounded by a snapshot takes the first version it may see.
//! Tombstones are ordinary versions with no value.
//!
//! The tablet consumes storage only through the [`StorageEngine`] trait;
//! [`RocksStorage`] is the RocksDB implementation.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use tabletkv::storage::{IteratorOptions, Key, KvWriteBatch, RocksStorage, StorageEngine, StorageOptions, Value};
//! use tabletkv::time::HybridTime;
//!
//! let store = Arc::new(RocksStorage::open(Path::new("/tmp/tablet"), &StorageOptions::default()).unwrap());
//!
//! let mut batch = KvWriteBatch::default();
//! batch.put(Key::from("key"), Value::from("value"), HybridTime::from_micros(100));
//! store.write(batch).unwrap();
//!
//! for entry in store.new_iterator(IteratorOptions::new(HybridTime::MAX)).unwrap() {
//!     let entry = entry.unwrap();
//!     println!("{} @ {}: {:?}", entry.key, entry.hybrid_time, entry.value);
//! }
//! ```

mod engine;
mod error;
mod key;
mod rocks;
mod types;

pub use engine::{
    CompactionStats, DurabilityMode, Frontier, IteratorOptions, StorageEngine, StorageIterator,
    StorageOptions,
};
pub use error::StorageError;
pub use key::{decode_value, decode_versioned_key, encode_key_prefix, encode_value, encode_versioned_key};
pub use rocks::RocksStorage;
pub use types::{
    Key, KeyRange, KvWriteBatch, OpId, Value, VersionedEntry, MAX_KEY_SIZE, MAX_VALUE_SIZE,
};
