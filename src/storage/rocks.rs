// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! RocksDB-backed storage engine.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use rocksdb::checkpoint::Checkpoint;
use rocksdb::{
    BlockBasedOptions, BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction,
    IteratorMode, MergeOperands, MultiThreaded, Options, ReadOptions, WriteBatch, WriteOptions,
    DEFAULT_COLUMN_FAMILY_NAME,
};
use tracing::debug;

use crate::time::HybridTime;

use super::key::{decode_value, decode_versioned_key, encode_key_prefix, encode_value, encode_versioned_key};
use super::{
    CompactionStats, DurabilityMode, Frontier, IteratorOptions, KvWriteBatch, OpId, StorageEngine,
    StorageError, StorageIterator, StorageOptions, VersionedEntry, MAX_KEY_SIZE, MAX_VALUE_SIZE,
};

const META_CF: &str = "tablet_meta";
const LAST_OP_ID_KEY: &[u8] = b"last_op_id";
const MAX_HYBRID_TIME_KEY: &[u8] = b"max_hybrid_time";
const DELETE_CHUNK: usize = 1000;

/// RocksDB storage.
///
/// Versioned data lives in the default column family, newest version first
/// within each user key. The persisted frontier lives in `tablet_meta` and is
/// merged with a byte-wise max so concurrent batches never move it backwards.
pub struct RocksStorage {
    db: DBWithThreadMode<MultiThreaded>,
    write_opts: WriteOptions,
    iterator_batch_size: usize,
}

impl RocksStorage {
    fn meta_cf(&self) -> Result<Arc<BoundColumnFamily<'_>>, StorageError> {
        self.db
            .cf_handle(META_CF)
            .ok_or_else(|| StorageError::Corruption(format!("missing column family {META_CF}")))
    }

    fn validate_entry(entry: &VersionedEntry) -> Result<(), StorageError> {
        if entry.key.len() > MAX_KEY_SIZE {
            return Err(StorageError::KeyTooLarge {
                size: entry.key.len(),
                max: MAX_KEY_SIZE,
            });
        }
        if let Some(value) = &entry.value {
            if value.len() > MAX_VALUE_SIZE {
                return Err(StorageError::ValueTooLarge {
                    size: value.len(),
                    max: MAX_VALUE_SIZE,
                });
            }
        }
        Ok(())
    }

    fn property(&self, name: &str) -> Result<u64, StorageError> {
        Ok(self.db.property_int_value(name)?.unwrap_or(0))
    }
}

fn encode_op_id(op_id: OpId) -> [u8; 16] {
    // Flipping the sign bit makes the big-endian index sort numerically.
    let mut encoded = [0u8; 16];
    encoded[..8].copy_from_slice(&op_id.term.to_be_bytes());
    encoded[8..].copy_from_slice(&((op_id.index as u64) ^ (1 << 63)).to_be_bytes());
    encoded
}

fn decode_op_id(encoded: &[u8]) -> Result<OpId, StorageError> {
    let bytes: [u8; 16] = encoded
        .try_into()
        .map_err(|_| StorageError::Corruption(format!("op id has {} bytes", encoded.len())))?;
    let term = u64::from_be_bytes(bytes[..8].try_into().unwrap_or_default());
    let index = u64::from_be_bytes(bytes[8..].try_into().unwrap_or_default()) ^ (1 << 63);
    Ok(OpId::new(term, index as i64))
}

fn decode_frontier_time(encoded: &[u8]) -> Result<HybridTime, StorageError> {
    let bytes: [u8; 8] = encoded.try_into().map_err(|_| {
        StorageError::Corruption(format!("frontier hybrid time has {} bytes", encoded.len()))
    })?;
    Ok(HybridTime::from_be_bytes(bytes))
}

/// Keeps the byte-wise largest operand.
fn max_merge(_key: &[u8], existing: Option<&[u8]>, operands: &MergeOperands) -> Option<Vec<u8>> {
    existing
        .into_iter()
        .chain(operands.iter())
        .max()
        .map(|max| max.to_vec())
}

impl StorageEngine for RocksStorage {
    fn open(path: &Path, options: &StorageOptions) -> Result<Self, StorageError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(options.create_if_missing);
        db_opts.create_missing_column_families(true);

        let mut data_opts = Options::default();
        data_opts.set_write_buffer_size(options.write_buffer_size);
        data_opts.set_max_write_buffer_number(options.max_write_buffer_number);
        data_opts.set_target_file_size_base(64 * 1024 * 1024);
        data_opts.set_level_compaction_dynamic_level_bytes(true);
        if options.bloom_filter_bits > 0.0 {
            let mut block_opts = BlockBasedOptions::default();
            block_opts.set_bloom_filter(options.bloom_filter_bits, false);
            data_opts.set_block_based_table_factory(&block_opts);
        }

        let mut meta_opts = Options::default();
        meta_opts.set_merge_operator_associative("frontier_max", max_merge);

        let column_families = vec![
            ColumnFamilyDescriptor::new(DEFAULT_COLUMN_FAMILY_NAME, data_opts),
            ColumnFamilyDescriptor::new(META_CF, meta_opts),
        ];
        let db = DBWithThreadMode::open_cf_descriptors(&db_opts, path, column_families)?;

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(options.durability == DurabilityMode::FsyncEveryWrite);

        debug!(path = %path.display(), durability = ?options.durability, "opened rocksdb storage");

        Ok(Self {
            db,
            write_opts,
            iterator_batch_size: options.iterator_batch_size.max(1),
        })
    }

    fn write(&self, batch: KvWriteBatch) -> Result<(), StorageError> {
        let mut write_batch = WriteBatch::default();
        let max_hybrid_time = batch.max_hybrid_time();

        for entry in &batch.entries {
            Self::validate_entry(entry)?;
            write_batch.put(
                encode_versioned_key(&entry.key, entry.hybrid_time),
                encode_value(entry.value.as_ref()),
            );
        }

        if batch.op_id.is_some() || max_hybrid_time.is_some() {
            let meta = self.meta_cf()?;
            if let Some(op_id) = batch.op_id {
                write_batch.merge_cf(&meta, LAST_OP_ID_KEY, encode_op_id(op_id));
            }
            if let Some(ht) = max_hybrid_time {
                write_batch.merge_cf(&meta, MAX_HYBRID_TIME_KEY, ht.to_be_bytes());
            }
        }

        self.db.write_opt(write_batch, &self.write_opts)?;
        Ok(())
    }

    fn new_iterator(self: Arc<Self>, options: IteratorOptions) -> Result<StorageIterator, StorageError> {
        let (start, upper) = match &options.range {
            Some(range) => (encode_key_prefix(range.start()), Some(encode_key_prefix(range.end()))),
            None => (Vec::new(), None),
        };
        let batch_size = self.iterator_batch_size;
        Ok(Box::new(RocksIterator {
            storage: self,
            next_seek: Some(start),
            upper,
            max_hybrid_time: options.max_hybrid_time,
            batch_size,
            buffer: VecDeque::new(),
        }))
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        let meta = self.meta_cf()?;
        self.db.flush_cf(&meta)?;
        Ok(())
    }

    fn compact(&self, history_cutoff: HybridTime) -> Result<CompactionStats, StorageError> {
        let mut stats = CompactionStats::default();
        let mut current_key = None;
        let mut cutoff_version_seen = false;
        let mut pending = WriteBatch::default();

        for item in self.db.iterator(IteratorMode::Start) {
            let (encoded_key, encoded_value) = item?;
            stats.versions_scanned += 1;
            let (key, ht) = decode_versioned_key(&encoded_key)?;

            if current_key.as_ref() != Some(&key) {
                // Chunks end only between user keys: a key's deletions
                // commit in one batch.
                if pending.len() >= DELETE_CHUNK {
                    self.db
                        .write_opt(std::mem::take(&mut pending), &self.write_opts)?;
                }
                current_key = Some(key);
                cutoff_version_seen = false;
            }

            if ht > history_cutoff {
                continue;
            }

            // The newest version at or below the cutoff is what every
            // retained reader sees; keep it unless it is a tombstone.
            if !cutoff_version_seen {
                cutoff_version_seen = true;
                if decode_value(&encoded_value)?.is_some() {
                    continue;
                }
            }

            stats.versions_deleted += 1;
            stats.bytes_reclaimed += (encoded_key.len() + encoded_value.len()) as u64;
            pending.delete(&encoded_key);
        }

        if !pending.is_empty() {
            self.db.write_opt(pending, &self.write_opts)?;
        }
        self.db.compact_range::<&[u8], &[u8]>(None, None);

        Ok(stats)
    }

    fn checkpoint(&self, dir: &Path) -> Result<(), StorageError> {
        if dir.exists() {
            return Err(StorageError::CheckpointExists {
                path: dir.to_path_buf(),
            });
        }
        Checkpoint::new(&self.db)?.create_checkpoint(dir)?;
        Ok(())
    }

    fn approximate_size(&self) -> Result<u64, StorageError> {
        Ok(self.property("rocksdb.total-sst-files-size")?
            + self.property("rocksdb.cur-size-all-mem-tables")?)
    }

    fn total_sst_file_sizes(&self) -> Result<u64, StorageError> {
        self.property("rocksdb.total-sst-files-size")
    }

    fn frontier(&self) -> Result<Frontier, StorageError> {
        let meta = self.meta_cf()?;
        let op_id = self
            .db
            .get_cf(&meta, LAST_OP_ID_KEY)?
            .map(|bytes| decode_op_id(&bytes))
            .transpose()?;
        let max_hybrid_time = self
            .db
            .get_cf(&meta, MAX_HYBRID_TIME_KEY)?
            .map(|bytes| decode_frontier_time(&bytes))
            .transpose()?;
        Ok(Frontier {
            op_id,
            max_hybrid_time,
        })
    }
}

/// Streams versions in bounded chunks.
///
/// Each refill opens a short-lived RocksDB iterator and resumes after the
/// last encoded key seen, so no RocksDB iterator outlives a refill. Every
/// write landing between refills is either above the reader's snapshot
/// bound or was in flight when the snapshot was captured, and is filtered
/// out above this layer. Compaction removes a user key's versions in one
/// batch and never below a registered reader, so a refill sees either the
/// full history of a key or the same visible version without it.
struct RocksIterator {
    storage: Arc<RocksStorage>,
    next_seek: Option<Vec<u8>>,
    upper: Option<Vec<u8>>,
    max_hybrid_time: HybridTime,
    batch_size: usize,
    buffer: VecDeque<VersionedEntry>,
}

impl RocksIterator {
    fn refill(&mut self, seek: Vec<u8>) -> Result<(), StorageError> {
        let mut read_opts = ReadOptions::default();
        if let Some(upper) = &self.upper {
            read_opts.set_iterate_upper_bound(upper.clone());
        }

        let iter = self
            .storage
            .db
            .iterator_opt(IteratorMode::From(&seek, Direction::Forward), read_opts);

        let mut scanned = 0;
        let mut last_key: Option<Box<[u8]>> = None;
        for item in iter {
            let (encoded_key, encoded_value) = item?;
            let (key, hybrid_time) = decode_versioned_key(&encoded_key)?;
            if hybrid_time <= self.max_hybrid_time {
                self.buffer.push_back(VersionedEntry {
                    key,
                    hybrid_time,
                    value: decode_value(&encoded_value)?,
                });
            }
            last_key = Some(encoded_key);
            scanned += 1;
            if scanned >= self.batch_size {
                break;
            }
        }

        if scanned >= self.batch_size {
            if let Some(last_key) = last_key {
                let mut resume = last_key.into_vec();
                resume.push(0);
                self.next_seek = Some(resume);
            }
        }
        Ok(())
    }
}

impl Iterator for RocksIterator {
    type Item = Result<VersionedEntry, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                return Some(Ok(entry));
            }
            let seek = self.next_seek.take()?;
            if let Err(e) = self.refill(seek) {
                return Some(Err(e));
            }
        }
    }
}
