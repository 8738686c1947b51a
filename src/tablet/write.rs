// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The write pipeline.
//!
//! A write moves through `Prepared → LockAcquired → TimestampAssigned →
//! Applying → Committed`. Locks are always taken before the hybrid time is
//! issued, so on any single key the commit order and the hybrid time order
//! agree. Until it starts applying, a write can be dropped; dropping it
//! retracts its hybrid time and releases its locks.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::RwLockReadGuard;
use tracing::{debug, error};

use crate::lock::{LockBatch, LockRequest};
use crate::mvcc::MvccSnapshot;
use crate::storage::{
    IteratorOptions, Key, KeyRange, KvWriteBatch, OpId, RocksStorage, StorageEngine, Value,
    MAX_KEY_SIZE, MAX_VALUE_SIZE,
};
use crate::time::HybridTime;

use super::read::VisibleVersions;
use super::{
    ScopedPendingOperation, Tablet, TabletError, TabletMetadata, TabletState,
    TransactionApplyData,
};

/// A decoded row mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOp {
    Put { key: Key, value: Value },
    Delete { key: Key },
    /// Deletes every live key in the range.
    DeleteRange(KeyRange),
}

impl RowOp {
    pub fn put(key: impl Into<Key>, value: impl Into<Value>) -> Self {
        RowOp::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Key>) -> Self {
        RowOp::Delete { key: key.into() }
    }

    pub fn delete_range(range: KeyRange) -> Self {
        RowOp::DeleteRange(range)
    }

    /// The exclusive lock this mutation needs.
    pub fn lock_request(&self) -> LockRequest {
        match self {
            RowOp::Put { key, .. } | RowOp::Delete { key } => {
                LockRequest::exclusive(KeyRange::point(key.clone()))
            }
            RowOp::DeleteRange(range) => LockRequest::exclusive(range.clone()),
        }
    }

    pub(super) fn validate(&self) -> Result<(), TabletError> {
        let key_len = match self {
            RowOp::Put { key, .. } | RowOp::Delete { key } => key.len(),
            RowOp::DeleteRange(range) => range.start().len().max(range.end().len()),
        };
        if key_len > MAX_KEY_SIZE {
            return Err(TabletError::InvalidArgument(format!(
                "key of {key_len} bytes exceeds {MAX_KEY_SIZE}"
            )));
        }
        if let RowOp::Put { value, .. } = self {
            if value.len() > MAX_VALUE_SIZE {
                return Err(TabletError::InvalidArgument(format!(
                    "value of {} bytes exceeds {MAX_VALUE_SIZE}",
                    value.len()
                )));
            }
        }
        Ok(())
    }
}

/// Row mutations decoded against one schema version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub schema_version: u32,
    pub ops: Vec<RowOp>,
}

impl WriteRequest {
    pub fn new(schema_version: u32) -> Self {
        Self {
            schema_version,
            ops: Vec::new(),
        }
    }

    pub fn with_op(mut self, op: RowOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn put(self, key: impl Into<Key>, value: impl Into<Value>) -> Self {
        self.with_op(RowOp::put(key, value))
    }

    pub fn delete(self, key: impl Into<Key>) -> Self {
        self.with_op(RowOp::delete(key))
    }

    pub fn delete_range(self, range: KeyRange) -> Self {
        self.with_op(RowOp::delete_range(range))
    }
}

/// Where a write is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    Prepared,
    LockAcquired,
    TimestampAssigned,
    Applying,
    Committed,
    Aborted,
}

/// A write that holds its locks and hybrid time.
///
/// Also holds the schema lock shared and keeps the tablet's pending
/// operation count raised until dropped.
pub struct WriteOperation<'a, S: StorageEngine = RocksStorage> {
    tablet: &'a Tablet<S>,
    request: WriteRequest,
    state: WriteState,
    hybrid_time: Option<HybridTime>,
    locks: Option<LockBatch<'a>>,
    // Released after `drop` has given back the locks.
    _schema: RwLockReadGuard<'a, TabletMetadata>,
    _pending: ScopedPendingOperation<'a>,
}

impl<'a, S: StorageEngine> WriteOperation<'a, S> {
    pub fn state(&self) -> WriteState {
        self.state
    }

    pub fn hybrid_time(&self) -> Option<HybridTime> {
        self.hybrid_time
    }

    pub fn request(&self) -> &WriteRequest {
        &self.request
    }

    /// Abandons the write before it reaches storage.
    pub fn abort(self) {
        drop(self);
    }
}

impl<S: StorageEngine> Drop for WriteOperation<'_, S> {
    fn drop(&mut self) {
        if self.state == WriteState::TimestampAssigned {
            if let Some(ht) = self.hybrid_time {
                self.tablet.mvcc.abort(ht);
            }
        }
        if self.state != WriteState::Committed {
            self.state = WriteState::Aborted;
        }
        if let Some(locks) = self.locks.take() {
            locks.release();
        }
    }
}

impl<S: StorageEngine> std::fmt::Debug for WriteOperation<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteOperation")
            .field("state", &self.state)
            .field("hybrid_time", &self.hybrid_time)
            .field("ops", &self.request.ops.len())
            .finish()
    }
}

impl<S: StorageEngine> Tablet<S> {
    /// Admits a write, takes its locks and assigns its hybrid time.
    pub fn prepare_write(&self, request: WriteRequest) -> Result<WriteOperation<'_, S>, TabletError> {
        self.prepare(request, &[TabletState::Open], None)
    }

    /// Submits a prepared write to storage and commits it.
    ///
    /// On a storage failure the hybrid time is aborted and the locks are
    /// released; nothing of the write becomes visible.
    pub fn apply_write(&self, mut op: WriteOperation<'_, S>, op_id: OpId) -> Result<HybridTime, TabletError> {
        assert!(
            std::ptr::eq(op.tablet, self),
            "write operation applied to a different tablet"
        );
        let ht = match (op.state, op.hybrid_time) {
            (WriteState::TimestampAssigned, Some(ht)) => ht,
            (state, _) => panic!("apply of write operation in state {state:?}"),
        };

        let storage = self.storage()?;
        let batch = self.build_write_batch(&storage, &op.request.ops, ht, op_id)?;

        self.mvcc.start_applying(ht);
        op.state = WriteState::Applying;

        match storage.write(batch) {
            Ok(()) => {
                self.flush_stats.about_to_write(ht);
                self.mvcc.commit(ht);
                op.state = WriteState::Committed;
                self.last_committed_write_index
                    .fetch_max(op_id.index, Ordering::SeqCst);
                drop(op);
                debug!(tablet_id = %self.tablet_id, %ht, %op_id, "write committed");
                Ok(ht)
            }
            Err(e) => {
                self.mvcc.abort(ht);
                op.state = WriteState::Aborted;
                error!(tablet_id = %self.tablet_id, %ht, %op_id, error = %e, "write failed to apply");
                Err(e.into())
            }
        }
    }

    /// Prepares and applies a write in one call.
    pub fn write(&self, request: WriteRequest, op_id: OpId) -> Result<HybridTime, TabletError> {
        let op = self.prepare_write(request)?;
        self.apply_write(op, op_id)
    }

    /// Re-applies a logged write during bootstrap at its original hybrid time.
    ///
    /// Returns `None` if storage already holds the write.
    pub fn replay_write(
        &self,
        request: WriteRequest,
        hybrid_time: HybridTime,
        op_id: OpId,
    ) -> Result<Option<HybridTime>, TabletError> {
        if self.already_persisted(op_id) {
            debug!(tablet_id = %self.tablet_id, %op_id, "skipping persisted write");
            return Ok(None);
        }
        let op = self.prepare(request, &[TabletState::Bootstrapping], Some(hybrid_time))?;
        self.apply_write(op, op_id).map(Some)
    }

    /// Applies the writes of a transaction committed elsewhere.
    ///
    /// No locks are taken; the coordinator already ordered the transaction
    /// at its commit time. The commit time is registered as in flight while
    /// the batch is written, so a snapshot sees all of the transaction or
    /// none of it. Fails with [`MvccError::TimestampTooOld`] when a write or
    /// snapshot has already been issued at or above the commit time.
    ///
    /// [`MvccError::TimestampTooOld`]: crate::mvcc::MvccError::TimestampTooOld
    pub fn apply_committed_intents(&self, data: TransactionApplyData) -> Result<(), TabletError> {
        let _pending = self.begin_operation(&[TabletState::Bootstrapping, TabletState::Open])?;
        let participant = self
            .participant
            .as_ref()
            .ok_or(TabletError::TransactionsDisabled)?;
        let _schema = self.metadata.read_recursive();

        if self.state() == TabletState::Bootstrapping && self.already_persisted(data.op_id) {
            participant.on_applied(data.transaction_id);
            return Ok(());
        }

        let mut batch = KvWriteBatch::new(Some(data.op_id));
        for op in data.intents {
            op.validate()?;
            match op {
                RowOp::Put { key, value } => batch.put(key, value, data.commit_time),
                RowOp::Delete { key } => batch.delete(key, data.commit_time),
                RowOp::DeleteRange(range) => {
                    return Err(TabletError::InvalidArgument(format!(
                        "range delete {range} in intents of transaction {}",
                        data.transaction_id
                    )))
                }
            }
        }

        let storage = self.storage()?;
        let ht = data.commit_time;
        self.mvcc.start_operation_at(ht)?;
        self.mvcc.start_applying(ht);
        if let Err(e) = storage.write(batch) {
            self.mvcc.abort(ht);
            error!(
                tablet_id = %self.tablet_id,
                transaction_id = %data.transaction_id,
                error = %e,
                "committed intents failed to apply"
            );
            return Err(e.into());
        }
        self.flush_stats.about_to_write(ht);
        self.mvcc.commit(ht);
        self.last_committed_write_index
            .fetch_max(data.op_id.index, Ordering::SeqCst);
        participant.on_applied(data.transaction_id);

        debug!(
            tablet_id = %self.tablet_id,
            transaction_id = %data.transaction_id,
            commit_time = %data.commit_time,
            "applied committed intents"
        );
        Ok(())
    }

    fn prepare(
        &self,
        request: WriteRequest,
        allowed: &[TabletState],
        replay_time: Option<HybridTime>,
    ) -> Result<WriteOperation<'_, S>, TabletError> {
        let pending = self.begin_operation(allowed)?;
        let metadata = self.metadata.read_recursive();
        let current = metadata.schema.version();
        if request.schema_version != current {
            return Err(TabletError::SchemaVersionMismatch {
                requested: request.schema_version,
                current,
            });
        }
        if request.ops.is_empty() {
            return Err(TabletError::InvalidArgument("write has no operations".to_string()));
        }
        for op in &request.ops {
            op.validate()?;
        }

        let lock_requests = request.ops.iter().map(RowOp::lock_request).collect();
        let mut op = WriteOperation {
            tablet: self,
            request,
            state: WriteState::Prepared,
            hybrid_time: None,
            locks: None,
            _schema: metadata,
            _pending: pending,
        };

        op.locks = Some(
            self.lock_manager
                .lock(lock_requests, self.options.lock_wait_timeout)?,
        );
        op.state = WriteState::LockAcquired;

        let ht = match replay_time {
            None => self.mvcc.start_operation(),
            Some(ht) => {
                self.mvcc.start_operation_at(ht)?;
                ht
            }
        };
        op.hybrid_time = Some(ht);
        op.state = WriteState::TimestampAssigned;
        Ok(op)
    }

    fn already_persisted(&self, op_id: OpId) -> bool {
        self.replay_floor
            .lock()
            .is_some_and(|floor| op_id.index <= floor.index)
    }

    /// Versions every mutation at `ht`. Range deletes tombstone the keys
    /// live just below `ht` plus any the same request put earlier.
    fn build_write_batch(
        &self,
        storage: &Arc<S>,
        ops: &[RowOp],
        ht: HybridTime,
        op_id: OpId,
    ) -> Result<KvWriteBatch, TabletError> {
        let mut batch = KvWriteBatch::new(Some(op_id));
        for op in ops {
            match op {
                RowOp::Put { key, value } => batch.put(key.clone(), value.clone(), ht),
                RowOp::Delete { key } => batch.delete(key.clone(), ht),
                RowOp::DeleteRange(range) => {
                    let snapshot = MvccSnapshot::clean(ht.decremented());
                    let versions = Arc::clone(storage).new_iterator(
                        IteratorOptions::new(snapshot.bound()).with_range(Some(range.clone())),
                    )?;
                    for row in VisibleVersions::new(versions, snapshot) {
                        batch.delete(row?.key, ht);
                    }

                    let written: Vec<Key> = batch
                        .entries
                        .iter()
                        .filter(|entry| !entry.is_tombstone() && range.contains(&entry.key))
                        .map(|entry| entry.key.clone())
                        .collect();
                    for key in written {
                        batch.delete(key, ht);
                    }
                }
            }
        }
        Ok(batch)
    }
}
