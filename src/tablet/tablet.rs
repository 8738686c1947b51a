// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The tablet: lifecycle, maintenance and shared state.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::lock::SharedLockManager;
use crate::mvcc::{ActiveReaderRegistry, MvccManager};
use crate::storage::{CompactionStats, IteratorOptions, OpId, RocksStorage, StorageEngine};
use crate::time::{Clock, HybridTime};

use super::{
    FlushMode, FlushOutcome, FlushStats, PendingOperationCounter, RetentionPolicy, Schema,
    ScopedPendingOperation, TabletError, TabletMetadata, TabletOptions, TransactionContext,
    TransactionMetadata, TransactionParticipant,
};

/// Coarse lifecycle state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TabletState {
    /// Constructed; no storage open.
    Initialized,
    /// Storage open; only log replay is accepted.
    Bootstrapping,
    /// Serving reads and writes.
    Open,
    /// Storage released.
    Shutdown,
}

/// One shard of a table.
///
/// Owns the MVCC manager, lock manager, pending-operation counter and the
/// storage handle. Every entry point is `&self`; the tablet is shared across
/// threads by reference or `Arc`.
pub struct Tablet<S: StorageEngine = RocksStorage> {
    pub(super) tablet_id: String,
    pub(super) metadata: RwLock<TabletMetadata>,
    pub(super) options: TabletOptions,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) mvcc: MvccManager,
    pub(super) readers: ActiveReaderRegistry,
    pub(super) lock_manager: SharedLockManager,
    pub(super) pending_ops: PendingOperationCounter,
    pub(super) flush_stats: FlushStats,
    pub(super) participant: Option<Arc<dyn TransactionParticipant>>,
    /// Current storage view. Held only long enough to clone the handle.
    component: RwLock<Option<Arc<S>>>,
    state: Mutex<TabletState>,
    shutdown_requested: AtomicBool,
    pub(super) last_committed_write_index: AtomicI64,
    /// Log position persisted before the last open; replay skips up to here.
    pub(super) replay_floor: Mutex<Option<OpId>>,
    monotonic_counter: AtomicU64,
    flush_gate: Mutex<()>,
    compaction_selection: Mutex<()>,
    checkpoint_lock: Mutex<()>,
}

impl<S: StorageEngine> Tablet<S> {
    /// Creates a tablet in [`TabletState::Initialized`].
    pub fn new(metadata: TabletMetadata, options: TabletOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            tablet_id: metadata.tablet_id.clone(),
            metadata: RwLock::new(metadata),
            options,
            mvcc: MvccManager::new(Arc::clone(&clock)),
            clock,
            readers: ActiveReaderRegistry::new(),
            lock_manager: SharedLockManager::new(),
            pending_ops: PendingOperationCounter::new(),
            flush_stats: FlushStats::new(),
            participant: None,
            component: RwLock::new(None),
            state: Mutex::new(TabletState::Initialized),
            shutdown_requested: AtomicBool::new(false),
            last_committed_write_index: AtomicI64::new(0),
            replay_floor: Mutex::new(None),
            monotonic_counter: AtomicU64::new(0),
            flush_gate: Mutex::new(()),
            compaction_selection: Mutex::new(()),
            checkpoint_lock: Mutex::new(()),
        }
    }

    /// Enables transactional reads and intent application.
    pub fn with_transaction_participant(mut self, participant: Arc<dyn TransactionParticipant>) -> Self {
        self.participant = Some(participant);
        self
    }

    /// Opens storage and enters [`TabletState::Bootstrapping`].
    ///
    /// The persisted frontier moves the clock past every stored write and
    /// restores the last committed index.
    #[instrument(skip(self), fields(tablet_id = %self.tablet_id))]
    pub fn open(&self) -> Result<(), TabletError> {
        let mut state = self.state.lock();
        if self.shutdown_requested.load(Ordering::Acquire) {
            return Err(self.shutdown_error());
        }
        if *state != TabletState::Initialized {
            return Err(TabletError::IllegalState(format!(
                "cannot open tablet {} in state {:?}",
                self.tablet_id, *state
            )));
        }

        let data_dir = self.metadata.read().data_dir.clone();
        let storage = S::open(&data_dir, &self.options.storage)?;
        let frontier = storage.frontier()?;
        if let Some(max_hybrid_time) = frontier.max_hybrid_time {
            self.clock.update(max_hybrid_time);
        }
        if let Some(op_id) = frontier.op_id {
            self.last_committed_write_index
                .store(op_id.index, Ordering::SeqCst);
        }
        *self.replay_floor.lock() = frontier.op_id;
        *self.component.write() = Some(Arc::new(storage));
        *state = TabletState::Bootstrapping;

        info!(
            data_dir = %data_dir.display(),
            op_id = ?frontier.op_id,
            max_hybrid_time = ?frontier.max_hybrid_time,
            "tablet storage opened"
        );
        Ok(())
    }

    /// Leaves [`TabletState::Bootstrapping`] and starts serving traffic.
    #[instrument(skip(self), fields(tablet_id = %self.tablet_id))]
    pub fn mark_finished_bootstrapping(&self) -> Result<(), TabletError> {
        let mut state = self.state.lock();
        if *state != TabletState::Bootstrapping {
            return Err(TabletError::IllegalState(format!(
                "tablet {} is {:?}, not bootstrapping",
                self.tablet_id, *state
            )));
        }
        *state = TabletState::Open;
        info!(
            last_committed_write_index = self.last_committed_write_index(),
            "tablet open"
        );
        Ok(())
    }

    /// Rejects new operations from now on without waiting for running ones.
    pub fn request_shutdown(&self) {
        if !self.shutdown_requested.swap(true, Ordering::AcqRel) {
            debug!(tablet_id = %self.tablet_id, "shutdown requested");
        }
    }

    /// Waits for pending operations to drain, then releases storage.
    ///
    /// Idempotent.
    #[instrument(skip(self), fields(tablet_id = %self.tablet_id))]
    pub fn shutdown(&self) {
        self.request_shutdown();
        self.pending_ops.close();

        while !self
            .pending_ops
            .wait_for_ops_to_finish(self.options.shutdown_wait_log_interval)
        {
            warn!(
                pending = self.pending_ops.count(),
                "waiting for pending operations before shutdown"
            );
        }

        let mut state = self.state.lock();
        if *state == TabletState::Shutdown {
            return;
        }
        let storage = self.component.write().take();
        drop(storage);
        *state = TabletState::Shutdown;
        info!("tablet shut down");
    }

    pub fn state(&self) -> TabletState {
        *self.state.lock()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    /// Admits an operation if the tablet is in one of `allowed`.
    ///
    /// The shutdown flag is consulted before the pending counter is touched.
    pub(super) fn begin_operation(
        &self,
        allowed: &[TabletState],
    ) -> Result<ScopedPendingOperation<'_>, TabletError> {
        if self.shutdown_requested.load(Ordering::Acquire) {
            return Err(self.shutdown_error());
        }
        let state = self.state();
        if !allowed.contains(&state) {
            return Err(TabletError::IllegalState(format!(
                "tablet {} is {state:?}, expected one of {allowed:?}",
                self.tablet_id
            )));
        }
        self.pending_ops
            .try_begin()
            .ok_or_else(|| self.shutdown_error())
    }

    /// Clones the current storage handle.
    pub(super) fn storage(&self) -> Result<Arc<S>, TabletError> {
        self.component
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| {
                TabletError::IllegalState(format!("tablet {} has no open storage", self.tablet_id))
            })
    }

    fn shutdown_error(&self) -> TabletError {
        TabletError::ShutdownInProgress {
            tablet_id: self.tablet_id.clone(),
        }
    }

    /// Persists in-memory writes.
    ///
    /// At most one flush runs at a time. In [`FlushMode::Async`] a request
    /// made while another flush runs returns without flushing.
    #[instrument(skip(self), fields(tablet_id = %self.tablet_id))]
    pub fn flush(&self, mode: FlushMode) -> Result<FlushOutcome, TabletError> {
        let _pending = self.begin_operation(&[TabletState::Bootstrapping, TabletState::Open])?;
        let _gate = match mode {
            FlushMode::Sync => self.flush_gate.lock(),
            FlushMode::Async => match self.flush_gate.try_lock() {
                Some(gate) => gate,
                None => {
                    debug!("flush already in progress");
                    return Ok(FlushOutcome::AlreadyInProgress);
                }
            },
        };

        let storage = self.storage()?;
        self.flush_stats.on_flush_scheduled();
        match storage.flush() {
            Ok(()) => {
                self.flush_stats.on_flush_completed();
                debug!(num_flushes = self.flush_stats.num_flushes(), "flush completed");
                Ok(FlushOutcome::Flushed)
            }
            Err(e) => {
                self.flush_stats.on_flush_failed();
                error!(error = %e, "flush failed");
                Err(e.into())
            }
        }
    }

    /// Discards history no reader can still see.
    ///
    /// Choosing the cutoff is serialized separately from the flush gate;
    /// the compaction I/O itself runs outside both.
    #[instrument(skip(self), fields(tablet_id = %self.tablet_id))]
    pub fn compact(&self) -> Result<CompactionStats, TabletError> {
        let _pending = self.begin_operation(&[TabletState::Open])?;
        let cutoff = {
            let _selection = self.compaction_selection.lock();
            let proposed = self.retention_policy().safe_read_point();
            self.readers.commit_history_cutoff(proposed)
        };

        let storage = self.storage()?;
        let stats = storage.compact(cutoff)?;
        info!(
            %cutoff,
            versions_scanned = stats.versions_scanned,
            versions_deleted = stats.versions_deleted,
            bytes_reclaimed = stats.bytes_reclaimed,
            "compaction finished"
        );
        Ok(stats)
    }

    /// Writes a consistent copy of the tablet's storage to `dir`.
    #[instrument(skip(self), fields(tablet_id = %self.tablet_id))]
    pub fn create_checkpoint(&self, dir: &Path) -> Result<(), TabletError> {
        let _pending = self.begin_operation(&[TabletState::Open])?;
        let _checkpoint = self.checkpoint_lock.lock();
        self.storage()?.checkpoint(dir)?;
        info!(dir = %dir.display(), "checkpoint created");
        Ok(())
    }

    /// Replaces the schema.
    ///
    /// Takes the schema lock exclusively, so it waits for every prepared
    /// write to finish and blocks new ones until the change is applied.
    #[instrument(skip(self, schema), fields(tablet_id = %self.tablet_id, version = schema.version()))]
    pub fn alter_schema(&self, schema: Schema) -> Result<(), TabletError> {
        let _pending = self.begin_operation(&[TabletState::Bootstrapping, TabletState::Open])?;
        let mut metadata = self.metadata.write();
        metadata.schema.validate_successor(&schema)?;
        info!(from = metadata.schema.version(), "schema altered");
        metadata.schema = schema;
        Ok(())
    }

    /// Starts a transactional context for reads.
    pub fn create_transaction_context(
        &self,
        metadata: TransactionMetadata,
    ) -> Result<TransactionContext, TabletError> {
        let _pending = self.begin_operation(&[TabletState::Bootstrapping, TabletState::Open])?;
        let participant = self
            .participant
            .as_ref()
            .ok_or(TabletError::TransactionsDisabled)?;
        participant.register(&metadata)?;
        Ok(TransactionContext::new(metadata, Arc::clone(participant)))
    }

    /// Every stored version as `key @ hybrid_time: value`, for debugging.
    pub fn debug_dump(&self) -> Result<Vec<String>, TabletError> {
        let _pending = self.begin_operation(&[TabletState::Bootstrapping, TabletState::Open])?;
        let mut lines = Vec::new();
        for entry in self.storage()?.new_iterator(IteratorOptions::new(HybridTime::MAX))? {
            let entry = entry?;
            let value = match &entry.value {
                Some(value) => format!("{:?}", String::from_utf8_lossy(value.as_bytes())),
                None => "DELETE".to_string(),
            };
            lines.push(format!("{} @ {}: {}", entry.key, entry.hybrid_time, value));
        }
        Ok(lines)
    }

    /// Bytes in persisted sorted files.
    pub fn total_sst_file_sizes(&self) -> Result<u64, TabletError> {
        let _pending = self.begin_operation(&[TabletState::Bootstrapping, TabletState::Open])?;
        Ok(self.storage()?.total_sst_file_sizes()?)
    }

    /// Bytes in memory buffers and persisted files.
    pub fn approximate_size(&self) -> Result<u64, TabletError> {
        let _pending = self.begin_operation(&[TabletState::Bootstrapping, TabletState::Open])?;
        Ok(self.storage()?.approximate_size()?)
    }

    pub fn monotonic_counter(&self) -> u64 {
        self.monotonic_counter.load(Ordering::Acquire)
    }

    /// Raises the monotonic counter to at least `value`.
    pub fn update_monotonic_counter(&self, value: u64) -> u64 {
        self.monotonic_counter
            .fetch_max(value, Ordering::AcqRel)
            .max(value)
    }

    /// Index of the newest write applied, for log retention.
    pub fn last_committed_write_index(&self) -> i64 {
        self.last_committed_write_index.load(Ordering::SeqCst)
    }

    pub fn retention_policy(&self) -> RetentionPolicy<'_> {
        RetentionPolicy::new(
            &self.readers,
            &self.flush_stats,
            &self.mvcc,
            self.options.history_retention,
        )
    }

    pub fn tablet_id(&self) -> &str {
        &self.tablet_id
    }

    /// A copy of the current schema, taken under a brief shared lock.
    ///
    /// Recursive, so a thread holding a prepared write can call it while a
    /// schema change waits.
    pub fn schema(&self) -> Schema {
        self.metadata.read_recursive().schema.clone()
    }

    pub fn metadata(&self) -> TabletMetadata {
        self.metadata.read_recursive().clone()
    }

    pub fn options(&self) -> &TabletOptions {
        &self.options
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn mvcc(&self) -> &MvccManager {
        &self.mvcc
    }

    pub fn active_readers(&self) -> &ActiveReaderRegistry {
        &self.readers
    }

    pub fn lock_manager(&self) -> &SharedLockManager {
        &self.lock_manager
    }

    pub fn pending_operations(&self) -> &PendingOperationCounter {
        &self.pending_ops
    }

    pub fn flush_stats(&self) -> &FlushStats {
        &self.flush_stats
    }
}

impl<S: StorageEngine> Drop for Tablet<S> {
    fn drop(&mut self) {
        if self.state() != TabletState::Shutdown {
            self.shutdown();
        }
    }
}

impl<S: StorageEngine> std::fmt::Debug for Tablet<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tablet")
            .field("tablet_id", &self.tablet_id)
            .field("state", &self.state())
            .field("pending_ops", &self.pending_ops.count())
            .field("mvcc", &self.mvcc)
            .finish_non_exhaustive()
    }
}
