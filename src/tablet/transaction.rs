// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Hooks into the distributed transaction layer.
//!
//! Intent resolution happens outside the tablet. The tablet only needs to
//! know which provisional writes a reading transaction made, and to apply a
//! transaction's writes once the coordinator has committed it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::storage::{Key, KeyRange, OpId, Value};
use crate::time::HybridTime;

use super::{RowOp, TabletError};

/// Unique transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u128);

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// What the tablet is told about a transaction when a context is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionMetadata {
    pub id: TransactionId,
    /// Reads in the transaction default to this time.
    pub start_time: HybridTime,
}

impl TransactionMetadata {
    pub fn new(id: TransactionId, start_time: HybridTime) -> Self {
        Self { id, start_time }
    }
}

/// A committed transaction's writes, applied at its commit time.
#[derive(Debug, Clone)]
pub struct TransactionApplyData {
    pub transaction_id: TransactionId,
    pub commit_time: HybridTime,
    pub op_id: OpId,
    /// Puts and deletes only.
    pub intents: Vec<RowOp>,
}

/// The tablet's view of the transaction participant.
pub trait TransactionParticipant: Send + Sync {
    /// Registers a transaction that will read or write through this tablet.
    fn register(&self, metadata: &TransactionMetadata) -> Result<(), TabletError>;

    /// The transaction's provisional writes in `range`, `None` values being
    /// deletes.
    fn provisional_writes(
        &self,
        id: TransactionId,
        range: Option<&KeyRange>,
    ) -> BTreeMap<Key, Option<Value>>;

    /// Called after the transaction's writes reached storage.
    fn on_applied(&self, id: TransactionId);
}

/// Handle used by reads inside a transaction.
#[derive(Clone)]
pub struct TransactionContext {
    metadata: TransactionMetadata,
    participant: Arc<dyn TransactionParticipant>,
}

impl TransactionContext {
    pub(crate) fn new(metadata: TransactionMetadata, participant: Arc<dyn TransactionParticipant>) -> Self {
        Self {
            metadata,
            participant,
        }
    }

    pub fn metadata(&self) -> &TransactionMetadata {
        &self.metadata
    }

    pub fn id(&self) -> TransactionId {
        self.metadata.id
    }

    /// The transaction's own writes in `range`, layered over committed data.
    pub fn overlay(&self, range: Option<&KeyRange>) -> BTreeMap<Key, Option<Value>> {
        self.participant.provisional_writes(self.metadata.id, range)
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct TransactionEntry {
    writes: BTreeMap<Key, Option<Value>>,
}

/// A participant that keeps provisional writes in memory.
#[derive(Debug, Default)]
pub struct InMemoryTransactionParticipant {
    transactions: Mutex<HashMap<TransactionId, TransactionEntry>>,
}

impl InMemoryTransactionParticipant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a provisional put or delete for a registered transaction.
    pub fn write_intent(&self, id: TransactionId, op: RowOp) -> Result<(), TabletError> {
        let mut transactions = self.transactions.lock();
        let entry = transactions
            .get_mut(&id)
            .ok_or_else(|| TabletError::InvalidArgument(format!("unknown transaction {id}")))?;
        match op {
            RowOp::Put { key, value } => {
                entry.writes.insert(key, Some(value));
            }
            RowOp::Delete { key } => {
                entry.writes.insert(key, None);
            }
            RowOp::DeleteRange(range) => {
                return Err(TabletError::InvalidArgument(format!(
                    "range delete {range} cannot be an intent"
                )))
            }
        }
        Ok(())
    }

    pub fn is_registered(&self, id: TransactionId) -> bool {
        self.transactions.lock().contains_key(&id)
    }
}

impl TransactionParticipant for InMemoryTransactionParticipant {
    fn register(&self, metadata: &TransactionMetadata) -> Result<(), TabletError> {
        self.transactions.lock().entry(metadata.id).or_default();
        Ok(())
    }

    fn provisional_writes(
        &self,
        id: TransactionId,
        range: Option<&KeyRange>,
    ) -> BTreeMap<Key, Option<Value>> {
        let transactions = self.transactions.lock();
        let Some(entry) = transactions.get(&id) else {
            return BTreeMap::new();
        };
        entry
            .writes
            .iter()
            .filter(|(key, _)| range.map_or(true, |range| range.contains(key)))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn on_applied(&self, id: TransactionId) {
        self.transactions.lock().remove(&id);
    }
}
