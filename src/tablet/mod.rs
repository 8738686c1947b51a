// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The per-shard tablet engine.
//!
//! A [`Tablet`] ties the storage engine to the concurrency machinery around
//! it:
//!
//! - writes take range locks, receive a hybrid time from the MVCC manager
//!   and become visible when committed
//! - reads register with the active-reader registry and resolve the newest
//!   version their snapshot may see
//! - flush and compaction run against a retention bound no reader is below
//! - shutdown rejects new work and waits for running operations to drain
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tabletkv::storage::OpId;
//! use tabletkv::tablet::{
//!     ColumnSchema, ReadOptions, Schema, Tablet, TabletMetadata, TabletOptions, WriteRequest,
//! };
//! use tabletkv::time::HybridClock;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let schema = Schema::new(1, vec![ColumnSchema::key("id"), ColumnSchema::value("v")])?;
//! let metadata = TabletMetadata::new("t-1", "users", "/tmp/tablet-1", schema);
//! let tablet: Tablet = Tablet::new(metadata, TabletOptions::default(), Arc::new(HybridClock::default()));
//! tablet.open()?;
//! tablet.mark_finished_bootstrapping()?;
//!
//! tablet.write(WriteRequest::new(1).put("alice", "1"), OpId::new(1, 1))?;
//! let rows = tablet.collect_rows(ReadOptions::default().ordered())?;
//! assert_eq!(rows.len(), 1);
//!
//! tablet.shutdown();
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod flush;
mod metadata;
mod pending_ops;
mod read;
mod retention;
#[allow(clippy::module_inception)]
mod tablet;
mod transaction;
mod write;


pub use config::TabletOptions;
pub use error::TabletError;
pub use flush::{FlushMode, FlushOutcome, FlushStats};
pub use metadata::{ColumnSchema, Schema, TabletMetadata};
pub use pending_ops::{PendingOperationCounter, ScopedPendingOperation};
pub use read::{
    OrderMode, OrderedRowIterator, ReadOptions, Row, RowIterator, ScopedReadOperation,
    TabletRowIterator, UnorderedRowIterator,
};
pub use retention::RetentionPolicy;
pub use tablet::{Tablet, TabletState};
pub use transaction::{
    InMemoryTransactionParticipant, TransactionApplyData, TransactionContext, TransactionId,
    TransactionMetadata, TransactionParticipant,
};
pub use write::{RowOp, WriteOperation, WriteRequest, WriteState};
