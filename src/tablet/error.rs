// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Tablet error types.

use crate::lock::LockError;
use crate::mvcc::MvccError;
use crate::storage::StorageError;
use crate::time::HybridTime;

/// Errors returned by tablet operations.
///
/// Nothing is retried inside the tablet; [`is_retryable`](Self::is_retryable)
/// tells the caller which failures are worth another attempt.
#[derive(Debug, thiserror::Error)]
pub enum TabletError {
    #[error("tablet {tablet_id} is shutting down")]
    ShutdownInProgress { tablet_id: String },

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("schema version mismatch: request has {requested}, tablet has {current}")]
    SchemaVersionMismatch { requested: u32, current: u32 },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("read at {requested} is older than the history cutoff {cutoff}")]
    SnapshotTooOld {
        requested: HybridTime,
        cutoff: HybridTime,
    },

    #[error("transactions are not enabled on this tablet")]
    TransactionsDisabled,

    #[error("timed out: {0}")]
    TimedOut(String),

    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    #[error("mvcc error: {0}")]
    Mvcc(MvccError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl TabletError {
    /// Returns true if the same request may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TabletError::ShutdownInProgress { .. } | TabletError::TimedOut(_) | TabletError::Lock(_)
        )
    }
}

impl From<MvccError> for TabletError {
    fn from(err: MvccError) -> Self {
        match err {
            MvccError::SnapshotTooOld { requested, cutoff } => {
                TabletError::SnapshotTooOld { requested, cutoff }
            }
            other => TabletError::Mvcc(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::KeyRange;
    use std::time::Duration;

    #[test]
    fn test_snapshot_too_old_is_lifted() {
        let err = TabletError::from(MvccError::SnapshotTooOld {
            requested: HybridTime::from_micros(1),
            cutoff: HybridTime::from_micros(2),
        });
        assert!(matches!(err, TabletError::SnapshotTooOld { .. }));
    }

    #[test]
    fn test_retryable_classes() {
        let lock = TabletError::from(LockError::TimedOut {
            range: KeyRange::point("k"),
            waited: Duration::from_millis(5),
        });
        assert!(lock.is_retryable());
        assert!(!TabletError::InvalidArgument("bad".into()).is_retryable());
        assert!(!TabletError::from(StorageError::Corruption("bad block".into())).is_retryable());
    }
}
