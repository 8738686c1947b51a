// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! MVCC error types.

use crate::time::HybridTime;

/// Recoverable MVCC failures.
///
/// Contract violations (committing an unknown hybrid time, committing an
/// operation that never started applying) panic instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MvccError {
    #[error("hybrid time {requested} is not above the last issued time {last_issued}")]
    TimestampTooOld {
        requested: HybridTime,
        last_issued: HybridTime,
    },

    #[error("snapshot at {requested} is older than the history cutoff {cutoff}")]
    SnapshotTooOld {
        requested: HybridTime,
        cutoff: HybridTime,
    },
}
