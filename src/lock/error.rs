// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Lock error types.

use std::time::Duration;

use crate::storage::KeyRange;

/// Errors returned by the shared lock manager.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for lock on {range}")]
    TimedOut { range: KeyRange, waited: Duration },
}
