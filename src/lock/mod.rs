// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Key-range locks that serialize conflicting writers.
//!
//! Readers never take these locks; they rely on MVCC snapshots.

mod error;
mod manager;

pub use error::LockError;
pub use manager::{LockBatch, LockMode, LockRequest, SharedLockManager};
