// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Reference count of operations using the storage handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

const CLOSING: u64 = 1 << 63;

/// Counts operations in flight against the storage handle.
///
/// The count and the closing flag share one atomic word, so admission and
/// closing cannot interleave: once [`close`](Self::close) returns, no new
/// operation is admitted.
#[derive(Debug, Default)]
pub struct PendingOperationCounter {
    state: AtomicU64,
    drained_lock: Mutex<()>,
    drained: Condvar,
}

impl PendingOperationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits one operation unless the counter is closing.
    pub fn try_begin(&self) -> Option<ScopedPendingOperation<'_>> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current & CLOSING != 0 {
                return None;
            }
            match self.state.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(ScopedPendingOperation { counter: self }),
                Err(actual) => current = actual,
            }
        }
    }

    fn finish(&self) {
        let previous = self.state.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous & !CLOSING > 0, "pending operation count underflow");
        if previous & !CLOSING == 1 {
            let _guard = self.drained_lock.lock();
            self.drained.notify_all();
        }
    }

    /// Refuses all further operations.
    pub fn close(&self) {
        self.state.fetch_or(CLOSING, Ordering::AcqRel);
    }

    pub fn is_closing(&self) -> bool {
        self.state.load(Ordering::Acquire) & CLOSING != 0
    }

    /// Number of operations currently admitted.
    pub fn count(&self) -> u64 {
        self.state.load(Ordering::Acquire) & !CLOSING
    }

    /// Waits up to `timeout` for the count to reach zero.
    pub fn wait_for_ops_to_finish(&self, timeout: Duration) -> bool {
        let mut guard = self.drained_lock.lock();
        if self.count() == 0 {
            return true;
        }
        let _ = self.drained.wait_for(&mut guard, timeout);
        self.count() == 0
    }
}

/// One admitted operation; finishes on drop.
#[must_use = "dropping the guard ends the operation"]
#[derive(Debug)]
pub struct ScopedPendingOperation<'a> {
    counter: &'a PendingOperationCounter,
}

impl Drop for ScopedPendingOperation<'_> {
    fn drop(&mut self) {
        self.counter.finish();
    }
}
