// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Shared/exclusive key-range lock manager.
//!
//! Writers lock every key range they touch before asking for a hybrid time.
//! Ranges in one batch are acquired in key order, so two batches over
//! disjoint ranges can only wait on each other in one direction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::storage::KeyRange;

use super::LockError;

/// Lock modes for key ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockMode {
    /// Compatible with other shared holders.
    Shared,
    /// Incompatible with every other holder.
    Exclusive,
}

impl LockMode {
    #[inline]
    fn conflicts_with(self, other: LockMode) -> bool {
        self == LockMode::Exclusive || other == LockMode::Exclusive
    }
}

/// One range to lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    pub range: KeyRange,
    pub mode: LockMode,
}

impl LockRequest {
    pub fn shared(range: KeyRange) -> Self {
        Self {
            range,
            mode: LockMode::Shared,
        }
    }

    pub fn exclusive(range: KeyRange) -> Self {
        Self {
            range,
            mode: LockMode::Exclusive,
        }
    }
}

#[derive(Debug)]
struct HeldLock {
    range: KeyRange,
    mode: LockMode,
    batch_id: u64,
}

#[derive(Debug, Default)]
struct LockTable {
    held: Vec<HeldLock>,
}

impl LockTable {
    fn conflicting(&self, request: &LockRequest, batch_id: u64) -> bool {
        self.held.iter().any(|held| {
            held.batch_id != batch_id
                && held.range.overlaps(&request.range)
                && held.mode.conflicts_with(request.mode)
        })
    }

    fn remove_batch(&mut self, batch_id: u64) -> usize {
        let before = self.held.len();
        self.held.retain(|held| held.batch_id != batch_id);
        before - self.held.len()
    }
}

/// Grants [`LockBatch`]es over key ranges.
#[derive(Debug, Default)]
pub struct SharedLockManager {
    table: Mutex<LockTable>,
    released: Condvar,
    next_batch_id: AtomicU64,
}

impl SharedLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires every request, blocking up to `timeout`.
    ///
    /// On timeout any ranges already taken for this batch are given back
    /// before returning.
    ///
    /// Key order does not rule out cycles between batches whose ranges
    /// nest: a batch holding `[e, f)` shared and wanting `[g, h)` exclusive
    /// and another holding `[a, z)` shared and wanting `[e, f)` exclusive
    /// wait on each other until one of them times out. The table is a
    /// single mutex with one condition variable, so every release wakes
    /// every waiter.
    pub fn lock(&self, requests: Vec<LockRequest>, timeout: Duration) -> Result<LockBatch<'_>, LockError> {
        let requests = normalize(requests);
        let batch_id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
        if requests.is_empty() {
            return Ok(LockBatch::new(self, batch_id, requests));
        }

        let started = Instant::now();
        let deadline = started + timeout;
        let mut table = self.table.lock();

        for request in &requests {
            while table.conflicting(request, batch_id) {
                if self.released.wait_until(&mut table, deadline).timed_out()
                    && table.conflicting(request, batch_id)
                {
                    if table.remove_batch(batch_id) > 0 {
                        self.released.notify_all();
                    }
                    debug!(range = %request.range, mode = ?request.mode, "lock wait timed out");
                    return Err(LockError::TimedOut {
                        range: request.range.clone(),
                        waited: started.elapsed(),
                    });
                }
            }
            table.held.push(HeldLock {
                range: request.range.clone(),
                mode: request.mode,
                batch_id,
            });
        }
        drop(table);

        Ok(LockBatch::new(self, batch_id, requests))
    }

    /// Number of individual ranges currently held across all batches.
    pub fn num_held(&self) -> usize {
        self.table.lock().held.len()
    }

    fn release(&self, batch_id: u64, expected: usize) {
        let removed = self.table.lock().remove_batch(batch_id);
        if removed != expected {
            panic!("lock batch {batch_id} released {removed} ranges, expected {expected}");
        }
        if removed > 0 {
            self.released.notify_all();
        }
    }
}

/// Sorts requests by range and folds duplicates, keeping the stronger mode.
fn normalize(mut requests: Vec<LockRequest>) -> Vec<LockRequest> {
    requests.sort_by(|a, b| a.range.cmp(&b.range).then(b.mode.cmp(&a.mode)));
    requests.dedup_by(|later, earlier| later.range == earlier.range);
    requests
}

/// A set of held key-range locks.
///
/// Released exactly once, either by [`release`](Self::release) or on drop.
#[must_use = "dropping a LockBatch releases its locks"]
pub struct LockBatch<'a> {
    manager: &'a SharedLockManager,
    batch_id: u64,
    requests: Vec<LockRequest>,
    released: bool,
}

impl<'a> LockBatch<'a> {
    fn new(manager: &'a SharedLockManager, batch_id: u64, requests: Vec<LockRequest>) -> Self {
        Self {
            manager,
            batch_id,
            requests,
            released: false,
        }
    }

    /// The ranges held, in acquisition order.
    pub fn requests(&self) -> &[LockRequest] {
        &self.requests
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Releases every range in the batch.
    pub fn release(mut self) {
        self.release_held();
    }

    fn release_held(&mut self) {
        if !self.released {
            self.released = true;
            self.manager.release(self.batch_id, self.requests.len());
        }
    }
}

impl Drop for LockBatch<'_> {
    fn drop(&mut self) {
        self.release_held();
    }
}

impl std::fmt::Debug for LockBatch<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockBatch")
            .field("batch_id", &self.batch_id)
            .field("requests", &self.requests)
            .finish()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn request_strategy() -> impl Strategy<Value = LockRequest> {
        (0u8..10, 1u8..4, any::<bool>()).prop_map(|(start, len, exclusive)| {
            let range = KeyRange::new(vec![start], vec![start + len]).unwrap();
            if exclusive {
                LockRequest::exclusive(range)
            } else {
                LockRequest::shared(range)
            }
        })
    }

    proptest! {
        #[test]
        fn every_acquire_is_released(
            batches in prop::collection::vec(prop::collection::vec(request_strategy(), 0..5), 1..10),
        ) {
            let manager = SharedLockManager::new();
            let mut held = Vec::new();
            for requests in batches {
                match manager.lock(requests, Duration::from_millis(1)) {
                    Ok(batch) => held.push(batch),
                    Err(LockError::TimedOut { .. }) => {}
                }
            }
            let total: usize = held.iter().map(|b| b.requests().len()).sum();
            prop_assert_eq!(manager.num_held(), total);
            drop(held);
            prop_assert_eq!(manager.num_held(), 0);
        }
    }
}
