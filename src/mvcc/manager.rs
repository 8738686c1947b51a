// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Tracks in-flight write hybrid times and hands out snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::time::{Clock, HybridTime};

use super::{MvccError, MvccSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpState {
    /// Hybrid time issued; the write has not reached storage.
    Reserved,
    /// The write batch has been handed to storage.
    Applying,
}

#[derive(Debug)]
struct MvccState {
    in_flight: BTreeMap<HybridTime, OpState>,
    /// Largest hybrid time handed to a writer or used as a snapshot bound.
    /// No write may start at or below it.
    last_issued: HybridTime,
}

/// The MVCC manager for one tablet.
///
/// Writers call [`start_operation`](Self::start_operation) while holding
/// their key locks, then either [`start_applying`](Self::start_applying)
/// followed by [`commit`](Self::commit), or [`abort`](Self::abort).
/// Calling any of these with a hybrid time the manager never issued is a
/// contract violation and panics.
pub struct MvccManager {
    clock: Arc<dyn Clock>,
    state: Mutex<MvccState>,
    finished: Condvar,
}

impl MvccManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(MvccState {
                in_flight: BTreeMap::new(),
                last_issued: HybridTime::MIN,
            }),
            finished: Condvar::new(),
        }
    }

    /// Issues a fresh hybrid time and registers it as in flight.
    pub fn start_operation(&self) -> HybridTime {
        let mut state = self.state.lock();
        let ht = self.clock.now();
        debug_assert!(ht > state.last_issued, "clock went backwards: {ht} <= {}", state.last_issued);
        state.in_flight.insert(ht, OpState::Reserved);
        state.last_issued = ht;
        ht
    }

    /// Registers an externally chosen hybrid time, as during log replay.
    pub fn start_operation_at(&self, ht: HybridTime) -> Result<(), MvccError> {
        let mut state = self.state.lock();
        if ht <= state.last_issued {
            return Err(MvccError::TimestampTooOld {
                requested: ht,
                last_issued: state.last_issued,
            });
        }
        self.clock.update(ht);
        state.in_flight.insert(ht, OpState::Reserved);
        state.last_issued = ht;
        Ok(())
    }

    /// Marks an operation as submitted to storage. It can no longer abort
    /// except on a storage failure.
    pub fn start_applying(&self, ht: HybridTime) {
        let mut state = self.state.lock();
        match state.in_flight.get_mut(&ht) {
            Some(op @ OpState::Reserved) => *op = OpState::Applying,
            Some(OpState::Applying) => panic!("operation at {ht} is already applying"),
            None => panic!("start_applying for unknown hybrid time {ht}"),
        }
    }

    /// Commits an applying operation.
    pub fn commit(&self, ht: HybridTime) {
        let mut state = self.state.lock();
        match state.in_flight.remove(&ht) {
            Some(OpState::Applying) => {}
            Some(OpState::Reserved) => panic!("commit of {ht} before it started applying"),
            None => panic!("commit of unknown hybrid time {ht}"),
        }
        self.finished.notify_all();
    }

    /// Retracts an in-flight operation without making it visible.
    pub fn abort(&self, ht: HybridTime) {
        let mut state = self.state.lock();
        if state.in_flight.remove(&ht).is_none() {
            panic!("abort of unknown hybrid time {ht}");
        }
        self.finished.notify_all();
    }

    /// Captures a snapshot at the current time.
    pub fn capture_snapshot(&self) -> MvccSnapshot {
        let mut state = self.state.lock();
        let bound = self.clock.now();
        state.last_issued = bound;
        MvccSnapshot::new(bound, state.in_flight.keys().copied())
    }

    /// Captures a snapshot at a caller-chosen time.
    ///
    /// The clock is moved past `ht` first, so no write started afterwards
    /// can land at or below the bound.
    pub fn snapshot_at(&self, ht: HybridTime) -> MvccSnapshot {
        self.clock.update(ht);
        let mut state = self.state.lock();
        state.last_issued = state.last_issued.max(ht);
        MvccSnapshot::new(ht, state.in_flight.range(..=ht).map(|(ht, _)| *ht))
    }

    /// Moves the clock past `ht`, then waits until no write at or below it
    /// is in flight. Returns false if `deadline` passes first.
    ///
    /// Two reads at the same hybrid time see the same data only once this
    /// has returned true.
    pub fn wait_for_safe_time(&self, ht: HybridTime, deadline: Instant) -> bool {
        self.clock.update(ht);
        let mut state = self.state.lock();
        state.last_issued = state.last_issued.max(ht);
        let blocked = |state: &MvccState| state.in_flight.keys().next().is_some_and(|oldest| *oldest <= ht);
        while blocked(&*state) {
            if self.finished.wait_until(&mut state, deadline).timed_out() {
                return !blocked(&*state);
            }
        }
        true
    }

    /// The largest hybrid time at or below which every write has finished.
    ///
    /// With nothing in flight this is the current time, and no later write
    /// may start at or below it.
    pub fn safe_time(&self) -> HybridTime {
        let mut state = self.state.lock();
        match state.in_flight.keys().next() {
            Some(oldest) => oldest.decremented(),
            None => {
                let now = self.clock.now();
                state.last_issued = now;
                now
            }
        }
    }

    /// The oldest in-flight hybrid time, if any.
    pub fn oldest_in_flight(&self) -> Option<HybridTime> {
        self.state.lock().in_flight.keys().next().copied()
    }

    pub fn num_in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    pub fn last_issued(&self) -> HybridTime {
        self.state.lock().last_issued
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

impl std::fmt::Debug for MvccManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MvccManager")
            .field("in_flight", &state.in_flight.len())
            .field("last_issued", &state.last_issued)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{HybridClock, MockClock};
    use std::time::Duration;

    fn manager() -> (Arc<MockClock>, MvccManager) {
        let physical = Arc::new(MockClock::new(1_000));
        let clock = HybridClock::new(physical.clone(), Duration::from_millis(500));
        (physical, MvccManager::new(Arc::new(clock)))
    }

    #[test]
    fn test_start_commit() {
        let (_, mvcc) = manager();
        let ht = mvcc.start_operation();
        assert_eq!(mvcc.num_in_flight(), 1);
        assert_eq!(mvcc.safe_time(), ht.decremented());

        mvcc.start_applying(ht);
        mvcc.commit(ht);
        assert_eq!(mvcc.num_in_flight(), 0);
        assert!(mvcc.safe_time() >= ht);
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let (_, mvcc) = manager();
        let a = mvcc.start_operation();
        let b = mvcc.start_operation();
        let c = mvcc.start_operation();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_safe_time_waits_for_oldest() {
        let (_, mvcc) = manager();
        let a = mvcc.start_operation();
        let b = mvcc.start_operation();

        mvcc.start_applying(b);
        mvcc.commit(b);
        assert_eq!(mvcc.safe_time(), a.decremented());

        mvcc.abort(a);
        assert!(mvcc.safe_time() >= b);
    }

    #[test]
    fn test_snapshot_excludes_in_flight() {
        let (_, mvcc) = manager();
        let a = mvcc.start_operation();
        let b = mvcc.start_operation();
        mvcc.start_applying(b);
        mvcc.commit(b);

        let snapshot = mvcc.capture_snapshot();
        assert!(snapshot.bound() > b);
        assert!(!snapshot.is_visible(a));
        assert!(snapshot.is_visible(b));

        mvcc.start_applying(a);
        mvcc.commit(a);
        assert!(!snapshot.is_visible(a), "snapshot must not change after capture");

        let later = mvcc.start_operation();
        assert!(later > snapshot.bound());
        mvcc.abort(later);
    }

    #[test]
    fn test_snapshot_at_pushes_clock() {
        let (_, mvcc) = manager();
        let future = HybridTime::from_micros(50_000);
        let snapshot = mvcc.snapshot_at(future);
        assert_eq!(snapshot.bound(), future);
        assert!(mvcc.start_operation() > future);
    }

    #[test]
    fn test_start_operation_at() {
        let (_, mvcc) = manager();
        let replay = HybridTime::from_micros(9_000);
        mvcc.start_operation_at(replay).unwrap();
        assert_eq!(mvcc.oldest_in_flight(), Some(replay));
        mvcc.start_applying(replay);
        mvcc.commit(replay);

        let err = mvcc.start_operation_at(replay).unwrap_err();
        assert!(matches!(err, MvccError::TimestampTooOld { .. }));
        assert!(mvcc.start_operation() > replay);
    }

    #[test]
    fn test_replay_below_snapshot_rejected() {
        let (_, mvcc) = manager();
        let snapshot = mvcc.capture_snapshot();
        let result = mvcc.start_operation_at(snapshot.bound());
        assert!(result.is_err());
    }

    #[test]
    fn test_wait_for_safe_time() {
        let (_, mvcc) = manager();
        let mvcc = Arc::new(mvcc);
        let ht = mvcc.start_operation();
        let target = ht.incremented();

        let deadline = Instant::now() + std::time::Duration::from_millis(10);
        assert!(!mvcc.wait_for_safe_time(target, deadline));

        let waiter = {
            let mvcc = Arc::clone(&mvcc);
            std::thread::spawn(move || {
                mvcc.wait_for_safe_time(target, Instant::now() + std::time::Duration::from_secs(5))
            })
        };
        mvcc.start_applying(ht);
        mvcc.commit(ht);
        assert!(waiter.join().unwrap());
        assert!(mvcc.start_operation() > target);
    }

    #[test]
    #[should_panic(expected = "unknown hybrid time")]
    fn test_commit_unknown_panics() {
        let (_, mvcc) = manager();
        mvcc.commit(HybridTime::from_micros(5));
    }

    #[test]
    #[should_panic(expected = "before it started applying")]
    fn test_commit_without_applying_panics() {
        let (_, mvcc) = manager();
        let ht = mvcc.start_operation();
        mvcc.commit(ht);
    }

    #[test]
    #[should_panic(expected = "unknown hybrid time")]
    fn test_double_abort_panics() {
        let (_, mvcc) = manager();
        let ht = mvcc.start_operation();
        mvcc.abort(ht);
        mvcc.abort(ht);
    }

    #[test]
    fn test_concurrent_operations() {
        let (_, mvcc) = manager();
        let mvcc = Arc::new(mvcc);

        std::thread::scope(|s| {
            for _ in 0..8 {
                let mvcc = &mvcc;
                s.spawn(move || {
                    for i in 0..200 {
                        let ht = mvcc.start_operation();
                        if i % 3 == 0 {
                            mvcc.abort(ht);
                        } else {
                            mvcc.start_applying(ht);
                            mvcc.commit(ht);
                        }
                    }
                });
            }
        });

        assert_eq!(mvcc.num_in_flight(), 0);
        assert_eq!(mvcc.safe_time(), mvcc.last_issued());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::time::HybridClock;
    use proptest::prelude::*;

    proptest! {
        /// A snapshot sees exactly the writes committed before it was taken.
        #[test]
        fn snapshot_sees_committed_prefix(actions in prop::collection::vec(0u8..3, 1..60)) {
            let mvcc = MvccManager::new(Arc::new(HybridClock::default()));
            let mut open = Vec::new();
            let mut committed = Vec::new();

            for action in actions {
                match action {
                    0 => open.push(mvcc.start_operation()),
                    1 if !open.is_empty() => {
                        let ht = open.remove(0);
                        mvcc.start_applying(ht);
                        mvcc.commit(ht);
                        committed.push(ht);
                    }
                    _ if !open.is_empty() => {
                        let ht = open.pop().unwrap();
                        mvcc.abort(ht);
                    }
                    _ => {}
                }
            }

            let snapshot = mvcc.capture_snapshot();
            for ht in &committed {
                prop_assert!(snapshot.is_visible(*ht));
            }
            for ht in &open {
                prop_assert!(!snapshot.is_visible(*ht));
            }
            prop_assert!(mvcc.safe_time() < open.iter().min().copied().unwrap_or(HybridTime::MAX));
        }
    }
}
