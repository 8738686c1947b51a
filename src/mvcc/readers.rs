// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Registry of hybrid times held by live reads.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::time::HybridTime;

use super::{MvccError, MvccSnapshot};

#[derive(Debug, Default)]
struct ReaderState {
    readers: BTreeMap<HybridTime, usize>,
    /// History at or below this time may already be compacted away.
    history_cutoff: HybridTime,
}

/// Reference counts of read hybrid times.
///
/// Compaction never commits a history cutoff above the oldest registered
/// reader, and a reader below the committed cutoff is refused. Both checks
/// happen under one lock.
#[derive(Debug, Default)]
pub struct ActiveReaderRegistry {
    state: Mutex<ReaderState>,
}

impl ActiveReaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a reader at `ht`.
    pub fn register(&self, ht: HybridTime) -> Result<(), MvccError> {
        let mut state = self.state.lock();
        Self::check_cutoff(&state, ht)?;
        *state.readers.entry(ht).or_insert(0) += 1;
        Ok(())
    }

    /// Captures a snapshot and registers its history point under the same
    /// lock, so the cutoff cannot pass it in between. The registered time is
    /// [`MvccSnapshot::history_point`].
    pub fn register_snapshot<F>(&self, capture: F) -> Result<MvccSnapshot, MvccError>
    where
        F: FnOnce() -> MvccSnapshot,
    {
        let mut state = self.state.lock();
        let snapshot = capture();
        let point = snapshot.history_point();
        Self::check_cutoff(&state, point)?;
        *state.readers.entry(point).or_insert(0) += 1;
        Ok(snapshot)
    }

    /// Drops one reference to `ht`. Panics if `ht` is not registered.
    pub fn unregister(&self, ht: HybridTime) {
        let mut state = self.state.lock();
        let Some(count) = state.readers.get_mut(&ht) else {
            panic!("unregister of reader {ht} that was never registered");
        };
        *count -= 1;
        if *count == 0 {
            state.readers.remove(&ht);
        }
    }

    /// The oldest registered read time.
    pub fn oldest(&self) -> Option<HybridTime> {
        self.state.lock().readers.keys().next().copied()
    }

    /// Total number of registered readers.
    pub fn len(&self) -> usize {
        self.state.lock().readers.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().readers.is_empty()
    }

    pub fn history_cutoff(&self) -> HybridTime {
        self.state.lock().history_cutoff
    }

    /// Raises the history cutoff towards `proposed`, capped by the oldest
    /// registered reader. Returns the cutoff now in effect, which never
    /// decreases.
    pub fn commit_history_cutoff(&self, proposed: HybridTime) -> HybridTime {
        let mut state = self.state.lock();
        let capped = match state.readers.keys().next() {
            Some(oldest) => proposed.min(*oldest),
            None => proposed,
        };
        state.history_cutoff = state.history_cutoff.max(capped);
        state.history_cutoff
    }

    fn check_cutoff(state: &ReaderState, ht: HybridTime) -> Result<(), MvccError> {
        if ht < state.history_cutoff {
            return Err(MvccError::SnapshotTooOld {
                requested: ht,
                cutoff: state.history_cutoff,
            });
        }
        Ok(())
    }
}
