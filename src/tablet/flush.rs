// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Flush bookkeeping.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::time::HybridTime;

const NONE: u64 = u64::MAX;

/// How [`Tablet::flush`](super::Tablet::flush) behaves when another flush
/// is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Wait for the running flush, then flush again.
    #[default]
    Sync,
    /// Return immediately with [`FlushOutcome::AlreadyInProgress`].
    Async,
}

/// Result of a flush request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Flushed,
    AlreadyInProgress,
}

/// Tracks the oldest write not yet persisted by a flush.
///
/// Writers report after their batch reaches storage. A flush moves the
/// current marker aside when it is scheduled and drops it only once the
/// flush completes, so the oldest unflushed write is never understated.
#[derive(Debug)]
pub struct FlushStats {
    oldest_in_memstore: AtomicU64,
    oldest_flushing: AtomicU64,
    num_flushes: AtomicU64,
}

impl Default for FlushStats {
    fn default() -> Self {
        Self {
            oldest_in_memstore: AtomicU64::new(NONE),
            oldest_flushing: AtomicU64::new(NONE),
            num_flushes: AtomicU64::new(0),
        }
    }
}

impl FlushStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a write at `ht` that is not yet flushed.
    #[inline]
    pub fn about_to_write(&self, ht: HybridTime) {
        self.oldest_in_memstore
            .fetch_min(ht.to_u64(), Ordering::AcqRel);
    }

    /// Called when a flush is about to start.
    pub fn on_flush_scheduled(&self) {
        // Publish the marker as flushing before clearing it, so a concurrent
        // reader never sees both slots empty.
        let current = self.oldest_in_memstore.load(Ordering::SeqCst);
        self.oldest_flushing.store(current, Ordering::SeqCst);
        let oldest = self.oldest_in_memstore.swap(NONE, Ordering::SeqCst);
        self.oldest_flushing.fetch_min(oldest, Ordering::SeqCst);
        self.num_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_flush_completed(&self) {
        self.oldest_flushing.store(NONE, Ordering::Release);
    }

    /// Puts the marker of a failed flush back.
    pub fn on_flush_failed(&self) {
        let oldest = self.oldest_flushing.swap(NONE, Ordering::AcqRel);
        self.oldest_in_memstore.fetch_min(oldest, Ordering::AcqRel);
    }

    /// The hybrid time of the oldest write not yet durably flushed.
    pub fn oldest_unflushed(&self) -> Option<HybridTime> {
        let oldest = self
            .oldest_in_memstore
            .load(Ordering::SeqCst)
            .min(self.oldest_flushing.load(Ordering::SeqCst));
        (oldest != NONE).then(|| HybridTime::from_u64(oldest))
    }

    /// Number of flushes scheduled so far.
    pub fn num_flushes(&self) -> u64 {
        self.num_flushes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ht(micros: u64) -> HybridTime {
        HybridTime::from_micros(micros)
    }

    #[test]
    fn test_tracks_oldest_write() {
        let stats = FlushStats::new();
        assert_eq!(stats.oldest_unflushed(), None);
        stats.about_to_write(ht(30));
        stats.about_to_write(ht(10));
        stats.about_to_write(ht(20));
        assert_eq!(stats.oldest_unflushed(), Some(ht(10)));
    }

    #[test]
    fn test_marker_held_until_flush_completes() {
        let stats = FlushStats::new();
        stats.about_to_write(ht(10));

        stats.on_flush_scheduled();
        assert_eq!(stats.num_flushes(), 1);
        assert_eq!(stats.oldest_unflushed(), Some(ht(10)));

        stats.about_to_write(ht(50));
        assert_eq!(stats.oldest_unflushed(), Some(ht(10)));

        stats.on_flush_completed();
        assert_eq!(stats.oldest_unflushed(), Some(ht(50)));
    }

    #[test]
    fn test_failed_flush_restores_marker() {
        let stats = FlushStats::new();
        stats.about_to_write(ht(10));
        stats.on_flush_scheduled();
        stats.about_to_write(ht(40));
        stats.on_flush_failed();
        assert_eq!(stats.oldest_unflushed(), Some(ht(10)));

        stats.on_flush_scheduled();
        stats.on_flush_completed();
        assert_eq!(stats.oldest_unflushed(), None);
    }
}
