// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Immutable read boundaries.

use crate::time::HybridTime;

/// The set of writes a read may observe.
///
/// A version is visible when its hybrid time is at or below `bound` and it
/// was not still in flight when the snapshot was captured. Once captured a
/// snapshot never changes, so writes that commit later stay invisible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MvccSnapshot {
    bound: HybridTime,
    in_flight: Vec<HybridTime>, // sorted, all <= bound
}

impl MvccSnapshot {
    /// Creates a snapshot that excludes `in_flight` below `bound`.
    pub fn new(bound: HybridTime, in_flight: impl IntoIterator<Item = HybridTime>) -> Self {
        let mut in_flight: Vec<_> = in_flight.into_iter().filter(|ht| *ht <= bound).collect();
        in_flight.sort_unstable();
        in_flight.dedup();
        Self { bound, in_flight }
    }

    /// A snapshot with nothing excluded below `bound`.
    pub fn clean(bound: HybridTime) -> Self {
        Self {
            bound,
            in_flight: Vec::new(),
        }
    }

    #[inline]
    pub fn bound(&self) -> HybridTime {
        self.bound
    }

    /// Hybrid times excluded even though they are at or below the bound.
    #[inline]
    pub fn in_flight(&self) -> &[HybridTime] {
        &self.in_flight
    }

    /// Returns true if nothing below the bound is excluded.
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Returns true if a version written at `ht` is visible.
    #[inline]
    pub fn is_visible(&self, ht: HybridTime) -> bool {
        ht <= self.bound && self.in_flight.binary_search(&ht).is_err()
    }

    /// The newest time whose history this snapshot may still read: just
    /// below the oldest excluded write, or the bound when clean.
    pub fn history_point(&self) -> HybridTime {
        self.in_flight
            .first()
            .map_or(self.bound, |oldest| oldest.decremented())
    }
}

impl std::fmt::Display for MvccSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "snapshot(<= {}", self.bound)?;
        if !self.in_flight.is_empty() {
            write!(f, ", excluding {} in flight", self.in_flight.len())?;
        }
        write!(f, ")")
    }
}
