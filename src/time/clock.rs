// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Hybrid logical clock.
//!
//! Combines a physical microsecond clock with a logical counter so that every
//! `now()` is strictly greater than anything previously returned or observed,
//! even when the physical clock stalls or steps backwards.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::warn;

use super::HybridTime;

/// Source of physical time in microseconds since the Unix epoch.
pub trait PhysicalClock: Send + Sync {
    fn now_micros(&self) -> u64;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct WallClock;

impl PhysicalClock for WallClock {
    fn now_micros(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }
}

/// A manually driven physical clock for tests and simulations.
#[derive(Debug, Default)]
pub struct MockClock {
    micros: AtomicU64,
}

impl MockClock {
    pub fn new(micros: u64) -> Self {
        Self {
            micros: AtomicU64::new(micros),
        }
    }

    pub fn set_micros(&self, micros: u64) {
        self.micros.store(micros, Ordering::Release);
    }

    pub fn advance(&self, delta: Duration) {
        self.micros
            .fetch_add(delta.as_micros() as u64, Ordering::AcqRel);
    }
}

impl PhysicalClock for MockClock {
    fn now_micros(&self) -> u64 {
        self.micros.load(Ordering::Acquire)
    }
}

/// The clock abstraction consumed by the tablet.
///
/// Handles are injected explicitly so several tablets in one process can use
/// independent clocks.
pub trait Clock: Send + Sync {
    /// Returns a hybrid time strictly greater than every value previously
    /// returned by `now()` and every value passed to `update()`.
    ///
    /// Lock-free; safe to call from any number of threads.
    fn now(&self) -> HybridTime;

    /// Incorporates a hybrid time observed elsewhere (a leader, a replayed
    /// log entry, a persisted frontier).
    fn update(&self, observed: HybridTime);
}

/// Hybrid logical clock over an injectable physical clock.
pub struct HybridClock {
    last: AtomicU64,
    physical: Arc<dyn PhysicalClock>,
    max_clock_skew: Duration,
}

impl HybridClock {
    /// Creates a clock reading the given physical source.
    ///
    /// `max_clock_skew` only affects diagnostics: observed times further than
    /// this ahead of local physical time are still accepted but logged.
    pub fn new(physical: Arc<dyn PhysicalClock>, max_clock_skew: Duration) -> Self {
        Self {
            last: AtomicU64::new(0),
            physical,
            max_clock_skew,
        }
    }

    /// Creates a clock driven by the system wall clock.
    pub fn wall(max_clock_skew: Duration) -> Self {
        Self::new(Arc::new(WallClock), max_clock_skew)
    }

    #[inline]
    fn physical_now(&self) -> HybridTime {
        HybridTime::from_micros(self.physical.now_micros())
    }
}

impl Default for HybridClock {
    fn default() -> Self {
        Self::wall(Duration::from_millis(500))
    }
}

impl std::fmt::Debug for HybridClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridClock")
            .field("last", &HybridTime::from_u64(self.last.load(Ordering::Relaxed)))
            .field("max_clock_skew", &self.max_clock_skew)
            .finish()
    }
}

impl Clock for HybridClock {
    fn now(&self) -> HybridTime {
        loop {
            let physical = self.physical_now().to_u64();
            let last = self.last.load(Ordering::Acquire);
            let new_ht = physical.max(last.saturating_add(1));

            match self
                .last
                .compare_exchange(last, new_ht, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return HybridTime::from_u64(new_ht),
                Err(_) => continue,
            }
        }
    }

    fn update(&self, observed: HybridTime) {
        let ahead_limit = self.physical_now().saturating_add_duration(self.max_clock_skew);
        if observed > ahead_limit && observed != HybridTime::MAX {
            warn!(
                observed = %observed,
                limit = %ahead_limit,
                "observed hybrid time is beyond the maximum clock skew"
            );
        }
        self.last.fetch_max(observed.to_u64(), Ordering::AcqRel);
    }
}
