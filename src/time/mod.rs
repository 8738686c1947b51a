// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Hybrid time and the clock that issues it.
//!
//! Every write is versioned with a [`HybridTime`] and every read snapshot is
//! bounded by one. The [`Clock`] is passed to a tablet explicitly; the
//! default implementation is a lock-free [`HybridClock`].
//!
//! # Example
//!
//! ```
//! use tabletkv::time::{Clock, HybridClock, HybridTime};
//!
//! let clock = HybridClock::default();
//! let t1 = clock.now();
//! clock.update(HybridTime::from_micros(t1.physical_micros() + 10));
//! let t2 = clock.now();
//! assert!(t2 > t1);
//! ```

mod clock;
mod hybrid_time;

pub use clock::{Clock, HybridClock, MockClock, PhysicalClock, WallClock};
pub use hybrid_time::{HybridTime, LOGICAL_BITS};
