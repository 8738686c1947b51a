// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Hybrid time: a physical microsecond clock reading with a logical counter
//! packed into a single totally ordered `u64`.

use std::time::Duration;

/// Number of low bits reserved for the logical counter.
pub const LOGICAL_BITS: u32 = 12;

const LOGICAL_MASK: u64 = (1 << LOGICAL_BITS) - 1;

/// A totally ordered logical timestamp.
///
/// Layout: `[physical micros : 52][logical : 12]`. Comparing the raw values
/// compares physical time first and breaks ties with the logical counter,
/// so the derived `Ord` is the hybrid-time order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HybridTime(u64);

impl HybridTime {
    /// The smallest hybrid time. Nothing is ever written at `MIN`.
    pub const MIN: HybridTime = HybridTime(0);

    /// The largest hybrid time, used as "infinite" / "nothing pending".
    pub const MAX: HybridTime = HybridTime(u64::MAX);

    /// Wraps a raw encoded value.
    #[inline]
    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    /// Builds a hybrid time from physical microseconds and a logical counter.
    ///
    /// # Panics
    ///
    /// Panics in debug mode if `logical` does not fit in [`LOGICAL_BITS`].
    #[inline]
    pub fn from_micros_and_logical(micros: u64, logical: u64) -> Self {
        debug_assert!(logical <= LOGICAL_MASK, "logical component overflow");
        Self((micros << LOGICAL_BITS) | (logical & LOGICAL_MASK))
    }

    /// Builds a hybrid time with a zero logical component.
    #[inline]
    pub fn from_micros(micros: u64) -> Self {
        Self::from_micros_and_logical(micros, 0)
    }

    /// Returns the raw encoded value.
    #[inline]
    pub const fn to_u64(self) -> u64 {
        self.0
    }

    /// Returns the physical component in microseconds since the Unix epoch.
    #[inline]
    pub fn physical_micros(self) -> u64 {
        self.0 >> LOGICAL_BITS
    }

    /// Returns the logical component.
    #[inline]
    pub fn logical(self) -> u64 {
        self.0 & LOGICAL_MASK
    }

    /// Returns the next representable hybrid time.
    #[inline]
    pub fn incremented(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the previous representable hybrid time.
    #[inline]
    pub fn decremented(self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    /// Moves the physical component back by `delta`, clearing the logical part.
    ///
    /// Saturates at [`HybridTime::MIN`].
    pub fn saturating_sub_duration(self, delta: Duration) -> Self {
        let micros = u64::try_from(delta.as_micros()).unwrap_or(u64::MAX);
        Self::from_micros(self.physical_micros().saturating_sub(micros))
    }

    /// Moves the physical component forward by `delta`, clearing the logical part.
    ///
    /// Saturates at the largest physical value.
    pub fn saturating_add_duration(self, delta: Duration) -> Self {
        let micros = u64::try_from(delta.as_micros()).unwrap_or(u64::MAX);
        let physical = self
            .physical_micros()
            .saturating_add(micros)
            .min(u64::MAX >> LOGICAL_BITS);
        Self::from_micros(physical)
    }

    /// Big-endian encoding, which sorts in hybrid-time order.
    #[inline]
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Decodes the big-endian form produced by [`HybridTime::to_be_bytes`].
    #[inline]
    pub fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }
}

impl std::fmt::Display for HybridTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            HybridTime::MAX => write!(f, "<max>"),
            HybridTime::MIN => write!(f, "<min>"),
            ht => write!(
                f,
                "{{ physical: {} logical: {} }}",
                ht.physical_micros(),
                ht.logical()
            ),
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn order_matches_component_order(
            a_phys in 0u64..(1 << 40),
            a_log in 0u64..=LOGICAL_MASK,
            b_phys in 0u64..(1 << 40),
            b_log in 0u64..=LOGICAL_MASK,
        ) {
            let a = HybridTime::from_micros_and_logical(a_phys, a_log);
            let b = HybridTime::from_micros_and_logical(b_phys, b_log);
            prop_assert_eq!(a.cmp(&b), (a_phys, a_log).cmp(&(b_phys, b_log)));
        }

        #[test]
        fn be_bytes_preserve_order(a in any::<u64>(), b in any::<u64>()) {
            let (a, b) = (HybridTime::from_u64(a), HybridTime::from_u64(b));
            prop_assert_eq!(a.to_be_bytes().cmp(&b.to_be_bytes()), a.cmp(&b));
            prop_assert_eq!(HybridTime::from_be_bytes(a.to_be_bytes()), a);
        }
    }
}
