// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! History retention bound for compaction.

use std::time::Duration;

use crate::mvcc::{ActiveReaderRegistry, MvccManager};
use crate::time::HybridTime;

use super::FlushStats;

/// Computes how much history compaction may discard.
///
/// Borrowed from the tablet on demand; holds no state of its own.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy<'a> {
    readers: &'a ActiveReaderRegistry,
    flush_stats: &'a FlushStats,
    mvcc: &'a MvccManager,
    history_retention: Duration,
}

impl<'a> RetentionPolicy<'a> {
    pub fn new(
        readers: &'a ActiveReaderRegistry,
        flush_stats: &'a FlushStats,
        mvcc: &'a MvccManager,
        history_retention: Duration,
    ) -> Self {
        Self {
            readers,
            flush_stats,
            mvcc,
            history_retention,
        }
    }

    /// The newest hybrid time whose older history may be collected.
    ///
    /// Never above the oldest registered reader, the oldest unflushed write,
    /// the MVCC safe time, or `now - history_retention`.
    pub fn safe_read_point(&self) -> HybridTime {
        let retained = self
            .mvcc
            .clock()
            .now()
            .saturating_sub_duration(self.history_retention);

        [
            Some(retained),
            Some(self.mvcc.safe_time()),
            self.readers.oldest(),
            self.flush_stats.oldest_unflushed(),
        ]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(HybridTime::MIN)
    }

    /// The history cutoff already committed by compaction.
    pub fn history_cutoff(&self) -> HybridTime {
        self.readers.history_cutoff()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{HybridClock, MockClock};
    use std::sync::Arc;

    struct Fixture {
        physical: Arc<MockClock>,
        readers: ActiveReaderRegistry,
        flush_stats: FlushStats,
        mvcc: MvccManager,
    }

    impl Fixture {
        fn new() -> Self {
            let physical = Arc::new(MockClock::new(1_000_000));
            let clock = HybridClock::new(physical.clone(), Duration::from_millis(500));
            Self {
                physical,
                readers: ActiveReaderRegistry::new(),
                flush_stats: FlushStats::new(),
                mvcc: MvccManager::new(Arc::new(clock)),
            }
        }

        fn policy(&self, retention: Duration) -> RetentionPolicy<'_> {
            RetentionPolicy::new(&self.readers, &self.flush_stats, &self.mvcc, retention)
        }
    }

    #[test]
    fn test_bounded_by_history_retention() {
        let fixture = Fixture::new();
        let point = fixture.policy(Duration::from_millis(100)).safe_read_point();
        assert_eq!(point, HybridTime::from_micros(900_000));
    }

    #[test]
    fn test_bounded_by_oldest_reader() {
        let fixture = Fixture::new();
        let reader = HybridTime::from_micros(10);
        fixture.readers.register(reader).unwrap();
        assert_eq!(fixture.policy(Duration::ZERO).safe_read_point(), reader);

        fixture.readers.unregister(reader);
        assert!(fixture.policy(Duration::ZERO).safe_read_point() > reader);
    }

    #[test]
    fn test_bounded_by_unflushed_write_and_in_flight() {
        let fixture = Fixture::new();
        let ht = fixture.mvcc.start_operation();
        assert!(fixture.policy(Duration::ZERO).safe_read_point() < ht);

        fixture.mvcc.start_applying(ht);
        fixture.flush_stats.about_to_write(ht);
        fixture.mvcc.commit(ht);
        fixture.physical.advance(Duration::from_secs(1));
        assert_eq!(fixture.policy(Duration::ZERO).safe_read_point(), ht);

        fixture.flush_stats.on_flush_scheduled();
        fixture.flush_stats.on_flush_completed();
        assert!(fixture.policy(Duration::ZERO).safe_read_point() > ht);
    }
}
