// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The read pipeline.
//!
//! A read registers its hybrid time with the active-reader registry for as
//! long as it runs, captures an MVCC snapshot and resolves each key to the
//! newest version that snapshot may see.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::mvcc::{ActiveReaderRegistry, MvccManager, MvccSnapshot};
use crate::storage::{
    IteratorOptions, Key, KeyRange, StorageEngine, StorageError, StorageIterator, Value,
};
use crate::time::HybridTime;

use super::{ScopedPendingOperation, Tablet, TabletError, TabletState, TransactionContext};

/// A row as returned by reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub key: Key,
    pub value: Value,
    /// When the version was written; `None` for the reading transaction's
    /// own provisional writes.
    pub hybrid_time: Option<HybridTime>,
}

/// Order in which rows are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderMode {
    /// Storage order, with a transaction's own new keys delivered last.
    #[default]
    Unordered,
    /// Strict primary-key order.
    Ordered,
}

/// Options for a read.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// `None` reads at the current time.
    pub read_time: Option<HybridTime>,
    pub order: OrderMode,
    /// `None` reads the whole tablet.
    pub range: Option<KeyRange>,
    pub transaction: Option<TransactionContext>,
}

impl ReadOptions {
    pub fn at(mut self, read_time: HybridTime) -> Self {
        self.read_time = Some(read_time);
        self
    }

    pub fn ordered(mut self) -> Self {
        self.order = OrderMode::Ordered;
        self
    }

    pub fn with_range(mut self, range: KeyRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_transaction(mut self, transaction: TransactionContext) -> Self {
        self.transaction = Some(transaction);
        self
    }
}

/// A read's registration and snapshot.
///
/// Unregisters from the tablet's reader registry exactly once, on drop.
#[must_use = "dropping the read operation unregisters the reader"]
pub struct ScopedReadOperation<'a> {
    readers: &'a ActiveReaderRegistry,
    registered_at: HybridTime,
    snapshot: MvccSnapshot,
    _pending: ScopedPendingOperation<'a>,
}

impl<'a> ScopedReadOperation<'a> {
    fn capture(
        readers: &'a ActiveReaderRegistry,
        mvcc: &MvccManager,
        read_time: Option<HybridTime>,
        safe_time_wait: Duration,
        pending: ScopedPendingOperation<'a>,
    ) -> Result<Self, TabletError> {
        match read_time {
            None => {
                let snapshot = readers.register_snapshot(|| mvcc.capture_snapshot())?;
                Ok(Self {
                    readers,
                    registered_at: snapshot.history_point(),
                    snapshot,
                    _pending: pending,
                })
            }
            Some(ht) => {
                readers.register(ht)?;
                let mut read = Self {
                    readers,
                    registered_at: ht,
                    snapshot: MvccSnapshot::clean(ht),
                    _pending: pending,
                };
                if !mvcc.wait_for_safe_time(ht, Instant::now() + safe_time_wait) {
                    return Err(TabletError::TimedOut(format!(
                        "writes at or below {ht} still in flight after {safe_time_wait:?}"
                    )));
                }
                read.snapshot = mvcc.snapshot_at(ht);
                Ok(read)
            }
        }
    }

    pub fn read_time(&self) -> HybridTime {
        self.snapshot.bound()
    }

    pub fn snapshot(&self) -> &MvccSnapshot {
        &self.snapshot
    }
}

impl Drop for ScopedReadOperation<'_> {
    fn drop(&mut self) {
        self.readers.unregister(self.registered_at);
    }
}

impl std::fmt::Debug for ScopedReadOperation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedReadOperation")
            .field("registered_at", &self.registered_at)
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

/// Resolves stored versions to the live row each key has under a snapshot.
pub(crate) struct VisibleVersions {
    versions: StorageIterator,
    snapshot: MvccSnapshot,
    resolved: Option<Key>,
}

impl VisibleVersions {
    pub(crate) fn new(versions: StorageIterator, snapshot: MvccSnapshot) -> Self {
        Self {
            versions,
            snapshot,
            resolved: None,
        }
    }
}

impl Iterator for VisibleVersions {
    type Item = Result<Row, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.versions.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };
            if self.resolved.as_ref() == Some(&entry.key) || !self.snapshot.is_visible(entry.hybrid_time) {
                continue;
            }
            // Versions are newest first: the first visible one decides.
            self.resolved = Some(entry.key.clone());
            if let Some(value) = entry.value {
                return Some(Ok(Row {
                    key: entry.key,
                    value,
                    hybrid_time: Some(entry.hybrid_time),
                }));
            }
        }
    }
}

/// Cursor over the rows of a read.
///
/// Positioned on the first row when created; `current` is `None` once done.
pub trait RowIterator {
    /// Moves to the next row.
    fn advance(&mut self) -> Result<(), TabletError>;

    fn current(&self) -> Option<&Row>;

    fn done(&self) -> bool {
        self.current().is_none()
    }
}

type Overlay = BTreeMap<Key, Option<Value>>;

/// Rows in storage order; provisional writes replace stored values in place
/// and new provisional keys follow the stored rows.
pub struct UnorderedRowIterator<'a> {
    _read: ScopedReadOperation<'a>,
    rows: VisibleVersions,
    overlay: Overlay,
    current: Option<Row>,
}

impl<'a> UnorderedRowIterator<'a> {
    fn new(read: ScopedReadOperation<'a>, rows: VisibleVersions, overlay: Overlay) -> Result<Self, TabletError> {
        let mut iter = Self {
            _read: read,
            rows,
            overlay,
            current: None,
        };
        iter.advance()?;
        Ok(iter)
    }
}

impl RowIterator for UnorderedRowIterator<'_> {
    fn advance(&mut self) -> Result<(), TabletError> {
        self.current = None;
        for row in self.rows.by_ref() {
            let row = row?;
            match self.overlay.remove(&row.key) {
                None => {
                    self.current = Some(row);
                    return Ok(());
                }
                Some(Some(value)) => {
                    self.current = Some(Row {
                        key: row.key,
                        value,
                        hybrid_time: None,
                    });
                    return Ok(());
                }
                Some(None) => continue,
            }
        }
        while let Some((key, value)) = self.overlay.pop_first() {
            if let Some(value) = value {
                self.current = Some(Row {
                    key,
                    value,
                    hybrid_time: None,
                });
                return Ok(());
            }
        }
        Ok(())
    }

    fn current(&self) -> Option<&Row> {
        self.current.as_ref()
    }
}

/// Rows in key order, merging provisional writes with stored rows.
pub struct OrderedRowIterator<'a> {
    _read: ScopedReadOperation<'a>,
    rows: VisibleVersions,
    next_stored: Option<Row>,
    stored_exhausted: bool,
    overlay: Overlay,
    current: Option<Row>,
}

impl<'a> OrderedRowIterator<'a> {
    fn new(read: ScopedReadOperation<'a>, rows: VisibleVersions, overlay: Overlay) -> Result<Self, TabletError> {
        let mut iter = Self {
            _read: read,
            rows,
            next_stored: None,
            stored_exhausted: false,
            overlay,
            current: None,
        };
        iter.advance()?;
        Ok(iter)
    }

    fn fill_stored(&mut self) -> Result<(), TabletError> {
        if self.next_stored.is_none() && !self.stored_exhausted {
            match self.rows.next() {
                Some(row) => self.next_stored = Some(row?),
                None => self.stored_exhausted = true,
            }
        }
        Ok(())
    }
}

impl RowIterator for OrderedRowIterator<'_> {
    fn advance(&mut self) -> Result<(), TabletError> {
        self.current = None;
        loop {
            self.fill_stored()?;
            let take_overlay = match (&self.next_stored, self.overlay.first_key_value()) {
                (None, None) => return Ok(()),
                (Some(_), None) => false,
                (None, Some(_)) => true,
                (Some(stored), Some((key, _))) => key <= &stored.key,
            };

            if !take_overlay {
                self.current = self.next_stored.take();
                return Ok(());
            }

            let Some((key, value)) = self.overlay.pop_first() else {
                continue;
            };
            if self.next_stored.as_ref().is_some_and(|stored| stored.key == key) {
                self.next_stored = None;
            }
            if let Some(value) = value {
                self.current = Some(Row {
                    key,
                    value,
                    hybrid_time: None,
                });
                return Ok(());
            }
        }
    }

    fn current(&self) -> Option<&Row> {
        self.current.as_ref()
    }
}

/// The iterator a tablet read hands out, chosen by [`OrderMode`].
pub enum TabletRowIterator<'a> {
    Unordered(UnorderedRowIterator<'a>),
    Ordered(OrderedRowIterator<'a>),
}

impl RowIterator for TabletRowIterator<'_> {
    fn advance(&mut self) -> Result<(), TabletError> {
        match self {
            TabletRowIterator::Unordered(iter) => iter.advance(),
            TabletRowIterator::Ordered(iter) => iter.advance(),
        }
    }

    fn current(&self) -> Option<&Row> {
        match self {
            TabletRowIterator::Unordered(iter) => iter.current(),
            TabletRowIterator::Ordered(iter) => iter.current(),
        }
    }
}

impl<S: StorageEngine> Tablet<S> {
    /// Registers a reader and captures its snapshot.
    ///
    /// `None` reads at the current time. An explicit time waits for older
    /// writes to finish so that repeated reads at it agree.
    pub fn scoped_read_operation(
        &self,
        read_time: Option<HybridTime>,
    ) -> Result<ScopedReadOperation<'_>, TabletError> {
        let pending = self.begin_operation(&[TabletState::Open])?;
        if let Some(ht) = read_time {
            let limit = self
                .clock
                .now()
                .saturating_add_duration(self.options.max_clock_skew);
            if ht > limit {
                return Err(TabletError::InvalidArgument(format!(
                    "read time {ht} is beyond the clock skew limit {limit}"
                )));
            }
        }
        ScopedReadOperation::capture(
            &self.readers,
            &self.mvcc,
            read_time,
            self.options.safe_time_wait_timeout,
            pending,
        )
    }

    /// Starts a read. The reader stays registered until the iterator drops.
    ///
    /// Reads inside a transaction default to its start time and see its
    /// provisional writes.
    pub fn new_row_iterator(&self, options: ReadOptions) -> Result<TabletRowIterator<'_>, TabletError> {
        let read_time = options
            .read_time
            .or_else(|| options.transaction.as_ref().map(|t| t.metadata().start_time));
        let read = self.scoped_read_operation(read_time)?;

        let versions = self.storage()?.new_iterator(
            IteratorOptions::new(read.read_time()).with_range(options.range.clone()),
        )?;
        let rows = VisibleVersions::new(versions, read.snapshot().clone());
        let overlay = options
            .transaction
            .as_ref()
            .map(|transaction| transaction.overlay(options.range.as_ref()))
            .unwrap_or_default();

        match options.order {
            OrderMode::Unordered => {
                UnorderedRowIterator::new(read, rows, overlay).map(TabletRowIterator::Unordered)
            }
            OrderMode::Ordered => {
                OrderedRowIterator::new(read, rows, overlay).map(TabletRowIterator::Ordered)
            }
        }
    }

    /// Reads every row matching `options`.
    pub fn collect_rows(&self, options: ReadOptions) -> Result<Vec<Row>, TabletError> {
        let mut iter = self.new_row_iterator(options)?;
        let mut rows = Vec::new();
        while let Some(row) = iter.current() {
            rows.push(row.clone());
            iter.advance()?;
        }
        Ok(rows)
    }

    /// Reads one key.
    pub fn read_row(&self, key: &Key, read_time: Option<HybridTime>) -> Result<Option<Value>, TabletError> {
        let mut options = ReadOptions::default().with_range(KeyRange::point(key.clone()));
        options.read_time = read_time;
        Ok(self
            .collect_rows(options)?
            .into_iter()
            .next()
            .map(|row| row.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::VersionedEntry;

    fn ht(micros: u64) -> HybridTime {
        HybridTime::from_micros(micros)
    }

    fn versions(entries: Vec<VersionedEntry>) -> StorageIterator {
        Box::new(entries.into_iter().map(Ok::<_, StorageError>))
    }

    fn keys(rows: impl Iterator<Item = Result<Row, StorageError>>) -> Vec<(String, String)> {
        rows.map(|row| {
            let row = row.unwrap();
            (row.key.to_string(), String::from_utf8(row.value.0).unwrap())
        })
        .collect()
    }

    #[test]
    fn test_newest_visible_version_wins() {
        let stored = versions(vec![
            VersionedEntry::new(Key::from("a"), Value::from("a3"), ht(30)),
            VersionedEntry::new(Key::from("a"), Value::from("a2"), ht(20)),
            VersionedEntry::new(Key::from("a"), Value::from("a1"), ht(10)),
            VersionedEntry::new(Key::from("b"), Value::from("b1"), ht(10)),
        ]);
        let rows = VisibleVersions::new(stored, MvccSnapshot::clean(ht(25)));
        assert_eq!(
            keys(rows),
            vec![("a".into(), "a2".into()), ("b".into(), "b1".into())]
        );
    }

    #[test]
    fn test_in_flight_version_skipped() {
        let stored = versions(vec![
            VersionedEntry::new(Key::from("a"), Value::from("a2"), ht(20)),
            VersionedEntry::new(Key::from("a"), Value::from("a1"), ht(10)),
        ]);
        let rows = VisibleVersions::new(stored, MvccSnapshot::new(ht(25), [ht(20)]));
        assert_eq!(keys(rows), vec![("a".into(), "a1".into())]);
    }

    #[test]
    fn test_tombstone_hides_older_versions() {
        let stored = versions(vec![
            VersionedEntry::tombstone(Key::from("a"), ht(20)),
            VersionedEntry::new(Key::from("a"), Value::from("a1"), ht(10)),
            VersionedEntry::new(Key::from("b"), Value::from("b1"), ht(10)),
        ]);
        let rows = VisibleVersions::new(stored, MvccSnapshot::clean(ht(25)));
        assert_eq!(keys(rows), vec![("b".into(), "b1".into())]);

        let stored = versions(vec![
            VersionedEntry::tombstone(Key::from("a"), ht(20)),
            VersionedEntry::new(Key::from("a"), Value::from("a1"), ht(10)),
        ]);
        let rows = VisibleVersions::new(stored, MvccSnapshot::clean(ht(15)));
        assert_eq!(keys(rows), vec![("a".into(), "a1".into())]);
    }
}
