// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Key/value types shared by the storage engine and the tablet pipelines.

use crate::time::HybridTime;

/// Maximum key size in bytes.
pub const MAX_KEY_SIZE: usize = 8 * 1024; // 8KB

/// Maximum value size in bytes.
pub const MAX_VALUE_SIZE: usize = 64 * 1024 * 1024; // 64MB

/// A user key. Ordered lexicographically by bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Key(pub Vec<u8>);

impl Key {
    /// Creates a new key from bytes.
    #[inline]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the key bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the length of the key.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the key is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the smallest key strictly greater than this one.
    pub fn successor(&self) -> Key {
        let mut bytes = Vec::with_capacity(self.0.len() + 1);
        bytes.extend_from_slice(&self.0);
        bytes.push(0);
        Key(bytes)
    }
}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0).escape_debug())
    }
}

/// A stored value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Value(pub Vec<u8>);

impl Value {
    /// Creates a new value from bytes.
    #[inline]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the value bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the length of the value.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the value is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl AsRef<[u8]> for Value {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A half-open key range `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyRange {
    start: Key,
    end: Key,
}

impl KeyRange {
    /// Creates the range `[start, end)`. Returns `None` if the range is empty.
    pub fn new(start: impl Into<Key>, end: impl Into<Key>) -> Option<Self> {
        let (start, end) = (start.into(), end.into());
        (start < end).then_some(Self { start, end })
    }

    /// The range covering exactly one key.
    pub fn point(key: impl Into<Key>) -> Self {
        let start = key.into();
        let end = start.successor();
        Self { start, end }
    }

    #[inline]
    pub fn start(&self) -> &Key {
        &self.start
    }

    #[inline]
    pub fn end(&self) -> &Key {
        &self.end
    }

    /// Returns true if the range covers a single key.
    pub fn is_point(&self) -> bool {
        self.end == self.start.successor()
    }

    #[inline]
    pub fn contains(&self, key: &Key) -> bool {
        &self.start <= key && key < &self.end
    }

    #[inline]
    pub fn overlaps(&self, other: &KeyRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl std::fmt::Display for KeyRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_point() {
            write!(f, "[{}]", self.start)
        } else {
            write!(f, "[{}, {})", self.start, self.end)
        }
    }
}

/// One version of a key as stored by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedEntry {
    pub key: Key,
    pub hybrid_time: HybridTime,
    pub value: Option<Value>, // None = tombstone
}

impl VersionedEntry {
    /// Creates a new entry with a value.
    pub fn new(key: Key, value: Value, hybrid_time: HybridTime) -> Self {
        Self {
            key,
            hybrid_time,
            value: Some(value),
        }
    }

    /// Creates a tombstone entry (deletion marker).
    pub fn tombstone(key: Key, hybrid_time: HybridTime) -> Self {
        Self {
            key,
            hybrid_time,
            value: None,
        }
    }

    /// Returns true if this entry is a tombstone.
    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// Position of a committed operation in the replicated log.
///
/// Assigned externally by the replication layer; `index` is monotonically
/// increasing for committed writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct OpId {
    pub term: u64,
    pub index: i64,
}

impl OpId {
    pub const fn new(term: u64, index: i64) -> Self {
        Self { term, index }
    }
}

impl std::fmt::Display for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.term, self.index)
    }
}

/// An atomic batch of versioned mutations handed to the storage engine.
#[derive(Debug, Clone, Default)]
pub struct KvWriteBatch {
    pub entries: Vec<VersionedEntry>,
    /// Log position of the operation producing this batch, persisted with it.
    pub op_id: Option<OpId>,
}

impl KvWriteBatch {
    pub fn new(op_id: Option<OpId>) -> Self {
        Self {
            entries: Vec::new(),
            op_id,
        }
    }

    pub fn put(&mut self, key: Key, value: Value, hybrid_time: HybridTime) {
        self.entries
            .push(VersionedEntry::new(key, value, hybrid_time));
    }

    pub fn delete(&mut self, key: Key, hybrid_time: HybridTime) {
        self.entries
            .push(VersionedEntry::tombstone(key, hybrid_time));
    }

    /// The largest hybrid time in the batch, if any.
    pub fn max_hybrid_time(&self) -> Option<HybridTime> {
        self.entries.iter().map(|e| e.hybrid_time).max()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_bytes() {
        let key = Key::from(b"hello".as_slice());
        assert_eq!(key.as_bytes(), b"hello");
        assert_eq!(key.len(), 5);
    }

    #[test]
    fn test_key_order_is_lexicographic() {
        assert!(Key::from("a") < Key::from("aa"));
        assert!(Key::from("aa") < Key::from("b"));
        assert!(Key::from("a") < Key::from("a").successor());
        assert!(Key::from("a").successor() < Key::from("a\u{1}"));
    }

    #[test]
    fn test_value_from_bytes() {
        let value = Value::from(b"world".as_slice());
        assert_eq!(value.as_bytes(), b"world");
        assert_eq!(value.len(), 5);
    }

    #[test]
    fn test_key_range_rejects_empty() {
        assert!(KeyRange::new("b", "a").is_none());
        assert!(KeyRange::new("a", "a").is_none());
        assert!(KeyRange::new("a", "b").is_some());
    }

    #[test]
    fn test_point_range() {
        let range = KeyRange::point("k");
        assert!(range.is_point());
        assert!(range.contains(&Key::from("k")));
        assert!(!range.contains(&Key::from("k\0")));
        assert!(!range.contains(&Key::from("ka")));
    }

    #[test]
    fn test_overlaps() {
        let ab = KeyRange::new("a", "b").unwrap();
        let bc = KeyRange::new("b", "c").unwrap();
        let ac = KeyRange::new("a", "c").unwrap();
        assert!(!ab.overlaps(&bc));
        assert!(ab.overlaps(&ac));
        assert!(bc.overlaps(&ac));
        assert!(ac.overlaps(&KeyRange::point("b")));
        assert!(!ab.overlaps(&KeyRange::point("b")));
    }

    #[test]
    fn test_versioned_entry() {
        let key = Key::from("key");
        let ts = HybridTime::from_micros(100);

        let entry = VersionedEntry::new(key.clone(), Value::from("value"), ts);
        assert!(!entry.is_tombstone());

        let tombstone = VersionedEntry::tombstone(key, ts);
        assert!(tombstone.is_tombstone());
    }

    #[test]
    fn test_batch_max_hybrid_time() {
        let mut batch = KvWriteBatch::new(Some(OpId::new(1, 7)));
        assert_eq!(batch.max_hybrid_time(), None);
        batch.put(Key::from("a"), Value::from("1"), HybridTime::from_micros(5));
        batch.delete(Key::from("b"), HybridTime::from_micros(9));
        assert_eq!(batch.max_hybrid_time(), Some(HybridTime::from_micros(9)));
        assert_eq!(batch.len(), 2);
    }
}
