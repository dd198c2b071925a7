//! DBIterator - cursor over one column family.
//!
//! The visible entries are collected when the iterator is built, so a scan
//! is point-in-time at its build sequence. An iterator built through a
//! snapshot stops being valid once that snapshot is released.

use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::Arc;

use bytes::Bytes;

use crate::column_family::ColumnFamilyHandle;
use crate::db::Database;
use crate::options::ReadOptions;
use crate::snapshot::Snapshot;
use crate::util::comparator::Comparator;
use crate::{Error, Result};

/// Direction for iterator traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IteratorDirection {
    /// Forward iteration (comparator order).
    #[default]
    Forward,
    /// Reverse iteration.
    Reverse,
}

/// Builder for DBIterator with various options.
#[derive(Debug, Clone, Default)]
pub struct DBIteratorBuilder {
    read_options: ReadOptions,
    start: Option<Bound<Bytes>>,
    end: Option<Bound<Bytes>>,
    prefix: Option<Bytes>,
    direction: IteratorDirection,
}

impl DBIteratorBuilder {
    /// Create a new builder reading the latest state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read as of `snapshot`.
    pub fn snapshot(mut self, snapshot: &Snapshot) -> Self {
        self.read_options.snapshot = Some(snapshot.clone());
        self
    }

    pub fn read_options(mut self, options: ReadOptions) -> Self {
        self.read_options = options;
        self
    }

    /// Set the start bound (inclusive).
    pub fn start(mut self, key: impl Into<Bytes>) -> Self {
        self.start = Some(Bound::Included(key.into()));
        self
    }

    /// Set the start bound (exclusive).
    pub fn start_exclusive(mut self, key: impl Into<Bytes>) -> Self {
        self.start = Some(Bound::Excluded(key.into()));
        self
    }

    /// Set the end bound (exclusive).
    pub fn end(mut self, key: impl Into<Bytes>) -> Self {
        self.end = Some(Bound::Excluded(key.into()));
        self
    }

    /// Set the end bound (inclusive).
    pub fn end_inclusive(mut self, key: impl Into<Bytes>) -> Self {
        self.end = Some(Bound::Included(key.into()));
        self
    }

    /// Only yield keys starting with `prefix`.
    pub fn prefix(mut self, prefix: impl Into<Bytes>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set the direction used by the `Iterator` impl.
    pub fn direction(mut self, direction: IteratorDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Build over the default column family.
    pub fn build(self, db: &Database) -> Result<DBIterator> {
        let cf = db.default_column_family();
        self.build_cf(db, &cf)
    }

    /// Build over `cf`.
    pub fn build_cf(self, db: &Database, cf: &ColumnFamilyHandle) -> Result<DBIterator> {
        let lower = match &self.start {
            Some(Bound::Included(k)) | Some(Bound::Excluded(k)) => Some(k.as_ref()),
            _ => None,
        };
        let upper = match &self.end {
            Some(Bound::Excluded(k)) => Some(k.as_ref()),
            _ => None,
        };

        let entries = db.visible_entries(cf, &self.read_options, lower, upper)?;
        let comparator = Arc::clone(cf.comparator());

        let entries = entries
            .into_iter()
            .filter(|(key, _)| {
                let after_start = match &self.start {
                    Some(Bound::Excluded(s)) => comparator.compare(key, s) == Ordering::Greater,
                    _ => true,
                };
                let before_end = match &self.end {
                    Some(Bound::Included(e)) => comparator.compare(key, e) != Ordering::Greater,
                    _ => true,
                };
                let prefixed = self
                    .prefix
                    .as_ref()
                    .map_or(true, |p| key.starts_with(p));
                after_start && before_end && prefixed
            })
            .collect();

        let mut iter = DBIterator::new(entries, comparator, self.read_options.snapshot);
        iter.direction = self.direction;
        Ok(iter)
    }
}

/// Database iterator with snapshot isolation.
///
/// Positioned nowhere until one of the seek methods (or the `Iterator`
/// impl) is used.
pub struct DBIterator {
    /// Sorted entries visible at the read sequence.
    entries: Vec<(Bytes, Bytes)>,
    comparator: Arc<dyn Comparator>,
    /// Current position; `entries.len()` means invalid.
    position: usize,
    direction: IteratorDirection,
    started: bool,
    snapshot: Option<Snapshot>,
}

impl std::fmt::Debug for DBIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DBIterator")
            .field("entries", &self.entries.len())
            .field("position", &self.position)
            .field("direction", &self.direction)
            .finish()
    }
}

impl DBIterator {
    /// Wrap entries already sorted by `comparator`.
    pub(crate) fn new(
        entries: Vec<(Bytes, Bytes)>,
        comparator: Arc<dyn Comparator>,
        snapshot: Option<Snapshot>,
    ) -> Self {
        let position = entries.len();
        Self {
            entries,
            comparator,
            position,
            direction: IteratorDirection::Forward,
            started: false,
            snapshot,
        }
    }

    /// `HandleClosed` once the snapshot this iterator reads through is released.
    pub fn status(&self) -> Result<()> {
        match &self.snapshot {
            Some(s) if s.is_released() => Err(Error::HandleClosed("snapshot")),
            _ => Ok(()),
        }
    }

    /// Check if the iterator is valid (positioned at an entry).
    pub fn valid(&self) -> bool {
        self.position < self.entries.len() && self.status().is_ok()
    }

    /// Get the current key.
    pub fn key(&self) -> Option<&Bytes> {
        self.entry().map(|(k, _)| k)
    }

    /// Get the current value.
    pub fn value(&self) -> Option<&Bytes> {
        self.entry().map(|(_, v)| v)
    }

    /// Get the current entry as (key, value).
    pub fn entry(&self) -> Option<(&Bytes, &Bytes)> {
        if !self.valid() {
            return None;
        }
        self.entries.get(self.position).map(|(k, v)| (k, v))
    }

    /// Move to the first entry.
    pub fn seek_to_first(&mut self) {
        self.started = true;
        self.position = 0;
    }

    /// Move to the last entry.
    pub fn seek_to_last(&mut self) {
        self.started = true;
        self.position = self.entries.len().saturating_sub(1);
    }

    /// Seek to the first entry with key >= target.
    pub fn seek(&mut self, target: &[u8]) {
        self.started = true;
        self.position = self
            .entries
            .partition_point(|(k, _)| self.comparator.compare(k, target) == Ordering::Less);
    }

    /// Seek to the last entry with key <= target.
    pub fn seek_for_prev(&mut self, target: &[u8]) {
        self.started = true;
        let idx = self
            .entries
            .partition_point(|(k, _)| self.comparator.compare(k, target) != Ordering::Greater);
        self.position = idx.checked_sub(1).unwrap_or(self.entries.len());
    }

    /// Move to the next entry.
    pub fn next(&mut self) {
        if self.position < self.entries.len() {
            self.position += 1;
        }
    }

    /// Move to the previous entry. Stepping back from the first entry
    /// invalidates the iterator.
    pub fn prev(&mut self) {
        if self.position < self.entries.len() {
            self.position = self.position.checked_sub(1).unwrap_or(self.entries.len());
        }
    }

    /// Get the number of entries.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn into_parts(self) -> (Vec<(Bytes, Bytes)>, Arc<dyn Comparator>, Option<Snapshot>) {
        (self.entries, self.comparator, self.snapshot)
    }
}

impl Iterator for DBIterator {
    type Item = (Bytes, Bytes);

    fn next(&mut self) -> Option<Self::Item> {
        if !self.started {
            match self.direction {
                IteratorDirection::Forward => self.seek_to_first(),
                IteratorDirection::Reverse => self.seek_to_last(),
            }
        }

        let item = self.entry().map(|(k, v)| (k.clone(), v.clone()))?;
        match self.direction {
            IteratorDirection::Forward => DBIterator::next(self),
            IteratorDirection::Reverse => self.prev(),
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::comparator::{BytewiseComparator, ReverseBytewiseComparator};
    use tempfile::{tempdir, TempDir};

    fn create_test_db() -> (TempDir, Arc<Database>) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        (dir, db)
    }

    fn cursor(keys: &[&'static str], comparator: Arc<dyn Comparator>) -> DBIterator {
        let entries = keys
            .iter()
            .map(|k| (Bytes::from(*k), Bytes::from(*k)))
            .collect();
        DBIterator::new(entries, comparator, None)
    }

    #[test]
    fn test_iterator_empty() {
        let (_dir, db) = create_test_db();
        let mut iter = DBIteratorBuilder::new().build(&db).unwrap();

        assert!(!iter.valid());
        iter.seek_to_first();
        assert!(!iter.valid());
        iter.seek_to_last();
        assert!(!iter.valid());
        assert_eq!(iter.count(), 0);
    }

    #[test]
    fn test_iterator_basic() {
        let (_dir, db) = create_test_db();
        db.put(b"key1", b"value1").unwrap();
        db.put(b"key2", b"value2").unwrap();
        db.put(b"key3", b"value3").unwrap();

        let mut iter = DBIteratorBuilder::new().build(&db).unwrap();
        assert!(!iter.valid());

        iter.seek_to_first();
        assert_eq!(iter.key().unwrap().as_ref(), b"key1");
        assert_eq!(iter.value().unwrap().as_ref(), b"value1");

        iter.next();
        assert_eq!(iter.key().unwrap().as_ref(), b"key2");
        iter.next();
        assert_eq!(iter.key().unwrap().as_ref(), b"key3");
        iter.next();
        assert!(!iter.valid());
    }

    #[test]
    fn test_cursor_seek_and_prev() {
        let mut iter = cursor(&["b", "d", "f"], Arc::new(BytewiseComparator::new()));

        iter.seek(b"c");
        assert_eq!(iter.key().unwrap().as_ref(), b"d");
        iter.seek(b"d");
        assert_eq!(iter.key().unwrap().as_ref(), b"d");
        iter.seek(b"g");
        assert!(!iter.valid());

        iter.seek_for_prev(b"e");
        assert_eq!(iter.key().unwrap().as_ref(), b"d");
        iter.seek_for_prev(b"f");
        assert_eq!(iter.key().unwrap().as_ref(), b"f");
        iter.seek_for_prev(b"a");
        assert!(!iter.valid());

        iter.seek_to_last();
        iter.prev();
        assert_eq!(iter.key().unwrap().as_ref(), b"d");
        iter.prev();
        iter.prev();
        assert!(!iter.valid());
        // Stays invalid.
        iter.prev();
        assert!(!iter.valid());
    }

    #[test]
    fn test_cursor_follows_comparator() {
        let mut iter = cursor(&["c", "b", "a"], Arc::new(ReverseBytewiseComparator::new()));
        iter.seek(b"bb");
        assert_eq!(iter.key().unwrap().as_ref(), b"b");
        iter.seek_for_prev(b"bb");
        assert_eq!(iter.key().unwrap().as_ref(), b"c");
    }

    #[test]
    fn test_iterator_range() {
        let (_dir, db) = create_test_db();
        for i in 1..=5 {
            db.put(format!("key{}", i).as_bytes(), b"v").unwrap();
        }

        let keys: Vec<_> = DBIteratorBuilder::new()
            .start("key2")
            .end("key4")
            .build(&db)
            .unwrap()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![Bytes::from("key2"), Bytes::from("key3")]);

        let keys: Vec<_> = DBIteratorBuilder::new()
            .start_exclusive("key2")
            .end_inclusive("key4")
            .build(&db)
            .unwrap()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![Bytes::from("key3"), Bytes::from("key4")]);
    }

    #[test]
    fn test_iterator_prefix() {
        let (_dir, db) = create_test_db();
        db.put(b"user:1", b"alice").unwrap();
        db.put(b"user:2", b"bob").unwrap();
        db.put(b"user:3", b"charlie").unwrap();
        db.put(b"post:1", b"hello").unwrap();

        let keys: Vec<_> = DBIteratorBuilder::new()
            .prefix("user:")
            .build(&db)
            .unwrap()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys.len(), 3);
        assert!(keys.iter().all(|k| k.starts_with(b"user:")));
    }

    #[test]
    fn test_iterator_reverse() {
        let (_dir, db) = create_test_db();
        db.put(b"key1", b"value1").unwrap();
        db.put(b"key2", b"value2").unwrap();
        db.put(b"key3", b"value3").unwrap();

        let keys: Vec<_> = DBIteratorBuilder::new()
            .direction(IteratorDirection::Reverse)
            .build(&db)
            .unwrap()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(
            keys,
            vec![Bytes::from("key3"), Bytes::from("key2"), Bytes::from("key1")]
        );
    }

    #[test]
    fn test_iterator_deleted_keys() {
        let (_dir, db) = create_test_db();
        db.put(b"key1", b"value1").unwrap();
        db.put(b"key2", b"value2").unwrap();
        db.put(b"key3", b"value3").unwrap();
        db.delete(b"key2").unwrap();

        let keys: Vec<_> = DBIteratorBuilder::new()
            .build(&db)
            .unwrap()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![Bytes::from("key1"), Bytes::from("key3")]);
    }

    #[test]
    fn test_iterator_snapshot_isolation() {
        let (_dir, db) = create_test_db();
        db.put(b"key1", b"value1").unwrap();
        db.put(b"key2", b"value2").unwrap();

        let snapshot = db.snapshot().unwrap();

        db.put(b"key3", b"value3").unwrap();
        db.put(b"key1", b"updated1").unwrap();

        let entries: Vec<_> = DBIteratorBuilder::new()
            .snapshot(&snapshot)
            .build(&db)
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].1.as_ref(), b"value1");

        let entries: Vec<_> = DBIteratorBuilder::new().build(&db).unwrap().collect();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].1.as_ref(), b"updated1");
    }

    #[test]
    fn test_released_snapshot_invalidates_iterator() {
        let (_dir, db) = create_test_db();
        db.put(b"a", b"1").unwrap();
        let snapshot = db.snapshot().unwrap();

        let mut iter = DBIteratorBuilder::new().snapshot(&snapshot).build(&db).unwrap();
        iter.seek_to_first();
        assert!(iter.valid());

        snapshot.release();
        assert!(!iter.valid());
        assert_eq!(iter.status().unwrap_err(), Error::HandleClosed("snapshot"));

        // Building through a released snapshot fails outright.
        assert!(DBIteratorBuilder::new().snapshot(&snapshot).build(&db).is_err());
    }
}
