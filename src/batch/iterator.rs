//! Cursor over the index of an [`IndexedWriteBatch`](super::IndexedWriteBatch).
//!
//! Entries come out in comparator order, one per key, showing the latest
//! record for that key. The cursor borrows the batch, so the batch cannot be
//! cleared or rolled back while a cursor is alive.

use std::sync::Arc;

use bytes::Bytes;

use crate::util::comparator::Comparator;

use super::BatchRecord;

/// Kind of record an overlay entry reflects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    Put,
    Merge,
    Delete,
    SingleDelete,
    /// Keyed by the range start; the value holds the range end.
    DeleteRange,
}

/// One logical overlay entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteEntry {
    pub record_type: WriteType,
    pub key: Bytes,
    /// Value for puts, operand for merges, range end for range deletes,
    /// empty for deletes.
    pub value: Bytes,
}

impl WriteEntry {
    pub(super) fn from_record(record: &BatchRecord) -> Option<Self> {
        let (record_type, key, value) = match record {
            BatchRecord::Put { key, value, .. } => (WriteType::Put, key, value.clone()),
            BatchRecord::Merge { key, operand, .. } => (WriteType::Merge, key, operand.clone()),
            BatchRecord::Delete { key, .. } => (WriteType::Delete, key, Bytes::new()),
            BatchRecord::SingleDelete { key, .. } => (WriteType::SingleDelete, key, Bytes::new()),
            BatchRecord::DeleteRange { begin, end, .. } => {
                (WriteType::DeleteRange, begin, end.clone())
            }
            BatchRecord::LogData(_) => return None,
        };
        Some(Self {
            record_type,
            key: key.clone(),
            value,
        })
    }
}

/// Bidirectional cursor over one column family of an indexed batch.
///
/// Unpositioned until one of the seek methods is called.
pub struct WriteBatchIterator<'a> {
    records: &'a [BatchRecord],
    /// Indexed keys in comparator order, with their latest record.
    entries: Vec<(&'a Bytes, usize)>,
    comparator: Arc<dyn Comparator>,
    /// `entries.len()` means invalid.
    position: usize,
}

impl<'a> WriteBatchIterator<'a> {
    pub(super) fn new(
        records: &'a [BatchRecord],
        entries: Vec<(&'a Bytes, usize)>,
        comparator: Arc<dyn Comparator>,
    ) -> Self {
        let position = entries.len();
        Self {
            records,
            entries,
            comparator,
            position,
        }
    }

    pub fn valid(&self) -> bool {
        self.position < self.entries.len()
    }

    pub fn seek_to_first(&mut self) {
        self.position = 0;
    }

    pub fn seek_to_last(&mut self) {
        self.position = match self.entries.len() {
            0 => 0,
            n => n - 1,
        };
    }

    /// Position at the first entry at or after `target`.
    pub fn seek(&mut self, target: &[u8]) {
        self.position = self
            .entries
            .partition_point(|(key, _)| self.comparator.compare(key, target).is_lt());
    }

    /// Position at the last entry at or before `target`.
    pub fn seek_for_prev(&mut self, target: &[u8]) {
        let after = self
            .entries
            .partition_point(|(key, _)| self.comparator.compare(key, target).is_le());
        self.position = after.checked_sub(1).unwrap_or(self.entries.len());
    }

    pub fn next(&mut self) {
        if self.valid() {
            self.position += 1;
        }
    }

    pub fn prev(&mut self) {
        if self.valid() {
            self.position = self.position.checked_sub(1).unwrap_or(self.entries.len());
        }
    }

    /// The entry under the cursor.
    pub fn entry(&self) -> Option<WriteEntry> {
        let (_, record) = self.entries.get(self.position)?;
        WriteEntry::from_record(&self.records[*record])
    }

    /// Number of distinct keys visible to this cursor.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for WriteBatchIterator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBatchIterator")
            .field("entries", &self.entries.len())
            .field("position", &self.position)
            .finish()
    }
}
