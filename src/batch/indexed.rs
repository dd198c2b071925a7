//! IndexedWriteBatch - a write batch with an ordered index over its keys.
//!
//! Every appended record is also indexed by `(column family, key)` under the
//! family's comparator. The index keeps, per key, the positions of every
//! record touching it in append order, so the latest record is the last
//! position and rolling back to a save point only pops positions past the
//! truncated length. A range deletion is indexed once, under its start key.
//!
//! Reads through the batch see its own writes first: the batch always wins
//! over the database, since uncommitted writes are newer than anything
//! committed.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;

use crate::column_family::{ColumnFamilyHandle, DEFAULT_COLUMN_FAMILY_ID};
use crate::db::Database;
use crate::iterator::DBIterator;
use crate::merge::MergeOperator;
use crate::options::{Options, ReadOptions, DEFAULT_COLUMN_FAMILY_NAME};
use crate::util::comparator::{default_comparator, Comparator};
use crate::{Error, Result};

use super::iterator::WriteBatchIterator;
use super::{BatchRecord, WriteBatch};

/// Index key: column family first, then the user key under its comparator.
#[derive(Clone)]
struct IndexKey {
    cf: u32,
    key: Bytes,
    comparator: Arc<dyn Comparator>,
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cf
            .cmp(&other.cf)
            .then_with(|| self.comparator.compare(&self.key, &other.key))
    }
}

/// What the batch alone says about one key.
#[derive(Debug, PartialEq, Eq)]
enum BatchState {
    /// The batch never touches the key.
    Absent,
    Found(Bytes),
    Deleted,
    /// Operands, oldest first, over a base the batch itself supplies
    /// (`complete`) or one still to be read from the database.
    Merge {
        base: Option<Bytes>,
        operands: Vec<Bytes>,
        complete: bool,
    },
}

/// A [`WriteBatch`] plus an ordered overlay index.
///
/// Not thread-safe: one writer per batch.
pub struct IndexedWriteBatch {
    batch: WriteBatch,
    default_comparator: Arc<dyn Comparator>,
    /// Comparators of families written through a handle.
    comparators: HashMap<u32, Arc<dyn Comparator>>,
    index: BTreeMap<IndexKey, Vec<usize>>,
    /// Positions of range deletions, ascending.
    range_deletes: Vec<usize>,
}

impl Default for IndexedWriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<WriteBatch> for IndexedWriteBatch {
    fn as_ref(&self) -> &WriteBatch {
        &self.batch
    }
}

impl std::fmt::Debug for IndexedWriteBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedWriteBatch")
            .field("records", &self.batch.records().len())
            .field("indexed_keys", &self.index.len())
            .finish()
    }
}

impl IndexedWriteBatch {
    /// Indexed batch ordering the default family bytewise.
    pub fn new() -> Self {
        Self::with_comparator(default_comparator())
    }

    /// Indexed batch ordering the default family with `comparator`.
    ///
    /// Families written through a handle use that family's comparator.
    pub fn with_comparator(comparator: Arc<dyn Comparator>) -> Self {
        Self {
            batch: WriteBatch::new(),
            default_comparator: comparator,
            comparators: HashMap::new(),
            index: BTreeMap::new(),
            range_deletes: Vec::new(),
        }
    }

    /// Indexed batch whose non-`_cf` methods target `cf`, ordered by the
    /// family's own comparator.
    ///
    /// [`Database::indexed_write_batch`] builds one for the default family.
    pub fn for_column_family(cf: &ColumnFamilyHandle) -> Self {
        let mut batch = Self::with_comparator(Arc::clone(cf.comparator()));
        batch.batch = WriteBatch::for_column_family(cf);
        batch.comparators.insert(cf.id(), Arc::clone(cf.comparator()));
        batch
    }

    /// The underlying batch.
    pub fn batch(&self) -> &WriteBatch {
        &self.batch
    }

    pub fn into_batch(self) -> WriteBatch {
        self.batch
    }

    /// Number of mutating records.
    pub fn count(&self) -> usize {
        self.batch.count()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn data_size(&self) -> usize {
        self.batch.data_size()
    }

    fn comparator_for(&self, cf: u32) -> Arc<dyn Comparator> {
        self.comparators
            .get(&cf)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default_comparator))
    }

    /// Adopt the comparator of `cf` for its entries.
    ///
    /// Entries already indexed for that family under another comparator are
    /// re-keyed, so one family never mixes two orders.
    fn register(&mut self, cf: &ColumnFamilyHandle) {
        let comparator = cf.comparator();
        if self.comparator_for(cf.id()).name() == comparator.name() {
            self.comparators
                .entry(cf.id())
                .or_insert_with(|| Arc::clone(comparator));
            return;
        }
        self.comparators.insert(cf.id(), Arc::clone(comparator));
        self.reindex(cf.id());
    }

    fn reindex(&mut self, cf: u32) {
        let (moved, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.index)
            .into_iter()
            .partition(|(k, _)| k.cf == cf);
        self.index = kept.into_iter().collect();
        for (old, positions) in moved {
            let index_key = self.index_key(cf, old.key);
            let slot = self.index.entry(index_key).or_default();
            slot.extend(positions);
            slot.sort_unstable();
        }
    }

    /// Fail unless the batch orders `cf` the way the database does.
    fn check_comparator(&self, cf: &ColumnFamilyHandle) -> Result<()> {
        let ours = self.comparator_for(cf.id());
        if ours.name() != cf.comparator().name() {
            return Err(Error::ComparatorMismatch {
                column_family: cf.name_lossy(),
                expected: cf.comparator().name().to_string(),
                actual: ours.name().to_string(),
            });
        }
        Ok(())
    }

    fn index_key(&self, cf: u32, key: Bytes) -> IndexKey {
        IndexKey {
            cf,
            key,
            comparator: self.comparator_for(cf),
        }
    }

    /// Index the record just appended.
    fn index_last(&mut self) {
        let Some(position) = self.batch.records().len().checked_sub(1) else {
            return;
        };
        let record = &self.batch.records()[position];
        let (Some(cf), Some(key)) = (record.column_family(), record.key().cloned()) else {
            return;
        };
        if matches!(record, BatchRecord::DeleteRange { .. }) {
            self.range_deletes.push(position);
        }
        let index_key = self.index_key(cf, key);
        self.index.entry(index_key).or_default().push(position);
    }

    pub fn put(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.batch.put(key, value);
        self.index_last();
    }

    pub fn put_cf(&mut self, cf: &ColumnFamilyHandle, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.register(cf);
        self.batch.put_cf(cf, key, value);
        self.index_last();
    }

    pub fn delete(&mut self, key: impl Into<Bytes>) {
        self.batch.delete(key);
        self.index_last();
    }

    pub fn delete_cf(&mut self, cf: &ColumnFamilyHandle, key: impl Into<Bytes>) {
        self.register(cf);
        self.batch.delete_cf(cf, key);
        self.index_last();
    }

    pub fn single_delete(&mut self, key: impl Into<Bytes>) {
        self.batch.single_delete(key);
        self.index_last();
    }

    pub fn single_delete_cf(&mut self, cf: &ColumnFamilyHandle, key: impl Into<Bytes>) {
        self.register(cf);
        self.batch.single_delete_cf(cf, key);
        self.index_last();
    }

    /// Delete every key in `[begin, end)`.
    pub fn delete_range(&mut self, begin: impl Into<Bytes>, end: impl Into<Bytes>) {
        self.batch.delete_range(begin, end);
        self.index_last();
    }

    pub fn delete_range_cf(
        &mut self,
        cf: &ColumnFamilyHandle,
        begin: impl Into<Bytes>,
        end: impl Into<Bytes>,
    ) {
        self.register(cf);
        self.batch.delete_range_cf(cf, begin, end);
        self.index_last();
    }

    pub fn merge(&mut self, key: impl Into<Bytes>, operand: impl Into<Bytes>) {
        self.batch.merge(key, operand);
        self.index_last();
    }

    pub fn merge_cf(&mut self, cf: &ColumnFamilyHandle, key: impl Into<Bytes>, operand: impl Into<Bytes>) {
        self.register(cf);
        self.batch.merge_cf(cf, key, operand);
        self.index_last();
    }

    /// Log data is carried by the batch but never indexed.
    pub fn put_log_data(&mut self, blob: impl Into<Bytes>) {
        self.batch.put_log_data(blob);
    }

    /// Clear the batch and its index.
    pub fn clear(&mut self) {
        self.batch.clear();
        self.index.clear();
        self.range_deletes.clear();
    }

    pub fn set_save_point(&mut self) {
        self.batch.set_save_point();
    }

    /// Undo every record appended since the last save point, index included.
    pub fn rollback_to_save_point(&mut self) -> Result<()> {
        self.batch.rollback_to_save_point()?;
        let len = self.batch.records().len();

        self.index.retain(|_, positions| {
            while positions.last().is_some_and(|p| *p >= len) {
                positions.pop();
            }
            !positions.is_empty()
        });
        while self.range_deletes.last().is_some_and(|p| *p >= len) {
            self.range_deletes.pop();
        }
        Ok(())
    }

    pub fn pop_save_point(&mut self) -> Result<()> {
        self.batch.pop_save_point()
    }

    /// Cursor over the default family's entries.
    pub fn iterator(&self) -> WriteBatchIterator<'_> {
        self.iterator_for(self.batch.default_column_family())
    }

    pub fn iterator_cf(&self, cf: &ColumnFamilyHandle) -> WriteBatchIterator<'_> {
        self.iterator_for(cf.id())
    }

    fn iterator_for(&self, cf: u32) -> WriteBatchIterator<'_> {
        let entries = self
            .index
            .iter()
            .filter(|(k, _)| k.cf == cf)
            .filter_map(|(k, positions)| positions.last().map(|p| (&k.key, *p)))
            .collect();
        WriteBatchIterator::new(self.batch.records(), entries, self.comparator_for(cf))
    }

    /// Walk the records affecting `key`, newest first.
    fn state(&self, cf: u32, key: &[u8]) -> BatchState {
        let comparator = self.comparator_for(cf);
        let records = self.batch.records();

        let lookup = self.index_key(cf, Bytes::copy_from_slice(key));
        let points = self
            .index
            .get(&lookup)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .copied()
            .filter(|p| !matches!(records[*p], BatchRecord::DeleteRange { .. }));
        let covering = self.range_deletes.iter().copied().filter(|p| match &records[*p] {
            BatchRecord::DeleteRange { cf: c, begin, end } => {
                *c == cf
                    && comparator.compare(begin, key) != Ordering::Greater
                    && comparator.compare(key, end) == Ordering::Less
            }
            _ => false,
        });

        let mut positions: Vec<usize> = points.chain(covering).collect();
        positions.sort_unstable_by(|a, b| b.cmp(a));

        let mut operands = Vec::new();
        let mut base = None;
        let mut complete = false;
        for position in positions {
            match &records[position] {
                BatchRecord::Put { value, .. } => {
                    base = Some(value.clone());
                    complete = true;
                }
                BatchRecord::Delete { .. }
                | BatchRecord::SingleDelete { .. }
                | BatchRecord::DeleteRange { .. } => complete = true,
                BatchRecord::Merge { operand, .. } => operands.push(operand.clone()),
                BatchRecord::LogData(_) => {}
            }
            if complete {
                break;
            }
        }

        if operands.is_empty() {
            return match (complete, base) {
                (false, _) => BatchState::Absent,
                (true, Some(value)) => BatchState::Found(value),
                (true, None) => BatchState::Deleted,
            };
        }
        operands.reverse();
        BatchState::Merge {
            base,
            operands,
            complete,
        }
    }

    /// Value of `key` in the batch's default family, from the batch alone.
    ///
    /// Merge operands with no base in the batch fail with `MergeInProgress`.
    pub fn get_from_batch(&self, options: &Options, key: &[u8]) -> Result<Option<Bytes>> {
        let cf = self.batch.default_column_family();
        let name = if cf == DEFAULT_COLUMN_FAMILY_ID {
            DEFAULT_COLUMN_FAMILY_NAME.to_string()
        } else {
            cf.to_string()
        };
        self.resolve_from_batch(cf, options.cf_options.merge_operator.as_ref(), &name, key)
    }

    pub fn get_from_batch_cf(&self, cf: &ColumnFamilyHandle, key: &[u8]) -> Result<Option<Bytes>> {
        self.check_comparator(cf)?;
        let data = cf.data()?;
        self.resolve_from_batch(data.id, data.merge_operator(), &data.name_lossy(), key)
    }

    fn resolve_from_batch(
        &self,
        cf: u32,
        merge_operator: Option<&Arc<dyn MergeOperator>>,
        cf_name: &str,
        key: &[u8],
    ) -> Result<Option<Bytes>> {
        match self.state(cf, key) {
            BatchState::Absent | BatchState::Deleted => Ok(None),
            BatchState::Found(value) => Ok(Some(value)),
            BatchState::Merge { complete: false, .. } => Err(Error::MergeInProgress),
            BatchState::Merge { base, operands, .. } => {
                let op = merge_operator.ok_or_else(|| Error::MergeOperatorMissing(cf_name.to_string()))?;
                op.full_merge(key, base.as_deref(), &operands).map(Some)
            }
        }
    }

    /// Value of `key` in the default family, reading through to `db` when
    /// the batch does not settle it.
    pub fn get_from_batch_and_db(
        &self,
        db: &Database,
        options: &ReadOptions,
        key: &[u8],
    ) -> Result<Option<Bytes>> {
        self.get_from_batch_and_db_cf(db, options, &db.default_column_family(), key)
    }

    pub fn get_from_batch_and_db_cf(
        &self,
        db: &Database,
        options: &ReadOptions,
        cf: &ColumnFamilyHandle,
        key: &[u8],
    ) -> Result<Option<Bytes>> {
        self.check_comparator(cf)?;
        let base = match self.state(cf.id(), key) {
            BatchState::Absent => return db.get_cf_opt(options, cf, key),
            BatchState::Merge { complete: false, .. } => db.get_cf_opt(options, cf, key)?,
            _ => None,
        };
        self.apply_overlay(cf, key, base)
    }

    /// Value of `key` once the batch is laid over `base`.
    fn apply_overlay(
        &self,
        cf: &ColumnFamilyHandle,
        key: &[u8],
        base: Option<Bytes>,
    ) -> Result<Option<Bytes>> {
        match self.state(cf.id(), key) {
            BatchState::Absent => Ok(base),
            BatchState::Found(value) => Ok(Some(value)),
            BatchState::Deleted => Ok(None),
            BatchState::Merge {
                base: batch_base,
                operands,
                complete,
            } => {
                let existing = if complete { batch_base } else { base };
                let op = cf
                    .merge_operator()
                    .ok_or_else(|| Error::MergeOperatorMissing(cf.name_lossy()))?;
                op.full_merge(key, existing.as_deref(), &operands).map(Some)
            }
        }
    }

    /// Database iterator over the default family with this batch laid on top.
    pub fn iter_with_base(&self, db: &Database, options: &ReadOptions) -> Result<DBIterator> {
        self.iter_with_base_cf(db, options, &db.default_column_family())
    }

    /// Database iterator over `cf` with this batch laid on top.
    ///
    /// Every key the batch writes to `cf` takes part, whatever bounds the
    /// read options imply for the database side.
    pub fn iter_with_base_cf(
        &self,
        db: &Database,
        options: &ReadOptions,
        cf: &ColumnFamilyHandle,
    ) -> Result<DBIterator> {
        self.check_comparator(cf)?;
        let base = db.iter_cf_opt(options, cf)?;
        base.status()?;
        let (base_entries, comparator, snapshot) = base.into_parts();

        let mut merged = Vec::with_capacity(base_entries.len());
        let mut base_entries = base_entries.into_iter().peekable();

        for (index_key, _) in self.index.iter().filter(|(k, _)| k.cf == cf.id()) {
            let key = &index_key.key;
            while let Some((base_key, _)) = base_entries.peek() {
                if comparator.compare(base_key, key) != Ordering::Less {
                    break;
                }
                if let Some((base_key, base_value)) = base_entries.next() {
                    if let Some(value) = self.apply_overlay(cf, &base_key, Some(base_value))? {
                        merged.push((base_key, value));
                    }
                }
            }

            let base_value = match base_entries.peek() {
                Some((base_key, _)) if comparator.compare(base_key, key) == Ordering::Equal => {
                    base_entries.next().map(|(_, v)| v)
                }
                _ => None,
            };
            if let Some(value) = self.apply_overlay(cf, key, base_value)? {
                merged.push((key.clone(), value));
            }
        }

        for (base_key, base_value) in base_entries {
            if let Some(value) = self.apply_overlay(cf, &base_key, Some(base_value))? {
                merged.push((base_key, value));
            }
        }

        Ok(DBIterator::new(merged, comparator, snapshot))
    }
}
