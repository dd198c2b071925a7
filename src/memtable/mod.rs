//! MemTable - in-memory multi-version storage for one column family.
//!
//! # Design
//!
//! - Uses `crossbeam-skiplist` for lock-free concurrent access
//! - Keys are `InternalKey` (user key under the family comparator, then
//!   newest stamp first), so all versions of a key are adjacent
//! - Range deletions live in a side list of tombstones
//!
//! # MVCC Semantics
//!
//! A read at sequence `S` sees, for each user key, the newest version with
//! sequence `<= S` unless a range tombstone at or below `S` is newer than it.
//! Merge operands above the first base version are folded at read time.

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::merge::MergeOperator;
use crate::types::{InternalKey, LookupResult, SequenceNumber, Stamp, ValueType};
use crate::util::comparator::Comparator;
use crate::{Error, Result};

/// Per-entry bookkeeping overhead used in memory estimates.
const ENTRY_OVERHEAD: usize = 64;

/// Deletion of every key in `[begin, end)` at a stamp.
#[derive(Debug, Clone)]
pub struct RangeTombstone {
    pub begin: Bytes,
    pub end: Bytes,
    pub stamp: Stamp,
}

/// Outcome of walking the versions of one key.
enum Resolved {
    /// A value (possibly produced by merging).
    Value(Bytes),
    /// The newest visible state is a deletion.
    Deleted,
    /// Nothing visible.
    Absent,
}

/// State of one key as written into a fresh log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportedEntry {
    Value(Bytes),
    /// Merge operands (oldest first) no operator was available to fold.
    Unmerged {
        base: Option<Bytes>,
        operands: Vec<Bytes>,
    },
}

/// MemTable for in-memory sorted storage.
///
/// Thread-safe for concurrent reads and writes.
pub struct MemTable {
    comparator: Arc<dyn Comparator>,
    table: SkipMap<InternalKey, Bytes>,
    range_tombstones: RwLock<Vec<RangeTombstone>>,
    approximate_memory_usage: AtomicUsize,
    max_sequence: AtomicU64,
}

impl std::fmt::Debug for MemTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemTable")
            .field("comparator", &self.comparator.name())
            .field("entries", &self.table.len())
            .field("range_tombstones", &self.range_tombstones.read().len())
            .finish()
    }
}

impl MemTable {
    /// Create a new empty MemTable ordered by `comparator`.
    pub fn new(comparator: Arc<dyn Comparator>) -> Self {
        Self {
            comparator,
            table: SkipMap::new(),
            range_tombstones: RwLock::new(Vec::new()),
            approximate_memory_usage: AtomicUsize::new(0),
            max_sequence: AtomicU64::new(0),
        }
    }

    pub fn comparator(&self) -> &Arc<dyn Comparator> {
        &self.comparator
    }

    /// Insert one point record.
    pub fn add(&self, stamp: Stamp, value_type: ValueType, key: Bytes, value: Bytes) {
        self.approximate_memory_usage.fetch_add(
            key.len() + value.len() + ENTRY_OVERHEAD,
            AtomicOrdering::Relaxed,
        );
        self.max_sequence
            .fetch_max(stamp.sequence, AtomicOrdering::Relaxed);

        let ikey = InternalKey::new(key, stamp, value_type, Arc::clone(&self.comparator));
        self.table.insert(ikey, value);
    }

    /// Insert a range deletion.
    pub fn add_range_tombstone(&self, stamp: Stamp, begin: Bytes, end: Bytes) {
        if self.comparator.compare(&begin, &end) != Ordering::Less {
            // Empty range: nothing can be covered.
            return;
        }
        self.approximate_memory_usage.fetch_add(
            begin.len() + end.len() + ENTRY_OVERHEAD,
            AtomicOrdering::Relaxed,
        );
        self.max_sequence
            .fetch_max(stamp.sequence, AtomicOrdering::Relaxed);
        self.range_tombstones
            .write()
            .push(RangeTombstone { begin, end, stamp });
    }

    fn covers(&self, tombstone: &RangeTombstone, key: &[u8]) -> bool {
        self.comparator.compare(&tombstone.begin, key) != Ordering::Greater
            && self.comparator.compare(key, &tombstone.end) == Ordering::Less
    }

    /// Newest tombstone visible at `sequence` that covers `key`.
    fn covering_tombstone(&self, key: &[u8], sequence: SequenceNumber) -> Option<Stamp> {
        self.range_tombstones
            .read()
            .iter()
            .filter(|t| t.stamp.sequence <= sequence && self.covers(t, key))
            .map(|t| t.stamp)
            .max()
    }

    /// Versions of `key` visible at `sequence`: the base state under the
    /// newest merges (`Some(None)` when deleted) and those merge operands,
    /// oldest first.
    fn visible_versions(
        &self,
        key: &[u8],
        sequence: SequenceNumber,
    ) -> (Option<Option<Bytes>>, Vec<Bytes>) {
        let tombstone = self.covering_tombstone(key, sequence);
        let start = InternalKey::for_lookup(
            Bytes::copy_from_slice(key),
            sequence,
            Arc::clone(&self.comparator),
        );

        let mut operands: Vec<Bytes> = Vec::new();
        let mut base: Option<Option<Bytes>> = None;

        for entry in self.table.range(start..) {
            let ikey = entry.key();
            if !ikey.same_user_key(key) {
                break;
            }
            if tombstone.map_or(false, |t| t > ikey.stamp()) {
                base = Some(None);
                break;
            }
            match ikey.value_type() {
                ValueType::Value => {
                    base = Some(Some(entry.value().clone()));
                    break;
                }
                ValueType::Deletion => {
                    base = Some(None);
                    break;
                }
                ValueType::Merge => operands.push(entry.value().clone()),
            }
        }

        if base.is_none() && tombstone.is_some() {
            base = Some(None);
        }
        operands.reverse();
        (base, operands)
    }

    /// Walk the versions of `key` visible at `sequence`, newest first.
    fn resolve(
        &self,
        key: &[u8],
        sequence: SequenceNumber,
        merge_operator: Option<&Arc<dyn MergeOperator>>,
        cf_name: &str,
    ) -> Result<Resolved> {
        let (base, operands) = self.visible_versions(key, sequence);

        if operands.is_empty() {
            return Ok(match base {
                Some(Some(value)) => Resolved::Value(value),
                Some(None) => Resolved::Deleted,
                None => Resolved::Absent,
            });
        }

        let op = merge_operator.ok_or_else(|| Error::MergeOperatorMissing(cf_name.to_string()))?;
        let existing = base.flatten();
        Ok(Resolved::Value(op.full_merge(
            key,
            existing.as_deref(),
            &operands,
        )?))
    }

    /// Look up a key at a specific sequence number.
    pub fn get(
        &self,
        key: &[u8],
        sequence: SequenceNumber,
        merge_operator: Option<&Arc<dyn MergeOperator>>,
        cf_name: &str,
    ) -> Result<LookupResult> {
        Ok(match self.resolve(key, sequence, merge_operator, cf_name)? {
            Resolved::Value(v) => LookupResult::Found(v),
            Resolved::Deleted => LookupResult::Deleted,
            Resolved::Absent => LookupResult::NotFound,
        })
    }

    /// Whether any version of `key` is stored, visible or not.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let start = InternalKey::for_lookup(
            Bytes::copy_from_slice(key),
            SequenceNumber::MAX,
            Arc::clone(&self.comparator),
        );
        self.table
            .range(start..)
            .next()
            .map_or(false, |e| e.key().same_user_key(key))
            || self
                .range_tombstones
                .read()
                .iter()
                .any(|t| self.covers(t, key))
    }

    /// Distinct user keys at or after `lower` and strictly before `upper`.
    fn user_keys(&self, lower: Option<&[u8]>, upper: Option<&[u8]>) -> Vec<Bytes> {
        let start = lower.map(|k| {
            InternalKey::for_lookup(
                Bytes::copy_from_slice(k),
                SequenceNumber::MAX,
                Arc::clone(&self.comparator),
            )
        });
        let iter: Box<dyn Iterator<Item = _>> = match start {
            Some(start) => Box::new(self.table.range(start..)),
            None => Box::new(self.table.iter()),
        };

        let mut keys: Vec<Bytes> = Vec::new();
        for entry in iter {
            let user_key = entry.key().user_key();
            if let Some(upper) = upper {
                if self.comparator.compare(user_key, upper) != Ordering::Less {
                    break;
                }
            }
            if keys.last().map_or(true, |last| !entry.key().same_user_key(last)) {
                keys.push(user_key.clone());
            }
        }
        keys
    }

    /// Every key visible at `sequence` in `[lower, upper)`, in comparator order.
    pub fn visible_entries(
        &self,
        sequence: SequenceNumber,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        merge_operator: Option<&Arc<dyn MergeOperator>>,
        cf_name: &str,
    ) -> Result<Vec<(Bytes, Bytes)>> {
        let mut out = Vec::new();
        for key in self.user_keys(lower, upper) {
            if let Resolved::Value(value) = self.resolve(&key, sequence, merge_operator, cf_name)? {
                out.push((key, value));
            }
        }
        Ok(out)
    }

    /// Every key visible at `sequence`, in comparator order, for rewriting
    /// into a fresh log.
    ///
    /// Merges are folded when `merge_operator` is set. Without one the base
    /// value and the pending operands are handed back as they are, so a
    /// family reopened without its operator still keeps its data.
    pub fn exported_entries(
        &self,
        sequence: SequenceNumber,
        merge_operator: Option<&Arc<dyn MergeOperator>>,
    ) -> Result<Vec<(Bytes, ExportedEntry)>> {
        let mut out = Vec::new();
        for key in self.user_keys(None, None) {
            let (base, operands) = self.visible_versions(&key, sequence);
            let entry = match (operands.is_empty(), merge_operator) {
                (true, _) => match base {
                    Some(Some(value)) => ExportedEntry::Value(value),
                    _ => continue,
                },
                (false, Some(op)) => {
                    ExportedEntry::Value(op.full_merge(&key, base.flatten().as_deref(), &operands)?)
                }
                (false, None) => ExportedEntry::Unmerged {
                    base: base.flatten(),
                    operands,
                },
            };
            out.push((key, entry));
        }
        Ok(out)
    }

    /// Drop versions in `[lower, upper)` that no read at or above `horizon`
    /// can observe.
    ///
    /// For each key, the state visible at `horizon` is collapsed into at most
    /// one plain value; newer versions are untouched. Returns the number of
    /// entries removed. Keys whose merges cannot be resolved are left alone.
    pub fn collect_garbage(
        &self,
        horizon: SequenceNumber,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        merge_operator: Option<&Arc<dyn MergeOperator>>,
        cf_name: &str,
    ) -> usize {
        let mut removed = 0;

        for key in self.user_keys(lower, upper) {
            let resolved = match self.resolve(&key, horizon, merge_operator, cf_name) {
                Ok(r) => r,
                Err(_) => continue,
            };

            let start = InternalKey::for_lookup(key.clone(), horizon, Arc::clone(&self.comparator));
            let old: Vec<(InternalKey, usize)> = self
                .table
                .range(start..)
                .take_while(|e| e.key().same_user_key(&key))
                .map(|e| (e.key().clone(), e.key().user_key().len() + e.value().len()))
                .collect();
            let Some((newest, _)) = old.first() else {
                continue;
            };
            let newest_stamp = newest.stamp();

            let keep_newest = match resolved {
                Resolved::Value(value) => {
                    // Replaces the entry at the same stamp.
                    self.table.insert(
                        InternalKey::new(
                            key.clone(),
                            newest_stamp,
                            ValueType::Value,
                            Arc::clone(&self.comparator),
                        ),
                        value,
                    );
                    true
                }
                Resolved::Deleted | Resolved::Absent => false,
            };

            for (ikey, size) in old {
                if keep_newest && ikey.stamp() == newest_stamp {
                    continue;
                }
                if self.table.remove(&ikey).is_some() {
                    removed += 1;
                    self.approximate_memory_usage
                        .fetch_sub(size + ENTRY_OVERHEAD, AtomicOrdering::Relaxed);
                }
            }
        }

        let mut tombstones = self.range_tombstones.write();
        let before = tombstones.len();
        tombstones.retain(|t| {
            let inside = lower.map_or(true, |l| self.comparator.compare(l, &t.begin) != Ordering::Greater)
                && upper.map_or(true, |u| self.comparator.compare(&t.end, u) != Ordering::Greater);
            !(inside && t.stamp.sequence <= horizon)
        });
        removed + (before - tombstones.len())
    }

    /// Get approximate memory usage in bytes.
    pub fn approximate_memory_usage(&self) -> usize {
        self.approximate_memory_usage.load(AtomicOrdering::Relaxed)
    }

    /// Number of stored point entries, all versions included.
    pub fn entry_count(&self) -> usize {
        self.table.len()
    }

    /// Number of stored point deletions.
    pub fn deletion_count(&self) -> usize {
        self.table
            .iter()
            .filter(|e| e.key().is_deletion())
            .count()
    }

    pub fn range_tombstone_count(&self) -> usize {
        self.range_tombstones.read().len()
    }

    /// Check if the memtable is empty.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty() && self.range_tombstones.read().is_empty()
    }

    /// Get the maximum sequence number.
    pub fn max_sequence(&self) -> SequenceNumber {
        self.max_sequence.load(AtomicOrdering::Relaxed)
    }
}
