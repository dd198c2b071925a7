//! Column families: named, isolated keyspaces sharing one sequence space.
//!
//! The database keeps a registry of live families. Callers hold
//! [`ColumnFamilyHandle`]s, which stay valid objects after the family is
//! dropped or the handle is closed but reject every further operation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;

use crate::memtable::MemTable;
use crate::merge::MergeOperator;
use crate::options::ColumnFamilyOptions;
use crate::util::comparator::Comparator;
use crate::{Error, Result};

/// Id of the `default` column family.
pub const DEFAULT_COLUMN_FAMILY_ID: u32 = 0;

/// Caller-side reference to a column family.
#[derive(Clone)]
pub struct ColumnFamilyHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    data: Arc<ColumnFamilyData>,
    closed: AtomicBool,
}

impl ColumnFamilyHandle {
    pub(crate) fn new(data: Arc<ColumnFamilyData>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                data,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> u32 {
        self.inner.data.id
    }

    /// Name as raw bytes; not required to be UTF-8.
    pub fn name(&self) -> &Bytes {
        &self.inner.data.name
    }

    /// Name rendered lossily for display.
    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.inner.data.name).into_owned()
    }

    pub fn comparator(&self) -> &Arc<dyn Comparator> {
        &self.inner.data.options.comparator
    }

    pub fn merge_operator(&self) -> Option<&Arc<dyn MergeOperator>> {
        self.inner.data.options.merge_operator.as_ref()
    }

    /// Close this handle. Other clones of the handle are closed too.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Whether the family behind this handle was dropped.
    pub fn is_dropped(&self) -> bool {
        self.inner.data.is_dropped()
    }

    /// Family data for a live handle.
    pub(crate) fn data(&self) -> Result<&Arc<ColumnFamilyData>> {
        if self.is_closed() || self.inner.data.is_dropped() {
            return Err(Error::HandleClosed("column family"));
        }
        Ok(&self.inner.data)
    }
}

impl fmt::Debug for ColumnFamilyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnFamilyHandle")
            .field("id", &self.id())
            .field("name", &self.name_lossy())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// State of one column family.
#[derive(Debug)]
pub(crate) struct ColumnFamilyData {
    pub id: u32,
    pub name: Bytes,
    pub options: ColumnFamilyOptions,
    pub memtable: MemTable,
    dropped: AtomicBool,
}

impl ColumnFamilyData {
    pub fn new(id: u32, name: Bytes, options: ColumnFamilyOptions) -> Self {
        let memtable = MemTable::new(Arc::clone(&options.comparator));
        Self {
            id,
            name,
            options,
            memtable,
            dropped: AtomicBool::new(false),
        }
    }

    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    pub fn merge_operator(&self) -> Option<&Arc<dyn MergeOperator>> {
        self.options.merge_operator.as_ref()
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    pub fn mark_dropped(&self) {
        self.dropped.store(true, Ordering::Release);
    }
}

/// Registry of live column families.
///
/// Readers load the current map without locking; writers (create/drop,
/// serialized by the database) swap in a new map. Ids are never reused.
pub(crate) struct ColumnFamilySet {
    families: ArcSwap<BTreeMap<u32, Arc<ColumnFamilyData>>>,
    next_id: AtomicU32,
}

impl ColumnFamilySet {
    pub fn new(next_id: u32) -> Self {
        Self {
            families: ArcSwap::from_pointee(BTreeMap::new()),
            next_id: AtomicU32::new(next_id),
        }
    }

    pub fn get(&self, id: u32) -> Option<Arc<ColumnFamilyData>> {
        self.families.load().get(&id).cloned()
    }

    pub fn get_by_name(&self, name: &[u8]) -> Option<Arc<ColumnFamilyData>> {
        self.families
            .load()
            .values()
            .find(|cf| cf.name.as_ref() == name)
            .cloned()
    }

    /// Every live family, by id.
    pub fn all(&self) -> Vec<Arc<ColumnFamilyData>> {
        self.families.load().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.families.load().len()
    }

    /// Reserve a fresh id.
    pub fn allocate_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_id(&self) -> u32 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Add a family. Ids seen here push `next_id` past them.
    pub fn insert(&self, data: Arc<ColumnFamilyData>) {
        self.next_id.fetch_max(data.id + 1, Ordering::SeqCst);
        self.families.rcu(|current| {
            let mut next = BTreeMap::clone(current);
            next.insert(data.id, Arc::clone(&data));
            next
        });
    }

    pub fn remove(&self, id: u32) -> Option<Arc<ColumnFamilyData>> {
        let removed = self.get(id)?;
        self.families.rcu(|current| {
            let mut next = BTreeMap::clone(current);
            next.remove(&id);
            next
        });
        Some(removed)
    }
}

/// Summary of one column family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnFamilyMetadata {
    pub name: Bytes,
    /// Approximate bytes held in memory.
    pub size: u64,
    /// Point entries stored, all versions included.
    pub entry_count: u64,
    /// Number of live log files backing the database.
    pub log_files: u64,
}
