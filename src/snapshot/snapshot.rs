//! Snapshot - point-in-time view of the database.
//!
//! A snapshot captures a sequence number at creation time. All reads
//! through the snapshot see a consistent view as of that sequence.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::types::SequenceNumber;
use crate::{Error, Result};

/// A snapshot of the database at a specific sequence number.
///
/// Clones share one registration: releasing any clone releases the
/// snapshot for all of them. Dropping the last clone releases it too.
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
}

struct SnapshotInner {
    sequence: SequenceNumber,
    released: AtomicBool,
    list: Arc<SnapshotList>,
}

impl SnapshotInner {
    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.list.remove(self.sequence);
        }
    }
}

impl Drop for SnapshotInner {
    fn drop(&mut self) {
        self.release();
    }
}

impl Snapshot {
    /// Register a snapshot at `sequence` in `list`.
    ///
    /// The caller must hold the list guard so registration is atomic with
    /// reading the sequence.
    pub(crate) fn register(
        sequence: SequenceNumber,
        list: &Arc<SnapshotList>,
        guard: &mut MutexGuard<'_, BTreeMap<SequenceNumber, usize>>,
    ) -> Self {
        *guard.entry(sequence).or_insert(0) += 1;
        Self {
            inner: Arc::new(SnapshotInner {
                sequence,
                released: AtomicBool::new(false),
                list: Arc::clone(list),
            }),
        }
    }

    /// Get the sequence number for this snapshot.
    pub fn sequence_number(&self) -> SequenceNumber {
        self.inner.sequence
    }

    /// Release the snapshot. Later reads through it fail.
    pub fn release(&self) {
        self.inner.release();
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Sequence to read at, or `HandleClosed` once released.
    pub(crate) fn read_sequence(&self) -> Result<SequenceNumber> {
        if self.is_released() {
            return Err(Error::HandleClosed("snapshot"));
        }
        Ok(self.inner.sequence)
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("sequence", &self.inner.sequence)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Live snapshots, counted per sequence.
///
/// Compaction reads the oldest entry to know which versions must survive.
#[derive(Debug, Default)]
pub struct SnapshotList {
    sequences: Mutex<BTreeMap<SequenceNumber, usize>>,
}

impl SnapshotList {
    /// Create a new empty snapshot list.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, BTreeMap<SequenceNumber, usize>> {
        self.sequences.lock()
    }

    fn remove(&self, sequence: SequenceNumber) {
        let mut sequences = self.sequences.lock();
        if let Some(count) = sequences.get_mut(&sequence) {
            *count -= 1;
            if *count == 0 {
                sequences.remove(&sequence);
            }
        }
    }

    /// Get the number of active snapshots.
    pub fn count(&self) -> usize {
        self.sequences.lock().values().sum()
    }

    /// Get the oldest active snapshot sequence.
    pub fn oldest(&self) -> Option<SequenceNumber> {
        self.sequences.lock().keys().next().copied()
    }
}
