//! SequenceManager - publishes commit sequence numbers and hands out
//! snapshots.
//!
//! Writers run under the database write lock, take `next_sequence()`, apply
//! their batch, then `publish()` it. Readers only ever see published
//! sequences, so a batch becomes visible all at once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::types::SequenceNumber;

use super::snapshot::{Snapshot, SnapshotList};

/// Tracks the last committed sequence and the live snapshots.
#[derive(Debug)]
pub(crate) struct SequenceManager {
    last_sequence: AtomicU64,
    snapshots: Arc<SnapshotList>,
}

impl SequenceManager {
    pub fn new(last_sequence: SequenceNumber) -> Self {
        Self {
            last_sequence: AtomicU64::new(last_sequence),
            snapshots: Arc::new(SnapshotList::new()),
        }
    }

    /// Last published sequence.
    pub fn last_sequence(&self) -> SequenceNumber {
        self.last_sequence.load(Ordering::Acquire)
    }

    /// Sequence the next commit will use. Caller holds the write lock.
    pub fn next_sequence(&self) -> SequenceNumber {
        self.last_sequence() + 1
    }

    /// Make `sequence` visible to readers. Caller holds the write lock.
    pub fn publish(&self, sequence: SequenceNumber) {
        debug_assert_eq!(sequence, self.next_sequence());
        self.last_sequence.store(sequence, Ordering::Release);
    }

    /// Pin the current sequence.
    pub fn snapshot(&self) -> Snapshot {
        let mut guard = self.snapshots.lock();
        let sequence = self.last_sequence();
        Snapshot::register(sequence, &self.snapshots, &mut guard)
    }

    /// Oldest sequence any current or future reader can ask for.
    pub fn gc_horizon(&self) -> SequenceNumber {
        let guard = self.snapshots.lock();
        match guard.keys().next() {
            Some(oldest) => *oldest,
            None => self.last_sequence(),
        }
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.count()
    }

    pub fn oldest_snapshot(&self) -> Option<SequenceNumber> {
        self.snapshots.oldest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_increments_by_one() {
        let mgr = SequenceManager::new(0);
        assert_eq!(mgr.last_sequence(), 0);

        for expected in 1..=5 {
            let seq = mgr.next_sequence();
            assert_eq!(seq, expected);
            mgr.publish(seq);
        }
        assert_eq!(mgr.last_sequence(), 5);
    }

    #[test]
    fn test_unpublished_sequence_is_reused() {
        let mgr = SequenceManager::new(3);
        let seq = mgr.next_sequence();
        // Nothing published: a failed commit leaves no gap.
        assert_eq!(mgr.next_sequence(), seq);
        assert_eq!(mgr.last_sequence(), 3);
    }

    #[test]
    fn test_snapshot_pins_last_sequence() {
        let mgr = SequenceManager::new(0);
        mgr.publish(1);
        let snap = mgr.snapshot();
        mgr.publish(2);

        assert_eq!(snap.sequence_number(), 1);
        assert_eq!(mgr.snapshot_count(), 1);
        assert_eq!(mgr.oldest_snapshot(), Some(1));
        assert_eq!(mgr.gc_horizon(), 1);

        drop(snap);
        assert_eq!(mgr.snapshot_count(), 0);
        assert_eq!(mgr.gc_horizon(), 2);
    }
}
