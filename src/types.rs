//! Core types for kvcore.

use bytes::Bytes;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::util::comparator::Comparator;

/// Sequence number of a committed batch.
pub type SequenceNumber = u64;

/// Value type indicator in internal keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueType {
    /// Normal value.
    Value = 1,
    /// Deletion marker (tombstone). Single deletes are stored this way too.
    Deletion = 2,
    /// Merge operand.
    Merge = 3,
}

impl ValueType {
    /// Create from byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(ValueType::Value),
            2 => Some(ValueType::Deletion),
            3 => Some(ValueType::Merge),
            _ => None,
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Check if this is a deletion marker.
    pub fn is_deletion(&self) -> bool {
        matches!(self, ValueType::Deletion)
    }
}

/// Position of a record in commit order: the batch sequence number plus the
/// record's offset inside that batch.
///
/// All records of one batch share a sequence number; the offset keeps the
/// later record of the batch newer than the earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stamp {
    pub sequence: SequenceNumber,
    pub offset: u32,
}

impl Stamp {
    pub fn new(sequence: SequenceNumber, offset: u32) -> Self {
        Self { sequence, offset }
    }

    /// Newest stamp visible to a read at `sequence`.
    pub fn read_bound(sequence: SequenceNumber) -> Self {
        Self {
            sequence,
            offset: u32::MAX,
        }
    }
}

/// Memtable key: user key ordered by the column family comparator, then
/// newest stamp first.
#[derive(Clone)]
pub struct InternalKey {
    user_key: Bytes,
    stamp: Stamp,
    value_type: ValueType,
    comparator: Arc<dyn Comparator>,
}

impl InternalKey {
    pub fn new(
        user_key: impl Into<Bytes>,
        stamp: Stamp,
        value_type: ValueType,
        comparator: Arc<dyn Comparator>,
    ) -> Self {
        Self {
            user_key: user_key.into(),
            stamp,
            value_type,
            comparator,
        }
    }

    /// Seek key positioned before every version of `user_key` visible at
    /// `sequence`.
    pub fn for_lookup(
        user_key: impl Into<Bytes>,
        sequence: SequenceNumber,
        comparator: Arc<dyn Comparator>,
    ) -> Self {
        Self::new(
            user_key,
            Stamp::read_bound(sequence),
            ValueType::Value,
            comparator,
        )
    }

    /// Get the user key.
    pub fn user_key(&self) -> &Bytes {
        &self.user_key
    }

    pub fn stamp(&self) -> Stamp {
        self.stamp
    }

    /// Get the sequence number.
    pub fn sequence(&self) -> SequenceNumber {
        self.stamp.sequence
    }

    /// Get the value type.
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Check if this is a deletion marker.
    pub fn is_deletion(&self) -> bool {
        self.value_type.is_deletion()
    }

    /// Whether `other` names the same user key under this key's comparator.
    pub fn same_user_key(&self, other: &[u8]) -> bool {
        self.comparator.compare(&self.user_key, other) == Ordering::Equal
    }
}

impl fmt::Debug for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalKey")
            .field("user_key", &self.user_key)
            .field("sequence", &self.stamp.sequence)
            .field("offset", &self.stamp.offset)
            .field("value_type", &self.value_type)
            .finish()
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.comparator
            .compare(&self.user_key, &other.user_key)
            // Same user key: newer stamp sorts first
            .then_with(|| other.stamp.cmp(&self.stamp))
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for InternalKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for InternalKey {}

/// Result of a lookup operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    /// Value found.
    Found(Bytes),
    /// Key was deleted (tombstone found).
    Deleted,
    /// Key not found.
    NotFound,
}

impl LookupResult {
    /// Check if a value was found.
    pub fn is_found(&self) -> bool {
        matches!(self, LookupResult::Found(_))
    }

    /// Get the value if found.
    pub fn value(&self) -> Option<&Bytes> {
        match self {
            LookupResult::Found(v) => Some(v),
            _ => None,
        }
    }

    /// Convert to Option<Bytes>.
    pub fn into_option(self) -> Option<Bytes> {
        match self {
            LookupResult::Found(v) => Some(v),
            _ => None,
        }
    }
}
