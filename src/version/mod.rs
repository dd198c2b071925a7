//! Persistent catalog of the database.
//!
//! The version system provides:
//! - **VersionEdit**: a delta to the catalog (column families added or
//!   dropped, log number, counters)
//! - **Manifest**: append-only log of VersionEdits, framed like the WAL
//! - **VersionSet**: the current catalog, recovered from the manifest named
//!   by `CURRENT` and updated through `log_and_apply`
//!
//! # Recovery
//!
//! On startup:
//! 1. Read CURRENT file to find active manifest
//! 2. Replay all VersionEdits from manifest
//! 3. Replay every log numbered at or after the recovered log number

mod manifest;
mod version_edit;
mod version_set;

pub use manifest::{ManifestReader, ManifestWriter};
pub use version_edit::{PersistedColumnFamily, VersionEdit};
pub use version_set::VersionSet;
pub(crate) use version_set::write_manifest;

/// Tag values for encoding VersionEdit fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EditTag {
    /// First log still needed for recovery.
    LogNumber = 2,
    /// Next file number.
    NextFileNumber = 3,
    /// Last sequence number.
    LastSequence = 4,
    /// Next column family id to hand out.
    NextColumnFamilyId = 5,
    /// Column family created (id, name, comparator name).
    AddColumnFamily = 6,
    /// Column family dropped (id).
    DropColumnFamily = 7,
}

impl EditTag {
    /// Create from byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            2 => Some(EditTag::LogNumber),
            3 => Some(EditTag::NextFileNumber),
            4 => Some(EditTag::LastSequence),
            5 => Some(EditTag::NextColumnFamilyId),
            6 => Some(EditTag::AddColumnFamily),
            7 => Some(EditTag::DropColumnFamily),
            _ => None,
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_tag_roundtrip() {
        for tag in [
            EditTag::LogNumber,
            EditTag::NextFileNumber,
            EditTag::LastSequence,
            EditTag::NextColumnFamilyId,
            EditTag::AddColumnFamily,
            EditTag::DropColumnFamily,
        ] {
            assert_eq!(EditTag::from_byte(tag.to_byte()), Some(tag));
        }
        assert_eq!(EditTag::from_byte(1), None);
    }
}
