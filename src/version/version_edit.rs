//! VersionEdit - describes changes to the catalog.

use bytes::{BufMut, Bytes, BytesMut};

use crate::util::coding::{encode_length_prefixed, encode_varint32, encode_varint64, Decoder};
use crate::{Error, Result};

use super::EditTag;

/// A column family as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedColumnFamily {
    pub id: u32,
    pub name: Bytes,
    /// Name of the comparator the family was created with.
    pub comparator: String,
}

/// A VersionEdit describes one change to the catalog.
///
/// Fields left as `None` are unchanged by the edit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionEdit {
    /// First log file still needed for recovery.
    pub log_number: Option<u64>,
    /// Next file number to allocate.
    pub next_file_number: Option<u64>,
    /// Last sequence number covered by the logs.
    pub last_sequence: Option<u64>,
    /// Next column family id to allocate.
    pub next_column_family_id: Option<u32>,
    pub added_column_families: Vec<PersistedColumnFamily>,
    pub dropped_column_families: Vec<u32>,
}

impl VersionEdit {
    /// Create a new empty edit.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_log_number(&mut self, num: u64) {
        self.log_number = Some(num);
    }

    pub fn set_next_file_number(&mut self, num: u64) {
        self.next_file_number = Some(num);
    }

    pub fn set_last_sequence(&mut self, seq: u64) {
        self.last_sequence = Some(seq);
    }

    pub fn set_next_column_family_id(&mut self, id: u32) {
        self.next_column_family_id = Some(id);
    }

    /// Record a new column family.
    pub fn add_column_family(&mut self, id: u32, name: Bytes, comparator: impl Into<String>) {
        self.added_column_families.push(PersistedColumnFamily {
            id,
            name,
            comparator: comparator.into(),
        });
    }

    /// Record a dropped column family.
    pub fn drop_column_family(&mut self, id: u32) {
        self.dropped_column_families.push(id);
    }

    /// Check if the edit is empty.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Encode the edit to bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);

        if let Some(num) = self.log_number {
            buf.put_u8(EditTag::LogNumber.to_byte());
            encode_varint64(&mut buf, num);
        }
        if let Some(num) = self.next_file_number {
            buf.put_u8(EditTag::NextFileNumber.to_byte());
            encode_varint64(&mut buf, num);
        }
        if let Some(seq) = self.last_sequence {
            buf.put_u8(EditTag::LastSequence.to_byte());
            encode_varint64(&mut buf, seq);
        }
        if let Some(id) = self.next_column_family_id {
            buf.put_u8(EditTag::NextColumnFamilyId.to_byte());
            encode_varint32(&mut buf, id);
        }
        for cf in &self.added_column_families {
            buf.put_u8(EditTag::AddColumnFamily.to_byte());
            encode_varint32(&mut buf, cf.id);
            encode_length_prefixed(&mut buf, &cf.name);
            encode_length_prefixed(&mut buf, cf.comparator.as_bytes());
        }
        for &id in &self.dropped_column_families {
            buf.put_u8(EditTag::DropColumnFamily.to_byte());
            encode_varint32(&mut buf, id);
        }

        buf.freeze()
    }

    /// Decode an edit from bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut edit = VersionEdit::new();
        let mut dec = Decoder::new(data, "version edit");

        while !dec.is_empty() {
            let tag = dec.u8("tag")?;
            let tag = EditTag::from_byte(tag)
                .ok_or_else(|| Error::corruption(format!("unknown edit tag: {}", tag)))?;

            match tag {
                EditTag::LogNumber => edit.log_number = Some(dec.varint64("log number")?),
                EditTag::NextFileNumber => {
                    edit.next_file_number = Some(dec.varint64("next file number")?)
                }
                EditTag::LastSequence => {
                    edit.last_sequence = Some(dec.varint64("last sequence")?)
                }
                EditTag::NextColumnFamilyId => {
                    edit.next_column_family_id = Some(dec.varint32("next column family id")?)
                }
                EditTag::AddColumnFamily => {
                    let id = dec.varint32("column family id")?;
                    let name = dec.length_prefixed("column family name")?;
                    let comparator = dec.string("comparator name")?;
                    edit.add_column_family(id, name, comparator);
                }
                EditTag::DropColumnFamily => {
                    edit.drop_column_family(dec.varint32("column family id")?)
                }
            }
        }

        Ok(edit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_edit() {
        let edit = VersionEdit::new();
        assert!(edit.is_empty());
        assert!(edit.encode().is_empty());
        assert_eq!(VersionEdit::decode(&[]).unwrap(), edit);
    }

    #[test]
    fn test_edit_encode_decode() {
        let mut edit = VersionEdit::new();
        edit.set_log_number(7);
        edit.set_next_file_number(9);
        edit.set_last_sequence(1 << 40);
        edit.set_next_column_family_id(3);
        edit.add_column_family(0, Bytes::from("default"), "kvcore.BytewiseComparator");
        edit.add_column_family(2, Bytes::from_static(b"\xffraw\x00name"), "custom");
        edit.drop_column_family(1);

        let decoded = VersionEdit::decode(&edit.encode()).unwrap();
        assert_eq!(decoded, edit);
        assert!(!decoded.is_empty());
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let err = VersionEdit::decode(&[42]).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let mut edit = VersionEdit::new();
        edit.add_column_family(5, Bytes::from("users"), "cmp");
        let data = edit.encode();
        let err = VersionEdit::decode(&data[..data.len() - 1]).unwrap_err();
        assert!(err.is_corruption());
    }
}
