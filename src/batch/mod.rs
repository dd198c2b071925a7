//! Write batches: ordered mutation records applied atomically.
//!
//! A [`WriteBatch`] is an append-only list of records. Applying it consumes
//! exactly one sequence number; records are applied in append order, so a
//! later record for the same key wins over an earlier one.
//!
//! # Encoding
//!
//! ```text
//! [record count: fixed32]
//! [record: tag (1) | cf id (varint32, absent for log data) | fields (length-prefixed)]
//! ...
//! ```

mod indexed;
mod iterator;

pub use indexed::IndexedWriteBatch;
pub use iterator::{WriteBatchIterator, WriteEntry, WriteType};

use bytes::{BufMut, Bytes, BytesMut};

use crate::column_family::{ColumnFamilyHandle, DEFAULT_COLUMN_FAMILY_ID};
use crate::util::coding::{encode_length_prefixed, encode_varint32, varint_length, Decoder};
use crate::{Error, Result};

const HEADER_SIZE: usize = 4;
const EMPTY: &[u8] = &[];

const TAG_PUT: u8 = 1;
const TAG_DELETE: u8 = 2;
const TAG_SINGLE_DELETE: u8 = 3;
const TAG_DELETE_RANGE: u8 = 4;
const TAG_MERGE: u8 = 5;
const TAG_LOG_DATA: u8 = 6;

/// One mutation record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchRecord {
    Put { cf: u32, key: Bytes, value: Bytes },
    Delete { cf: u32, key: Bytes },
    SingleDelete { cf: u32, key: Bytes },
    /// Deletes every key in `[begin, end)`.
    DeleteRange { cf: u32, begin: Bytes, end: Bytes },
    Merge { cf: u32, key: Bytes, operand: Bytes },
    /// Out-of-band payload; logged but never applied.
    LogData(Bytes),
}

impl BatchRecord {
    fn tag(&self) -> u8 {
        match self {
            BatchRecord::Put { .. } => TAG_PUT,
            BatchRecord::Delete { .. } => TAG_DELETE,
            BatchRecord::SingleDelete { .. } => TAG_SINGLE_DELETE,
            BatchRecord::DeleteRange { .. } => TAG_DELETE_RANGE,
            BatchRecord::Merge { .. } => TAG_MERGE,
            BatchRecord::LogData(_) => TAG_LOG_DATA,
        }
    }

    /// Target column family, `None` for log data.
    pub fn column_family(&self) -> Option<u32> {
        match self {
            BatchRecord::Put { cf, .. }
            | BatchRecord::Delete { cf, .. }
            | BatchRecord::SingleDelete { cf, .. }
            | BatchRecord::DeleteRange { cf, .. }
            | BatchRecord::Merge { cf, .. } => Some(*cf),
            BatchRecord::LogData(_) => None,
        }
    }

    /// The key the record is indexed under. Range deletes use their start.
    pub fn key(&self) -> Option<&Bytes> {
        match self {
            BatchRecord::Put { key, .. }
            | BatchRecord::Delete { key, .. }
            | BatchRecord::SingleDelete { key, .. }
            | BatchRecord::Merge { key, .. } => Some(key),
            BatchRecord::DeleteRange { begin, .. } => Some(begin),
            BatchRecord::LogData(_) => None,
        }
    }

    /// Whether the record mutates a keyspace and so counts toward `count()`.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, BatchRecord::LogData(_))
    }

    fn fields(&self) -> (Option<u32>, [&[u8]; 2], usize) {
        match self {
            BatchRecord::Put { cf, key, value } => (Some(*cf), [&key[..], &value[..]], 2),
            BatchRecord::Delete { cf, key } | BatchRecord::SingleDelete { cf, key } => {
                (Some(*cf), [&key[..], EMPTY], 1)
            }
            BatchRecord::DeleteRange { cf, begin, end } => {
                (Some(*cf), [&begin[..], &end[..]], 2)
            }
            BatchRecord::Merge { cf, key, operand } => (Some(*cf), [&key[..], &operand[..]], 2),
            BatchRecord::LogData(blob) => (None, [&blob[..], EMPTY], 1),
        }
    }

    fn encoded_len(&self) -> usize {
        let (cf, fields, n) = self.fields();
        1 + cf.map_or(0, |id| varint_length(id as u64))
            + fields[..n]
                .iter()
                .map(|f| varint_length(f.len() as u64) + f.len())
                .sum::<usize>()
    }

    fn encode_to(&self, buf: &mut BytesMut) {
        let (cf, fields, n) = self.fields();
        buf.put_u8(self.tag());
        if let Some(id) = cf {
            encode_varint32(buf, id);
        }
        for field in &fields[..n] {
            encode_length_prefixed(buf, field);
        }
    }

    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self> {
        let tag = dec.u8("record tag")?;
        if tag == TAG_LOG_DATA {
            return Ok(BatchRecord::LogData(dec.length_prefixed("log data")?));
        }

        let cf = dec.varint32("column family")?;
        let record = match tag {
            TAG_PUT => BatchRecord::Put {
                cf,
                key: dec.length_prefixed("key")?,
                value: dec.length_prefixed("value")?,
            },
            TAG_DELETE => BatchRecord::Delete {
                cf,
                key: dec.length_prefixed("key")?,
            },
            TAG_SINGLE_DELETE => BatchRecord::SingleDelete {
                cf,
                key: dec.length_prefixed("key")?,
            },
            TAG_DELETE_RANGE => BatchRecord::DeleteRange {
                cf,
                begin: dec.length_prefixed("range begin")?,
                end: dec.length_prefixed("range end")?,
            },
            TAG_MERGE => BatchRecord::Merge {
                cf,
                key: dec.length_prefixed("key")?,
                operand: dec.length_prefixed("operand")?,
            },
            other => {
                return Err(Error::corruption(format!(
                    "write batch: unknown record tag {}",
                    other
                )))
            }
        };
        Ok(record)
    }
}

/// Callbacks for replaying a batch in record order.
///
/// Every method defaults to doing nothing, so handlers only implement the
/// record kinds they care about.
pub trait WriteBatchHandler {
    fn put(&mut self, _cf: u32, _key: &Bytes, _value: &Bytes) -> Result<()> {
        Ok(())
    }

    fn delete(&mut self, _cf: u32, _key: &Bytes) -> Result<()> {
        Ok(())
    }

    fn single_delete(&mut self, cf: u32, key: &Bytes) -> Result<()> {
        self.delete(cf, key)
    }

    fn delete_range(&mut self, _cf: u32, _begin: &Bytes, _end: &Bytes) -> Result<()> {
        Ok(())
    }

    fn merge(&mut self, _cf: u32, _key: &Bytes, _operand: &Bytes) -> Result<()> {
        Ok(())
    }

    fn log_data(&mut self, _blob: &Bytes) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SavePoint {
    records: usize,
    count: usize,
    data_size: usize,
}

/// A batch of write operations to be applied atomically.
#[derive(Debug, Clone)]
pub struct WriteBatch {
    records: Vec<BatchRecord>,
    /// Records that mutate a keyspace.
    count: usize,
    /// Size of the encoded form.
    data_size: usize,
    /// Column family targeted by the non-`_cf` methods.
    default_cf: u32,
    save_points: Vec<SavePoint>,
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            count: 0,
            data_size: HEADER_SIZE,
            default_cf: DEFAULT_COLUMN_FAMILY_ID,
            save_points: Vec::new(),
        }
    }
}

impl AsRef<WriteBatch> for WriteBatch {
    fn as_ref(&self) -> &WriteBatch {
        self
    }
}

impl WriteBatch {
    /// Create a new empty write batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a write batch with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Create a batch whose non-`_cf` methods target `cf`.
    pub fn for_column_family(cf: &ColumnFamilyHandle) -> Self {
        Self {
            default_cf: cf.id(),
            ..Self::default()
        }
    }

    /// Column family targeted by `put`, `delete` and friends.
    pub fn default_column_family(&self) -> u32 {
        self.default_cf
    }

    pub(crate) fn push(&mut self, record: BatchRecord) {
        if record.is_mutation() {
            self.count += 1;
        }
        self.data_size += record.encoded_len();
        self.records.push(record);
    }

    /// Add a put operation to the batch.
    pub fn put(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        let cf = self.default_cf;
        self.push(BatchRecord::Put {
            cf,
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn put_cf(&mut self, cf: &ColumnFamilyHandle, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.push(BatchRecord::Put {
            cf: cf.id(),
            key: key.into(),
            value: value.into(),
        });
    }

    /// Add a delete operation to the batch.
    pub fn delete(&mut self, key: impl Into<Bytes>) {
        let cf = self.default_cf;
        self.push(BatchRecord::Delete { cf, key: key.into() });
    }

    pub fn delete_cf(&mut self, cf: &ColumnFamilyHandle, key: impl Into<Bytes>) {
        self.push(BatchRecord::Delete {
            cf: cf.id(),
            key: key.into(),
        });
    }

    /// Delete a key that was put at most once since its last deletion.
    pub fn single_delete(&mut self, key: impl Into<Bytes>) {
        let cf = self.default_cf;
        self.push(BatchRecord::SingleDelete { cf, key: key.into() });
    }

    pub fn single_delete_cf(&mut self, cf: &ColumnFamilyHandle, key: impl Into<Bytes>) {
        self.push(BatchRecord::SingleDelete {
            cf: cf.id(),
            key: key.into(),
        });
    }

    /// Delete every key in `[begin, end)`.
    pub fn delete_range(&mut self, begin: impl Into<Bytes>, end: impl Into<Bytes>) {
        let cf = self.default_cf;
        self.push(BatchRecord::DeleteRange {
            cf,
            begin: begin.into(),
            end: end.into(),
        });
    }

    pub fn delete_range_cf(
        &mut self,
        cf: &ColumnFamilyHandle,
        begin: impl Into<Bytes>,
        end: impl Into<Bytes>,
    ) {
        self.push(BatchRecord::DeleteRange {
            cf: cf.id(),
            begin: begin.into(),
            end: end.into(),
        });
    }

    /// Add a merge operand for `key`.
    pub fn merge(&mut self, key: impl Into<Bytes>, operand: impl Into<Bytes>) {
        let cf = self.default_cf;
        self.push(BatchRecord::Merge {
            cf,
            key: key.into(),
            operand: operand.into(),
        });
    }

    pub fn merge_cf(&mut self, cf: &ColumnFamilyHandle, key: impl Into<Bytes>, operand: impl Into<Bytes>) {
        self.push(BatchRecord::Merge {
            cf: cf.id(),
            key: key.into(),
            operand: operand.into(),
        });
    }

    /// Attach a payload that is logged with the batch but never applied.
    pub fn put_log_data(&mut self, blob: impl Into<Bytes>) {
        self.push(BatchRecord::LogData(blob.into()));
    }

    /// Clear the batch, including its save points.
    pub fn clear(&mut self) {
        self.records.clear();
        self.save_points.clear();
        self.count = 0;
        self.data_size = HEADER_SIZE;
    }

    /// Number of records that mutate a keyspace. Log data is not counted.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Check if the batch holds no records at all.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in append order, log data included.
    pub fn records(&self) -> &[BatchRecord] {
        &self.records
    }

    pub fn has_put(&self) -> bool {
        self.records.iter().any(|r| matches!(r, BatchRecord::Put { .. }))
    }

    pub fn has_delete(&self) -> bool {
        self.records.iter().any(|r| matches!(r, BatchRecord::Delete { .. }))
    }

    pub fn has_single_delete(&self) -> bool {
        self.records
            .iter()
            .any(|r| matches!(r, BatchRecord::SingleDelete { .. }))
    }

    pub fn has_delete_range(&self) -> bool {
        self.records
            .iter()
            .any(|r| matches!(r, BatchRecord::DeleteRange { .. }))
    }

    pub fn has_merge(&self) -> bool {
        self.records.iter().any(|r| matches!(r, BatchRecord::Merge { .. }))
    }

    /// Size in bytes of the encoded batch.
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// The encoded batch.
    pub fn data(&self) -> Bytes {
        self.encode()
    }

    /// Remember the current end of the batch.
    pub fn set_save_point(&mut self) {
        self.save_points.push(SavePoint {
            records: self.records.len(),
            count: self.count,
            data_size: self.data_size,
        });
    }

    /// Drop every record appended since the most recent save point, and pop it.
    pub fn rollback_to_save_point(&mut self) -> Result<()> {
        let sp = self.save_points.pop().ok_or(Error::NoSavePoint)?;
        self.records.truncate(sp.records);
        self.count = sp.count;
        self.data_size = sp.data_size;
        Ok(())
    }

    /// Pop the most recent save point without rolling back.
    pub fn pop_save_point(&mut self) -> Result<()> {
        self.save_points.pop().map(|_| ()).ok_or(Error::NoSavePoint)
    }

    /// Replay the records, in append order, into `handler`.
    pub fn iterate<H: WriteBatchHandler + ?Sized>(&self, handler: &mut H) -> Result<()> {
        for record in &self.records {
            match record {
                BatchRecord::Put { cf, key, value } => handler.put(*cf, key, value)?,
                BatchRecord::Delete { cf, key } => handler.delete(*cf, key)?,
                BatchRecord::SingleDelete { cf, key } => handler.single_delete(*cf, key)?,
                BatchRecord::DeleteRange { cf, begin, end } => {
                    handler.delete_range(*cf, begin, end)?
                }
                BatchRecord::Merge { cf, key, operand } => handler.merge(*cf, key, operand)?,
                BatchRecord::LogData(blob) => handler.log_data(blob)?,
            }
        }
        Ok(())
    }

    /// Encode the batch for the log.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.data_size);
        buf.put_u32_le(self.records.len() as u32);
        for record in &self.records {
            record.encode_to(&mut buf);
        }
        buf.freeze()
    }

    /// Decode a batch from its encoded form.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(data, "write batch");
        let n = dec.fixed32("record count")? as usize;

        let mut batch = WriteBatch::with_capacity(n.min(dec.remaining()));
        for _ in 0..n {
            batch.push(BatchRecord::decode_from(&mut dec)?);
        }

        if !dec.is_empty() {
            return Err(Error::corruption("write batch: trailing bytes"));
        }
        Ok(batch)
    }
}
