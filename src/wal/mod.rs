//! Write-Ahead Log (WAL) for durability.
//!
//! Every committed batch is appended to the live log before it reaches a
//! memtable. On open, logs at or after the manifest's log number are
//! replayed in order to rebuild the memtables.
//!
//! # Format
//!
//! The WAL uses a block-based format with 32KB blocks. Each physical record:
//! - CRC32 of type + payload (4 bytes, little endian)
//! - Length (2 bytes, little endian)
//! - Record type (1 byte): FULL, FIRST, MIDDLE, LAST
//! - Payload (variable)
//!
//! Large records that don't fit in a single block are fragmented across
//! multiple blocks using FIRST, MIDDLE, and LAST record types. The manifest
//! reuses the same framing.
//!
//! A logical log record is `[sequence: fixed64][encoded write batch]`.

mod reader;
mod writer;

pub use reader::WalReader;
pub use writer::WalWriter;

use bytes::{BufMut, Bytes, BytesMut};

use crate::batch::WriteBatch;
use crate::types::SequenceNumber;
use crate::util::coding::Decoder;
use crate::Result;

/// Block size for WAL (32KB).
pub const BLOCK_SIZE: usize = 32 * 1024;

/// Header size: CRC (4) + Length (2) + Type (1) = 7 bytes.
pub const HEADER_SIZE: usize = 7;

/// Record types for WAL entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Zero is reserved for pre-allocated files.
    Zero = 0,
    /// Complete record in a single fragment.
    Full = 1,
    /// First fragment of a record.
    First = 2,
    /// Middle fragment(s) of a record.
    Middle = 3,
    /// Last fragment of a record.
    Last = 4,
}

impl RecordType {
    /// Create from byte value.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(RecordType::Zero),
            1 => Some(RecordType::Full),
            2 => Some(RecordType::First),
            3 => Some(RecordType::Middle),
            4 => Some(RecordType::Last),
            _ => None,
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Frame a committed batch for the log.
pub fn encode_batch_record(sequence: SequenceNumber, batch: &WriteBatch) -> Bytes {
    let encoded = batch.encode();
    let mut buf = BytesMut::with_capacity(8 + encoded.len());
    buf.put_u64_le(sequence);
    buf.extend_from_slice(&encoded);
    buf.freeze()
}

/// Split a log record into its sequence and batch.
pub fn decode_batch_record(data: &[u8]) -> Result<(SequenceNumber, WriteBatch)> {
    let mut dec = Decoder::new(data, "log record");
    let sequence = dec.fixed64("sequence")?;
    let batch = WriteBatch::decode(&data[8..])?;
    Ok((sequence, batch))
}
