//! WAL writer implementation.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::options::SyncMode;
use crate::util::crc::crc32_multi;
use crate::Result;

use super::{RecordType, BLOCK_SIZE, HEADER_SIZE};

const ZEROES: [u8; HEADER_SIZE] = [0; HEADER_SIZE];

/// WAL writer for durable logging.
///
/// Each `add_record` reaches the operating system before it returns; whether
/// it also reaches the disk depends on the sync mode and the caller.
pub struct WalWriter {
    writer: BufWriter<File>,
    /// Current position within the current block.
    block_offset: usize,
    sync_mode: SyncMode,
    bytes_since_sync: usize,
    bytes_written: u64,
    file_number: u64,
}

impl WalWriter {
    /// Create (or truncate) a log file.
    pub fn create(path: &Path, file_number: u64, sync_mode: SyncMode) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            writer: BufWriter::with_capacity(BLOCK_SIZE, file),
            block_offset: 0,
            sync_mode,
            bytes_since_sync: 0,
            bytes_written: 0,
            file_number,
        })
    }

    /// Get the file number.
    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Bytes written to this log so far.
    pub fn size(&self) -> u64 {
        self.bytes_written
    }

    /// Append one logical record, fragmenting it across blocks as needed.
    ///
    /// `sync` forces an fsync regardless of the sync mode.
    pub fn add_record(&mut self, data: &[u8], sync: bool) -> Result<()> {
        let mut rest = data;
        let mut begin = true;

        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                // Trailer too small for a header: pad it out.
                self.write_raw(&ZEROES[..leftover])?;
                self.block_offset = 0;
            }

            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_length = rest.len().min(avail);
            let end = fragment_length == rest.len();

            let record_type = match (begin, end) {
                (true, true) => RecordType::Full,
                (true, false) => RecordType::First,
                (false, true) => RecordType::Last,
                (false, false) => RecordType::Middle,
            };

            self.emit_physical_record(record_type, &rest[..fragment_length])?;
            rest = &rest[fragment_length..];
            begin = false;
            if end {
                break;
            }
        }

        self.writer.flush()?;
        if sync || self.sync_due() {
            self.sync()?;
        }
        Ok(())
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        self.bytes_since_sync += bytes.len();
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    /// Write a physical record (header + data).
    fn emit_physical_record(&mut self, record_type: RecordType, data: &[u8]) -> Result<()> {
        debug_assert!(data.len() <= 0xFFFF);
        debug_assert!(self.block_offset + HEADER_SIZE + data.len() <= BLOCK_SIZE);

        let type_byte = [record_type.to_byte()];
        let crc = crc32_multi(&[&type_byte[..], data]);

        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&crc.to_le_bytes());
        header[4..6].copy_from_slice(&(data.len() as u16).to_le_bytes());
        header[6] = type_byte[0];

        self.write_raw(&header)?;
        self.write_raw(data)?;
        self.block_offset += HEADER_SIZE + data.len();
        Ok(())
    }

    fn sync_due(&self) -> bool {
        match self.sync_mode {
            SyncMode::Always => true,
            SyncMode::Bytes { bytes } => self.bytes_since_sync >= bytes,
            SyncMode::None => false,
        }
    }

    /// Force a sync to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.bytes_since_sync = 0;
        Ok(())
    }

    /// Flush buffered data (but don't sync to disk).
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush, sync and close the writer.
    pub fn close(mut self) -> Result<()> {
        self.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_writer_create() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000001.log");

        let writer = WalWriter::create(&path, 1, SyncMode::None).unwrap();
        assert_eq!(writer.file_number(), 1);
        assert_eq!(writer.size(), 0);
    }

    #[test]
    fn test_record_visible_without_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000001.log");

        let mut writer = WalWriter::create(&path, 1, SyncMode::None).unwrap();
        writer.add_record(b"hello world", false).unwrap();

        // Flushed to the OS even though the writer is still open.
        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, (HEADER_SIZE + 11) as u64);
        assert_eq!(writer.size(), len);
    }

    #[test]
    fn test_writer_large_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000001.log");

        let mut writer = WalWriter::create(&path, 1, SyncMode::None).unwrap();
        let large_data = vec![b'x'; BLOCK_SIZE * 2];
        writer.add_record(&large_data, false).unwrap();
        writer.close().unwrap();

        let metadata = std::fs::metadata(&path).unwrap();
        assert!(metadata.len() >= (BLOCK_SIZE * 2) as u64);
    }

    #[test]
    fn test_writer_pads_block_trailer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000001.log");

        let mut writer = WalWriter::create(&path, 1, SyncMode::Bytes { bytes: 1 }).unwrap();
        // Leaves 3 bytes in the first block.
        writer
            .add_record(&vec![b'a'; BLOCK_SIZE - HEADER_SIZE - 3], false)
            .unwrap();
        writer.add_record(b"next", false).unwrap();
        writer.close().unwrap();

        let len = std::fs::metadata(&path).unwrap().len() as usize;
        assert_eq!(len, BLOCK_SIZE + HEADER_SIZE + 4);
    }

    #[test]
    fn test_writer_empty_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000001.log");

        let mut writer = WalWriter::create(&path, 1, SyncMode::Always).unwrap();
        writer.add_record(b"", true).unwrap();
        assert_eq!(writer.size(), HEADER_SIZE as u64);
    }
}
