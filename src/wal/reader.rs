//! WAL reader implementation.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bytes::Bytes;
use tracing::warn;

use crate::util::crc::crc32_multi;
use crate::{Error, Result};

use super::{RecordType, BLOCK_SIZE, HEADER_SIZE};

/// WAL reader for recovery.
///
/// Reads records from a WAL file, reassembling fragmented records and
/// verifying CRC checksums. A record cut short at the end of the file is a
/// torn write and ends the log quietly.
pub struct WalReader {
    reader: BufReader<File>,
    /// Current block buffer.
    buffer: Vec<u8>,
    /// Current position within the buffer.
    buffer_offset: usize,
    /// Valid bytes in the buffer.
    buffer_size: usize,
    eof: bool,
    /// Whether to report corruption or skip the damaged block.
    checksum_errors_are_fatal: bool,
    /// Bytes skipped because of damage.
    dropped_bytes: u64,
    file_number: u64,
}

impl WalReader {
    /// Open a log file for reading.
    pub fn open(path: &Path, file_number: u64) -> Result<Self> {
        let file = File::open(path)?;

        Ok(Self {
            reader: BufReader::with_capacity(BLOCK_SIZE, file),
            buffer: vec![0u8; BLOCK_SIZE],
            buffer_offset: 0,
            buffer_size: 0,
            eof: false,
            checksum_errors_are_fatal: true,
            dropped_bytes: 0,
            file_number,
        })
    }

    /// Set whether checksum errors should be fatal.
    pub fn set_checksum_errors_fatal(&mut self, fatal: bool) {
        self.checksum_errors_are_fatal = fatal;
    }

    /// Get the file number.
    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Bytes skipped over damaged regions.
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    /// Read the next record.
    ///
    /// Returns None when there are no more records.
    pub fn read_record(&mut self) -> Result<Option<Bytes>> {
        let mut scratch: Vec<u8> = Vec::new();
        let mut in_fragmented_record = false;

        loop {
            let Some((record_type, data)) = self.read_physical_record()? else {
                // An unfinished fragmented record at EOF is a torn write.
                return Ok(None);
            };

            match record_type {
                RecordType::Full => {
                    if in_fragmented_record {
                        self.report("partial record without end", scratch.len())?;
                    }
                    return Ok(Some(data));
                }
                RecordType::First => {
                    if in_fragmented_record {
                        self.report("partial record without end", scratch.len())?;
                    }
                    scratch.clear();
                    scratch.extend_from_slice(&data);
                    in_fragmented_record = true;
                }
                RecordType::Middle | RecordType::Last => {
                    if !in_fragmented_record {
                        self.report("missing start of fragmented record", data.len())?;
                        continue;
                    }
                    scratch.extend_from_slice(&data);
                    if record_type == RecordType::Last {
                        return Ok(Some(Bytes::from(scratch)));
                    }
                }
                RecordType::Zero => {}
            }
        }
    }

    /// Either fail or count the damage and carry on.
    fn report(&mut self, reason: &str, bytes: usize) -> Result<()> {
        if self.checksum_errors_are_fatal {
            return Err(Error::corruption(format!(
                "log {:06}: {}",
                self.file_number, reason
            )));
        }
        warn!(log = self.file_number, reason, bytes, "Skipping damaged log data");
        self.dropped_bytes += bytes as u64;
        Ok(())
    }

    /// Read a physical record from the current position.
    fn read_physical_record(&mut self) -> Result<Option<(RecordType, Bytes)>> {
        loop {
            if self.buffer_offset + HEADER_SIZE > self.buffer_size {
                // Anything left is block padding.
                if !self.read_block()? {
                    return Ok(None);
                }
                continue;
            }

            let header = &self.buffer[self.buffer_offset..self.buffer_offset + HEADER_SIZE];
            let crc_expected = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let length = u16::from_le_bytes([header[4], header[5]]) as usize;
            let type_byte = header[6];

            if type_byte == RecordType::Zero.to_byte() && length == 0 {
                // Pre-allocated space.
                self.buffer_offset = self.buffer_size;
                continue;
            }

            if self.buffer_offset + HEADER_SIZE + length > self.buffer_size {
                if self.eof {
                    // Truncated record at end of file
                    return Ok(None);
                }
                let skipped = self.buffer_size - self.buffer_offset;
                self.buffer_offset = self.buffer_size;
                self.report("bad record length", skipped)?;
                continue;
            }

            let data_start = self.buffer_offset + HEADER_SIZE;
            let data_end = data_start + length;
            let data = &self.buffer[data_start..data_end];

            let crc_actual = crc32_multi(&[&[type_byte][..], data]);
            if crc_expected != crc_actual {
                if self.checksum_errors_are_fatal {
                    return Err(Error::CrcMismatch {
                        expected: crc_expected,
                        actual: crc_actual,
                    });
                }
                let skipped = self.buffer_size - self.buffer_offset;
                self.buffer_offset = self.buffer_size;
                self.report("checksum mismatch", skipped)?;
                continue;
            }

            let Some(record_type) = RecordType::from_byte(type_byte) else {
                let skipped = HEADER_SIZE + length;
                self.buffer_offset = data_end;
                self.report("unknown record type", skipped)?;
                continue;
            };

            let data = Bytes::copy_from_slice(data);
            self.buffer_offset = data_end;
            return Ok(Some((record_type, data)));
        }
    }

    /// Fill the buffer with the next block. Only the final block is short.
    fn read_block(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }

        let mut filled = 0;
        while filled < BLOCK_SIZE {
            let n = self.reader.read(&mut self.buffer[filled..])?;
            if n == 0 {
                self.eof = true;
                break;
            }
            filled += n;
        }

        self.buffer_offset = 0;
        self.buffer_size = filled;
        Ok(filled > 0)
    }

    /// Iterate the remaining records.
    pub fn records(&mut self) -> WalRecords<'_> {
        WalRecords { reader: self }
    }
}

/// Iterator over WAL records.
pub struct WalRecords<'a> {
    reader: &'a mut WalReader,
}

impl Iterator for WalRecords<'_> {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.read_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::super::WalWriter;
    use super::*;
    use crate::options::SyncMode;
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::tempdir;

    fn write_log(path: &Path, records: &[Vec<u8>]) {
        let mut writer = WalWriter::create(path, 1, SyncMode::None).unwrap();
        for record in records {
            writer.add_record(record, false).unwrap();
        }
        writer.close().unwrap();
    }

    fn read_all(path: &Path) -> Vec<Bytes> {
        let mut reader = WalReader::open(path, 1).unwrap();
        reader.records().collect::<Result<Vec<_>>>().unwrap()
    }

    #[test]
    fn test_reader_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000001.log");
        write_log(&path, &[]);

        let mut reader = WalReader::open(&path, 1).unwrap();
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_reader_mixed_sizes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000001.log");

        let records: Vec<Vec<u8>> = vec![
            b"small".to_vec(),
            vec![b'x'; 1000],
            Vec::new(),
            vec![b'y'; BLOCK_SIZE + 100],
            (0..BLOCK_SIZE * 3).map(|i| (i % 251) as u8).collect(),
            b"end".to_vec(),
        ];
        write_log(&path, &records);

        let read = read_all(&path);
        assert_eq!(read.len(), records.len());
        for (got, expected) in read.iter().zip(&records) {
            assert_eq!(&got[..], &expected[..]);
        }
    }

    #[test]
    fn test_torn_tail_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000001.log");
        write_log(&path, &[b"first".to_vec(), vec![b'z'; 500]]);

        let len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 100).unwrap();

        let read = read_all(&path);
        assert_eq!(read, vec![Bytes::from("first")]);
    }

    #[test]
    fn test_checksum_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000001.log");
        write_log(&path, &[b"first".to_vec(), b"second".to_vec()]);

        // Flip a payload byte of the first record.
        let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
        file.write_all(b"F").unwrap();
        drop(file);

        let mut reader = WalReader::open(&path, 1).unwrap();
        let err = reader.read_record().unwrap_err();
        assert!(matches!(err, Error::CrcMismatch { .. }));

        let mut lenient = WalReader::open(&path, 1).unwrap();
        lenient.set_checksum_errors_fatal(false);
        // The damaged block is skipped whole.
        assert!(lenient.read_record().unwrap().is_none());
        assert!(lenient.dropped_bytes() > 0);
    }
}
