//! Backup metadata files.
//!
//! # Format
//!
//! ```text
//! [magic: fixed32]
//! [backup id: varint32]
//! [timestamp (unix seconds): varint64]
//! [sequence: varint64]
//! [app metadata: length-prefixed]
//! [file count: varint32]
//! [file: name (length-prefixed) | size (varint64) | crc32 (fixed32)]
//! ...
//! [crc32 of everything above: fixed32]
//! ```

use std::fs;
use std::io::Write;
use std::path::Path;

use bytes::{BufMut, Bytes, BytesMut};

use crate::util::coding::{encode_length_prefixed, encode_varint32, encode_varint64, Decoder};
use crate::util::crc::{crc32, crc32_stream};
use crate::{Error, Result};

const META_MAGIC: u32 = 0x6b76_626b;

/// One file copied into a backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BackupFile {
    pub name: String,
    pub size: u64,
    pub crc: u32,
}

impl BackupFile {
    /// Describe the file at `path` as it is on disk now.
    pub fn describe(path: &Path, name: String) -> Result<Self> {
        let (size, crc) = crc32_stream(fs::File::open(path)?)?;
        Ok(Self { name, size, crc })
    }
}

/// Everything persisted about one backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BackupMeta {
    pub id: u32,
    pub timestamp: u64,
    pub sequence: u64,
    pub app_metadata: Bytes,
    pub files: Vec<BackupFile>,
}

impl BackupMeta {
    pub fn size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32_le(META_MAGIC);
        encode_varint32(&mut buf, self.id);
        encode_varint64(&mut buf, self.timestamp);
        encode_varint64(&mut buf, self.sequence);
        encode_length_prefixed(&mut buf, &self.app_metadata);
        encode_varint32(&mut buf, self.files.len() as u32);
        for file in &self.files {
            encode_length_prefixed(&mut buf, file.name.as_bytes());
            encode_varint64(&mut buf, file.size);
            buf.put_u32_le(file.crc);
        }
        let crc = crc32(&buf);
        buf.put_u32_le(crc);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let Some(body_len) = data.len().checked_sub(4) else {
            return Err(Error::corruption("backup meta: truncated"));
        };
        let (body, trailer) = data.split_at(body_len);
        let expected = Decoder::new(trailer, "backup meta").fixed32("checksum")?;
        let actual = crc32(body);
        if expected != actual {
            return Err(Error::CrcMismatch { expected, actual });
        }

        let mut dec = Decoder::new(body, "backup meta");
        if dec.fixed32("magic")? != META_MAGIC {
            return Err(Error::invalid_format("backup meta: bad magic"));
        }
        let id = dec.varint32("id")?;
        let timestamp = dec.varint64("timestamp")?;
        let sequence = dec.varint64("sequence")?;
        let app_metadata = dec.length_prefixed("app metadata")?;

        let count = dec.varint32("file count")? as usize;
        let mut files = Vec::with_capacity(count.min(dec.remaining()));
        for _ in 0..count {
            files.push(BackupFile {
                name: dec.string("file name")?,
                size: dec.varint64("file size")?,
                crc: dec.fixed32("file crc")?,
            });
        }
        if !dec.is_empty() {
            return Err(Error::corruption("backup meta: trailing bytes"));
        }

        Ok(Self {
            id,
            timestamp,
            sequence,
            app_metadata,
            files,
        })
    }

    /// Write to `path` through a temp file and a rename.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let mut tmp_name = path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp = Path::new(&tmp_name);

        let mut file = fs::File::create(tmp)?;
        file.write_all(&self.encode())?;
        file.sync_all()?;
        fs::rename(tmp, path)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        Self::decode(&fs::read(path)?)
    }
}
