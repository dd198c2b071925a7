//! Manifest - Append-only log of VersionEdits.
//!
//! The manifest uses the same block-based format as the WAL, one edit per
//! record. Every edit is synced before it is applied in memory.

use std::path::Path;

use crate::options::SyncMode;
use crate::util::filename::manifest_file_path;
use crate::wal::{WalReader, WalWriter};
use crate::Result;

use super::VersionEdit;

/// Manifest file writer.
pub struct ManifestWriter {
    log: WalWriter,
}

impl ManifestWriter {
    /// Create a new manifest file in `db_path`.
    pub fn create(db_path: &Path, manifest_number: u64) -> Result<Self> {
        let path = manifest_file_path(db_path, manifest_number);
        Ok(Self {
            log: WalWriter::create(&path, manifest_number, SyncMode::Always)?,
        })
    }

    pub fn manifest_number(&self) -> u64 {
        self.log.file_number()
    }

    /// Append an edit and sync it.
    pub fn add_edit(&mut self, edit: &VersionEdit) -> Result<()> {
        self.log.add_record(&edit.encode(), true)
    }

    pub fn close(self) -> Result<()> {
        self.log.close()
    }
}

/// Manifest file reader.
pub struct ManifestReader {
    log: WalReader,
}

impl ManifestReader {
    /// Open the manifest numbered `manifest_number` in `db_path`.
    pub fn open(db_path: &Path, manifest_number: u64) -> Result<Self> {
        let path = manifest_file_path(db_path, manifest_number);
        Ok(Self {
            log: WalReader::open(&path, manifest_number)?,
        })
    }

    /// Set whether checksum errors should be fatal.
    pub fn set_checksum_errors_fatal(&mut self, fatal: bool) {
        self.log.set_checksum_errors_fatal(fatal);
    }

    /// Read the next edit.
    pub fn read_edit(&mut self) -> Result<Option<VersionEdit>> {
        match self.log.read_record()? {
            Some(record) => Ok(Some(VersionEdit::decode(&record)?)),
            None => Ok(None),
        }
    }

    /// Read all remaining edits.
    pub fn read_all_edits(&mut self) -> Result<Vec<VersionEdit>> {
        let mut edits = Vec::new();
        while let Some(edit) = self.read_edit()? {
            edits.push(edit);
        }
        Ok(edits)
    }
}
