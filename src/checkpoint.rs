//! Checkpoints: a consistent, openable copy of a live database.
//!
//! The copy is written as a fresh database directory holding one manifest
//! (the column family catalog) and one log with the whole state at a single
//! sequence number. It is staged under `<dest>.tmp` and renamed into place,
//! so a crash never leaves a half-written checkpoint at `dest`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::db::Database;
use crate::options::SyncMode;
use crate::util::filename::{log_file_path, sync_dir};
use crate::version::{write_manifest, VersionEdit};
use crate::wal::{encode_batch_record, WalWriter};
use crate::{Error, Result};

const CHECKPOINT_LOG_NUMBER: u64 = 2;
const CHECKPOINT_MANIFEST_NUMBER: u64 = 3;

/// Creates checkpoints of one open database.
#[derive(Debug)]
pub struct Checkpoint<'a> {
    db: &'a Database,
}

impl<'a> Checkpoint<'a> {
    pub fn new(db: &'a Database) -> Result<Self> {
        if db.is_closed() {
            return Err(Error::HandleClosed("database"));
        }
        Ok(Self { db })
    }

    /// Write a checkpoint to `dest`, which must not exist yet.
    ///
    /// Returns the sequence number the checkpoint reflects.
    pub fn create_checkpoint(&self, dest: impl AsRef<Path>) -> Result<u64> {
        let dest = dest.as_ref();
        if dest.exists() {
            return Err(Error::DatabaseExists(dest.display().to_string()));
        }

        let snapshot = self.db.snapshot()?;
        let sequence = snapshot.sequence_number();
        let state = self.db.export_state(sequence)?;
        snapshot.release();

        let staging = staging_path(dest);
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        let mut wal = WalWriter::create(
            &log_file_path(&staging, CHECKPOINT_LOG_NUMBER),
            CHECKPOINT_LOG_NUMBER,
            SyncMode::Always,
        )?;
        if !state.is_empty() {
            wal.add_record(&encode_batch_record(sequence, &state), true)?;
        }
        wal.close()?;

        let mut edit = VersionEdit::new();
        edit.set_log_number(CHECKPOINT_LOG_NUMBER);
        edit.set_next_file_number(CHECKPOINT_MANIFEST_NUMBER + 1);
        edit.set_last_sequence(sequence);
        edit.set_next_column_family_id(self.db.next_column_family_id());
        for cf in self.db.live_catalog() {
            edit.add_column_family(cf.id, cf.name, cf.comparator);
        }
        write_manifest(&staging, CHECKPOINT_MANIFEST_NUMBER, &edit)?.close()?;

        sync_dir(&staging)?;
        fs::rename(&staging, dest)?;

        info!(
            source = %self.db.path().display(),
            dest = %dest.display(),
            sequence,
            records = state.count(),
            "Created checkpoint"
        );
        Ok(sequence)
    }
}

fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}
