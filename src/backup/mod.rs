//! Backups of a live database.
//!
//! A backup directory looks like:
//!
//! ```text
//! <backup dir>/
//!   NEXT_ID          next backup id, never reused
//!   meta/<id>        metadata: timestamp, sequence, app metadata, file list
//!   private/<id>/    the backed-up database files
//! ```
//!
//! Each backup's files are a checkpoint of the database. A backup only
//! counts once its metadata file exists; directories under `private/`
//! without one are leftovers that [`BackupEngine::garbage_collect`] removes.

mod meta;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::checkpoint::Checkpoint;
use crate::db::Database;
use crate::util::filename::{
    create_dir_if_missing, current_file_path, delete_file, list_db_files, parse_file_name,
    sync_dir, FileType,
};
use crate::{Error, Result};

use meta::{BackupFile, BackupMeta};

const NEXT_ID_FILE: &str = "NEXT_ID";
const META_DIR: &str = "meta";
const PRIVATE_DIR: &str = "private";

/// Public summary of one backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupInfo {
    pub backup_id: u32,
    /// Creation time, unix seconds.
    pub timestamp: u64,
    /// Sequence number the backup reflects.
    pub sequence: u64,
    /// Total bytes of backed-up files.
    pub size: u64,
    pub number_files: u32,
    pub app_metadata: Bytes,
}

impl BackupMeta {
    fn info(&self) -> BackupInfo {
        BackupInfo {
            backup_id: self.id,
            timestamp: self.timestamp,
            sequence: self.sequence,
            size: self.size(),
            number_files: self.files.len() as u32,
            app_metadata: self.app_metadata.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct EngineState {
    next_id: u32,
    backups: BTreeMap<u32, BackupMeta>,
    /// Ids whose metadata could not be read.
    corrupted: BTreeSet<u32>,
}

/// Creates, verifies, restores and prunes backups in one directory.
///
/// Operations on one engine are serialized.
#[derive(Debug)]
pub struct BackupEngine {
    backup_dir: PathBuf,
    state: Mutex<EngineState>,
}

impl BackupEngine {
    /// Open (creating if needed) the backup directory at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let backup_dir = path.as_ref().to_path_buf();
        create_dir_if_missing(&backup_dir.join(META_DIR))?;
        create_dir_if_missing(&backup_dir.join(PRIVATE_DIR))?;

        let mut state = EngineState::default();
        for entry in fs::read_dir(backup_dir.join(META_DIR))? {
            let entry = entry?;
            let Some(id) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };
            match BackupMeta::read_from(&entry.path()) {
                Ok(meta) if meta.id == id => {
                    state.backups.insert(id, meta);
                }
                Ok(_) => {
                    warn!(backup = id, "Backup metadata names another id");
                    state.corrupted.insert(id);
                }
                Err(e) => {
                    warn!(backup = id, error = %e, "Unreadable backup metadata");
                    state.corrupted.insert(id);
                }
            }
        }

        let highest = state
            .backups
            .keys()
            .chain(state.corrupted.iter())
            .max()
            .map_or(0, |id| *id);
        state.next_id = read_next_id(&backup_dir)?.unwrap_or(1).max(highest + 1);

        debug!(
            path = %backup_dir.display(),
            backups = state.backups.len(),
            corrupted = state.corrupted.len(),
            next_id = state.next_id,
            "Opened backup engine"
        );
        Ok(Self {
            backup_dir,
            state: Mutex::new(state),
        })
    }

    fn meta_path(&self, id: u32) -> PathBuf {
        self.backup_dir.join(META_DIR).join(id.to_string())
    }

    fn private_path(&self, id: u32) -> PathBuf {
        self.backup_dir.join(PRIVATE_DIR).join(id.to_string())
    }

    /// Back up `db`, flushing it first. Returns the new backup id.
    pub fn create_new_backup(&self, db: &Database) -> Result<u32> {
        self.create_new_backup_with_metadata(db, Bytes::new(), true)
    }

    /// Back up `db` with opaque application metadata attached.
    pub fn create_new_backup_with_metadata(
        &self,
        db: &Database,
        app_metadata: impl Into<Bytes>,
        flush_before_backup: bool,
    ) -> Result<u32> {
        if flush_before_backup && !db.is_read_only() {
            db.flush()?;
        }

        let mut state = self.state.lock();
        let id = state.next_id;
        // The id is spent before anything is written for it.
        write_next_id(&self.backup_dir, id + 1)?;
        state.next_id = id + 1;

        let private = self.private_path(id);
        match self.write_backup(db, id, &private, app_metadata.into()) {
            Ok(meta) => {
                info!(
                    backup = id,
                    sequence = meta.sequence,
                    files = meta.files.len(),
                    size = meta.size(),
                    "Created backup"
                );
                state.backups.insert(id, meta);
                Ok(id)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&private) {
                    debug!(backup = id, error = %cleanup, "No partial backup to remove");
                }
                Err(e)
            }
        }
    }

    fn write_backup(
        &self,
        db: &Database,
        id: u32,
        private: &Path,
        app_metadata: Bytes,
    ) -> Result<BackupMeta> {
        if private.exists() {
            fs::remove_dir_all(private)?;
        }
        let sequence = Checkpoint::new(db)?.create_checkpoint(private)?;

        let mut files = Vec::new();
        for path in list_db_files(private)? {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            files.push(BackupFile::describe(&path, name.to_string())?);
        }

        let meta = BackupMeta {
            id,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            sequence,
            app_metadata,
            files,
        };
        meta.write_to(&self.meta_path(id))?;
        sync_dir(&self.backup_dir.join(META_DIR))?;
        Ok(meta)
    }

    /// Every intact backup, oldest first.
    pub fn backup_info(&self) -> Vec<BackupInfo> {
        self.state.lock().backups.values().map(BackupMeta::info).collect()
    }

    /// Ids of backups whose metadata is unreadable.
    pub fn corrupted_backups(&self) -> Vec<u32> {
        self.state.lock().corrupted.iter().copied().collect()
    }

    /// Delete all but the newest `num_backups_to_keep` backups.
    pub fn purge_old_backups(&self, num_backups_to_keep: usize) -> Result<()> {
        let mut state = self.state.lock();
        let excess = state.backups.len().saturating_sub(num_backups_to_keep);
        let doomed: Vec<u32> = state.backups.keys().take(excess).copied().collect();
        for id in doomed {
            self.remove_backup_files(id)?;
            state.backups.remove(&id);
            info!(backup = id, "Purged backup");
        }
        Ok(())
    }

    pub fn delete_backup(&self, backup_id: u32) -> Result<()> {
        let mut state = self.state.lock();
        let known = state.backups.contains_key(&backup_id) || state.corrupted.contains(&backup_id);
        if !known {
            return Err(Error::BackupNotFound(backup_id));
        }
        self.remove_backup_files(backup_id)?;
        state.backups.remove(&backup_id);
        state.corrupted.remove(&backup_id);
        info!(backup = backup_id, "Deleted backup");
        Ok(())
    }

    /// Metadata goes first so a crash leaves at worst an orphaned directory.
    fn remove_backup_files(&self, id: u32) -> Result<()> {
        delete_file(&self.meta_path(id))?;
        let private = self.private_path(id);
        if private.exists() {
            fs::remove_dir_all(&private)?;
        }
        Ok(())
    }

    /// Check that every file of a backup is present with the recorded size
    /// and checksum.
    pub fn verify_backup(&self, backup_id: u32) -> Result<()> {
        let meta = self
            .state
            .lock()
            .backups
            .get(&backup_id)
            .cloned()
            .ok_or(Error::BackupNotFound(backup_id))?;
        self.verify_files(&meta)
    }

    fn verify_files(&self, meta: &BackupMeta) -> Result<()> {
        let private = self.private_path(meta.id);
        for file in &meta.files {
            let path = private.join(&file.name);
            if !path.is_file() {
                return Err(Error::corruption(format!(
                    "backup {}: missing file {}",
                    meta.id, file.name
                )));
            }
            let actual = BackupFile::describe(&path, file.name.clone())?;
            if actual.size != file.size {
                return Err(Error::corruption(format!(
                    "backup {}: {} is {} bytes, expected {}",
                    meta.id, file.name, actual.size, file.size
                )));
            }
            if actual.crc != file.crc {
                return Err(Error::CrcMismatch {
                    expected: file.crc,
                    actual: actual.crc,
                });
            }
        }
        Ok(())
    }

    /// Restore the newest backup into `db_dir`.
    pub fn restore_from_latest_backup(&self, db_dir: impl AsRef<Path>) -> Result<()> {
        let latest = self
            .state
            .lock()
            .backups
            .keys()
            .next_back()
            .copied()
            .ok_or_else(|| Error::invalid_argument("no backups to restore"))?;
        self.restore_from_backup(latest, db_dir)
    }

    /// Restore backup `backup_id` into `db_dir`.
    ///
    /// Database files already in `db_dir` are replaced; files the database
    /// does not recognize are left alone. The database must not be open.
    pub fn restore_from_backup(&self, backup_id: u32, db_dir: impl AsRef<Path>) -> Result<()> {
        let db_dir = db_dir.as_ref();
        let meta = self
            .state
            .lock()
            .backups
            .get(&backup_id)
            .cloned()
            .ok_or(Error::BackupNotFound(backup_id))?;
        self.verify_files(&meta)?;

        create_dir_if_missing(db_dir)?;
        for path in list_db_files(db_dir)? {
            let lock = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_file_name)
                .is_some_and(|(ft, _)| ft == FileType::Lock);
            if !lock {
                delete_file(&path)?;
            }
        }

        // CURRENT goes last: until it exists the directory is not a database.
        let private = self.private_path(backup_id);
        let (current, rest): (Vec<&BackupFile>, Vec<&BackupFile>) =
            meta.files.iter().partition(|f| f.name == "CURRENT");
        for file in rest {
            fs::copy(private.join(&file.name), db_dir.join(&file.name))?;
        }
        sync_dir(db_dir)?;
        for file in current {
            fs::copy(private.join(&file.name), current_file_path(db_dir))?;
        }
        sync_dir(db_dir)?;

        info!(backup = backup_id, dest = %db_dir.display(), "Restored backup");
        Ok(())
    }

    /// Remove leftovers: private directories without metadata, corrupted
    /// backups, and stray temp files.
    pub fn garbage_collect(&self) -> Result<()> {
        let mut state = self.state.lock();

        let corrupted: Vec<u32> = state.corrupted.iter().copied().collect();
        for id in corrupted {
            self.remove_backup_files(id)?;
            state.corrupted.remove(&id);
            info!(backup = id, "Removed corrupted backup");
        }

        for entry in fs::read_dir(self.backup_dir.join(META_DIR))? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().ends_with(".tmp") {
                delete_file(&entry.path())?;
            }
        }

        for entry in fs::read_dir(self.backup_dir.join(PRIVATE_DIR))? {
            let entry = entry?;
            let id = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok());
            let live = id.is_some_and(|id| state.backups.contains_key(&id));
            if !live {
                let path = entry.path();
                if path.is_dir() {
                    fs::remove_dir_all(&path)?;
                } else {
                    delete_file(&path)?;
                }
                debug!(path = %path.display(), "Removed orphaned backup data");
            }
        }
        Ok(())
    }
}

fn read_next_id(backup_dir: &Path) -> Result<Option<u32>> {
    let path = backup_dir.join(NEXT_ID_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)?;
    content
        .trim()
        .parse::<u32>()
        .map(Some)
        .map_err(|_| Error::corruption(format!("{}: {:?}", NEXT_ID_FILE, content.trim())))
}

fn write_next_id(backup_dir: &Path, next_id: u32) -> Result<()> {
    let path = backup_dir.join(NEXT_ID_FILE);
    let tmp = backup_dir.join(format!("{}.tmp", NEXT_ID_FILE));
    fs::write(&tmp, format!("{}\n", next_id))?;
    fs::File::open(&tmp)?.sync_all()?;
    fs::rename(&tmp, &path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_next_id_file() {
        let dir = tempdir().unwrap();
        assert_eq!(read_next_id(dir.path()).unwrap(), None);
        write_next_id(dir.path(), 12).unwrap();
        assert_eq!(read_next_id(dir.path()).unwrap(), Some(12));

        fs::write(dir.path().join(NEXT_ID_FILE), "twelve").unwrap();
        assert!(read_next_id(dir.path()).unwrap_err().is_corruption());
    }

    #[test]
    fn test_open_empty_backup_dir() {
        let dir = tempdir().unwrap();
        let engine = BackupEngine::open(dir.path().join("backups")).unwrap();
        assert!(engine.backup_info().is_empty());
        assert!(engine.corrupted_backups().is_empty());
        assert_eq!(engine.verify_backup(1).unwrap_err(), Error::BackupNotFound(1));
        assert_eq!(engine.delete_backup(1).unwrap_err(), Error::BackupNotFound(1));
    }

    #[test]
    fn test_unreadable_meta_is_reported() {
        let dir = tempdir().unwrap();
        {
            BackupEngine::open(dir.path()).unwrap();
        }
        fs::write(dir.path().join(META_DIR).join("4"), b"garbage").unwrap();
        fs::create_dir(dir.path().join(PRIVATE_DIR).join("4")).unwrap();

        let engine = BackupEngine::open(dir.path()).unwrap();
        assert_eq!(engine.corrupted_backups(), vec![4]);

        engine.garbage_collect().unwrap();
        assert!(engine.corrupted_backups().is_empty());
        assert!(!dir.path().join(PRIVATE_DIR).join("4").exists());
    }
}
