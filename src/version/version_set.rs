//! VersionSet - the live catalog and its manifest.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::column_family::DEFAULT_COLUMN_FAMILY_ID;
use crate::util::filename::{
    current_file_path, delete_file, manifest_file_path, read_current_manifest_number,
    set_current_file,
};
use crate::{Error, Result};

use super::{ManifestReader, ManifestWriter, PersistedColumnFamily, VersionEdit};

/// Manages the persisted catalog.
///
/// The VersionSet tracks:
/// - Column families with their comparator names
/// - Next file number for allocation
/// - First log needed for recovery
/// - Active manifest file
pub struct VersionSet {
    db_path: PathBuf,
    families: RwLock<BTreeMap<u32, PersistedColumnFamily>>,
    next_file_number: AtomicU64,
    /// Last sequence recorded in the manifest. Logs carry anything newer.
    last_sequence: AtomicU64,
    log_number: AtomicU64,
    next_column_family_id: AtomicU32,
    manifest: Mutex<Option<ManifestWriter>>,
    manifest_number: AtomicU64,
}

impl VersionSet {
    /// Create an empty VersionSet for `db_path`.
    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
            families: RwLock::new(BTreeMap::new()),
            // 1 is the first manifest
            next_file_number: AtomicU64::new(2),
            last_sequence: AtomicU64::new(0),
            log_number: AtomicU64::new(0),
            next_column_family_id: AtomicU32::new(DEFAULT_COLUMN_FAMILY_ID + 1),
            manifest: Mutex::new(None),
            manifest_number: AtomicU64::new(0),
        }
    }

    /// Get the database path.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Get next file number and increment.
    pub fn new_file_number(&self) -> u64 {
        self.next_file_number.fetch_add(1, Ordering::SeqCst)
    }

    /// Get current next file number without incrementing.
    pub fn next_file_number(&self) -> u64 {
        self.next_file_number.load(Ordering::SeqCst)
    }

    /// Mark a file number as used.
    pub fn mark_file_number_used(&self, num: u64) {
        self.next_file_number.fetch_max(num + 1, Ordering::SeqCst);
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::SeqCst)
    }

    /// First log file still needed for recovery.
    pub fn log_number(&self) -> u64 {
        self.log_number.load(Ordering::SeqCst)
    }

    pub fn next_column_family_id(&self) -> u32 {
        self.next_column_family_id.load(Ordering::SeqCst)
    }

    /// Get the manifest number. Zero before any manifest exists.
    pub fn manifest_number(&self) -> u64 {
        self.manifest_number.load(Ordering::SeqCst)
    }

    /// Persisted column families, by id.
    pub fn column_families(&self) -> Vec<PersistedColumnFamily> {
        self.families.read().values().cloned().collect()
    }

    /// Recover the VersionSet from disk.
    ///
    /// Returns `false` when there is no CURRENT file. With `paranoid` set, any
    /// damaged manifest record fails recovery.
    pub fn recover(&self, paranoid: bool) -> Result<bool> {
        if !current_file_path(&self.db_path).exists() {
            return Ok(false);
        }

        let manifest_number = read_current_manifest_number(&self.db_path)?;
        let mut reader = ManifestReader::open(&self.db_path, manifest_number)?;
        reader.set_checksum_errors_fatal(paranoid);

        let mut has_log_number = false;
        let mut has_next_file = false;
        let mut edits = 0usize;
        while let Some(edit) = reader.read_edit()? {
            has_log_number |= edit.log_number.is_some();
            has_next_file |= edit.next_file_number.is_some();
            self.apply(&edit);
            edits += 1;
        }

        if !has_next_file {
            return Err(Error::corruption("no next_file_number in manifest"));
        }
        if !has_log_number {
            return Err(Error::corruption("no log_number in manifest"));
        }
        if !self.families.read().contains_key(&DEFAULT_COLUMN_FAMILY_ID) {
            return Err(Error::corruption("default column family missing from manifest"));
        }

        self.mark_file_number_used(manifest_number);
        self.mark_file_number_used(self.log_number());
        self.manifest_number.store(manifest_number, Ordering::SeqCst);

        debug!(
            manifest = manifest_number,
            edits,
            column_families = self.families.read().len(),
            "Recovered catalog"
        );
        Ok(true)
    }

    /// Read the persisted column families of the database at `db_path`
    /// without opening it.
    pub fn read_catalog(db_path: &Path) -> Result<Vec<PersistedColumnFamily>> {
        let versions = VersionSet::new(db_path);
        if !versions.recover(false)? {
            return Err(Error::DatabaseNotFound(db_path.display().to_string()));
        }
        Ok(versions.column_families())
    }

    /// Apply an edit to the in-memory state.
    fn apply(&self, edit: &VersionEdit) {
        if let Some(num) = edit.log_number {
            self.log_number.store(num, Ordering::SeqCst);
        }
        if let Some(num) = edit.next_file_number {
            self.next_file_number.store(num, Ordering::SeqCst);
        }
        if let Some(seq) = edit.last_sequence {
            self.last_sequence.store(seq, Ordering::SeqCst);
        }
        if let Some(id) = edit.next_column_family_id {
            self.next_column_family_id.fetch_max(id, Ordering::SeqCst);
        }

        let mut families = self.families.write();
        for cf in &edit.added_column_families {
            self.next_column_family_id
                .fetch_max(cf.id + 1, Ordering::SeqCst);
            families.insert(cf.id, cf.clone());
        }
        for id in &edit.dropped_column_families {
            families.remove(id);
        }
    }

    /// Edit describing the whole current state.
    pub fn snapshot_edit(&self) -> VersionEdit {
        let mut edit = VersionEdit::new();
        edit.set_log_number(self.log_number());
        edit.set_next_file_number(self.next_file_number());
        edit.set_last_sequence(self.last_sequence());
        edit.set_next_column_family_id(self.next_column_family_id());
        edit.added_column_families = self.column_families();
        edit
    }

    /// Start a fresh manifest holding the current state, point CURRENT at
    /// it and retire the previous manifest.
    pub fn create_new_manifest(&self) -> Result<()> {
        let manifest_number = self.new_file_number();
        let edit = self.snapshot_edit();
        let writer = write_manifest(&self.db_path, manifest_number, &edit)?;

        let previous = self.manifest_number.swap(manifest_number, Ordering::SeqCst);
        if let Some(old) = self.manifest.lock().replace(writer) {
            old.close()?;
        }
        if previous != 0 && previous != manifest_number {
            delete_file(&manifest_file_path(&self.db_path, previous))?;
        }

        info!(manifest = manifest_number, "Created manifest");
        Ok(())
    }

    /// Log a VersionEdit and apply it.
    ///
    /// `next_file_number` is filled in when unset. Nothing changes in memory
    /// unless the edit reached the manifest.
    pub fn log_and_apply(&self, edit: &mut VersionEdit) -> Result<()> {
        if edit.next_file_number.is_none() {
            edit.set_next_file_number(self.next_file_number());
        }

        {
            let mut guard = self.manifest.lock();
            let manifest = guard
                .as_mut()
                .ok_or_else(|| Error::internal("no active manifest"))?;
            manifest.add_edit(edit)?;
        }

        self.apply(edit);
        Ok(())
    }

    /// Look up a persisted family by name.
    pub fn find_by_name(&self, name: &[u8]) -> Option<PersistedColumnFamily> {
        self.families
            .read()
            .values()
            .find(|cf| cf.name.as_ref() == name)
            .cloned()
    }

    /// Name every persisted family, by id.
    pub fn column_family_names(&self) -> Vec<Bytes> {
        self.families.read().values().map(|cf| cf.name.clone()).collect()
    }
}

/// Write a single-edit manifest and point CURRENT at it.
pub(crate) fn write_manifest(
    db_path: &Path,
    manifest_number: u64,
    edit: &VersionEdit,
) -> Result<ManifestWriter> {
    let mut writer = ManifestWriter::create(db_path, manifest_number)?;
    writer.add_edit(edit)?;
    set_current_file(db_path, manifest_number)?;
    Ok(writer)
}
