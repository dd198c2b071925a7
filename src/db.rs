//! Database - Core database implementation.
//!
//! The Database struct is the main entry point for all operations.
//! It coordinates:
//! - Column families, each with its own MVCC memtable
//! - WAL for durability
//! - Manifest for the column family catalog
//! - Sequence numbers and snapshots
//!
//! # Thread Safety
//!
//! The Database is thread-safe and can be shared across threads using Arc.
//! Multiple readers can access concurrently, and writers are serialized.
//!
//! # Consistency
//!
//! Each committed batch gets exactly one sequence number and becomes
//! visible all at once. Reads without a snapshot use the latest published
//! sequence at the time of the call.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::batch::{BatchRecord, IndexedWriteBatch, WriteBatch, WriteBatchHandler};
use crate::column_family::{
    ColumnFamilyData, ColumnFamilyHandle, ColumnFamilySet, DEFAULT_COLUMN_FAMILY_ID,
};
use crate::iterator::{DBIterator, DBIteratorBuilder};
use crate::memtable::ExportedEntry;
use crate::options::{
    ColumnFamilyDescriptor, ColumnFamilyOptions, Options, ReadOptions, WriteOptions,
    DEFAULT_COLUMN_FAMILY_NAME,
};
use crate::snapshot::{SequenceManager, Snapshot};
use crate::types::{SequenceNumber, Stamp, ValueType};
use crate::util::filename::{
    create_dir_if_missing, database_exists, delete_file, list_db_files, list_files_of_type,
    lock_file_path, log_file_path, FileType,
};
use crate::version::{PersistedColumnFamily, VersionEdit, VersionSet};
use crate::wal::{decode_batch_record, encode_batch_record, WalReader, WalWriter};
use crate::{Error, Result};

/// The core database struct.
///
/// Thread-safe database that supports concurrent reads and serialized writes.
pub struct Database {
    /// Database directory path.
    db_path: PathBuf,
    options: Options,
    read_only: bool,
    /// Persisted catalog and file numbers.
    versions: VersionSet,
    column_families: ColumnFamilySet,
    sequences: SequenceManager,
    /// Current WAL writer. `None` for read-only opens and after close.
    wal: Mutex<Option<WalWriter>>,
    /// Write mutex for serializing writes.
    write_mutex: Mutex<()>,
    /// Reads share it; garbage collection takes it exclusively.
    gc_lock: RwLock<()>,
    /// Handles returned at open, in descriptor order.
    handles: Vec<ColumnFamilyHandle>,
    default_handle: ColumnFamilyHandle,
    default_read_options: RwLock<ReadOptions>,
    default_write_options: RwLock<WriteOptions>,
    /// Lock file handle (kept open to hold the lock).
    lock_file: Mutex<Option<File>>,
    closed: AtomicBool,
}

/// A descriptor matched against the persisted catalog.
struct PlannedFamily {
    descriptor: ColumnFamilyDescriptor,
    /// Persisted id, or `None` when the family is created by this open.
    id: Option<u32>,
    /// Position in the caller's list; `None` for the implicit default family.
    position: Option<usize>,
}

impl Database {
    /// Open a database at the given path.
    ///
    /// If the database doesn't exist, a new database will be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        Self::open_with_options(path, Options::default())
    }

    /// Open a database with custom options and only the default column family.
    pub fn open_with_options(path: impl AsRef<Path>, options: Options) -> Result<Arc<Self>> {
        let descriptors = vec![ColumnFamilyDescriptor::default_family(
            options.cf_options.clone(),
        )];
        Self::open_cf_descriptors(path, options, descriptors)
    }

    /// Open a database with the given column families.
    ///
    /// Every persisted column family must be listed. Handles come back from
    /// [`Database::column_families`] in the order given here.
    pub fn open_cf_descriptors(
        path: impl AsRef<Path>,
        options: Options,
        descriptors: Vec<ColumnFamilyDescriptor>,
    ) -> Result<Arc<Self>> {
        Self::open_inner(path.as_ref(), options, descriptors, false)
    }

    /// Open an existing database for reads only.
    pub fn open_read_only(path: impl AsRef<Path>, options: Options) -> Result<Arc<Self>> {
        let descriptors = vec![ColumnFamilyDescriptor::default_family(
            options.cf_options.clone(),
        )];
        Self::open_inner(path.as_ref(), options, descriptors, true)
    }

    /// Open an existing database for reads only, with a subset of its
    /// column families.
    pub fn open_read_only_cf_descriptors(
        path: impl AsRef<Path>,
        options: Options,
        descriptors: Vec<ColumnFamilyDescriptor>,
    ) -> Result<Arc<Self>> {
        Self::open_inner(path.as_ref(), options, descriptors, true)
    }

    fn open_inner(
        db_path: &Path,
        options: Options,
        descriptors: Vec<ColumnFamilyDescriptor>,
        read_only: bool,
    ) -> Result<Arc<Self>> {
        options.validate()?;
        let mut seen = HashSet::new();
        for descriptor in &descriptors {
            descriptor.options.validate()?;
            if !seen.insert(descriptor.name.clone()) {
                return Err(Error::invalid_argument(format!(
                    "column family {:?} listed twice",
                    String::from_utf8_lossy(&descriptor.name)
                )));
            }
        }

        let exists = database_exists(db_path);
        if !exists && (read_only || !options.create_if_missing) {
            return Err(Error::DatabaseNotFound(db_path.display().to_string()));
        }
        if exists && options.error_if_exists {
            return Err(Error::DatabaseExists(db_path.display().to_string()));
        }

        let versions = VersionSet::new(db_path);
        let mut lock_file = None;
        if exists {
            if !read_only {
                lock_file = Some(Self::acquire_lock(db_path)?);
            }
            versions.recover(options.paranoid_checks)?;
        }

        // Everything is validated before the first mutation.
        let plan = Self::plan_column_families(&versions, &options, descriptors, exists, read_only)?;

        if !exists {
            create_dir_if_missing(db_path)?;
            lock_file = Some(Self::acquire_lock(db_path)?);
            info!(path = %db_path.display(), "Creating database");
        }

        let column_families = ColumnFamilySet::new(versions.next_column_family_id());
        let mut handles = Vec::new();
        let mut default_handle = None;
        let mut edit = VersionEdit::new();

        for planned in plan {
            let id = match planned.id {
                Some(id) => id,
                None if planned.descriptor.name.as_ref() == DEFAULT_COLUMN_FAMILY_NAME.as_bytes() => {
                    DEFAULT_COLUMN_FAMILY_ID
                }
                None => column_families.allocate_id(),
            };
            if planned.id.is_none() {
                edit.add_column_family(
                    id,
                    planned.descriptor.name.clone(),
                    planned.descriptor.options.comparator.name(),
                );
            }

            let data = Arc::new(ColumnFamilyData::new(
                id,
                planned.descriptor.name,
                planned.descriptor.options,
            ));
            column_families.insert(Arc::clone(&data));

            let handle = ColumnFamilyHandle::new(data);
            if id == DEFAULT_COLUMN_FAMILY_ID {
                default_handle = Some(handle.clone());
            }
            if let Some(position) = planned.position {
                handles.push((position, handle));
            }
        }
        handles.sort_by_key(|(position, _)| *position);
        let handles = handles.into_iter().map(|(_, handle)| handle).collect();

        let default_handle = default_handle
            .ok_or_else(|| Error::internal("default column family not planned"))?;

        let mut last_sequence = versions.last_sequence();
        if exists {
            last_sequence = Self::replay_logs(
                db_path,
                &versions,
                &column_families,
                options.paranoid_checks,
                last_sequence,
            )?;
        }

        let db = Arc::new(Self {
            db_path: db_path.to_path_buf(),
            options,
            read_only,
            versions,
            column_families,
            sequences: SequenceManager::new(last_sequence),
            wal: Mutex::new(None),
            write_mutex: Mutex::new(()),
            gc_lock: RwLock::new(()),
            handles,
            default_handle,
            default_read_options: RwLock::new(ReadOptions::default()),
            default_write_options: RwLock::new(WriteOptions::default()),
            lock_file: Mutex::new(lock_file),
            closed: AtomicBool::new(false),
        });

        if !read_only {
            db.versions.create_new_manifest()?;
            edit.set_next_column_family_id(db.column_families.next_id());
            let _write_guard = db.write_mutex.lock();
            db.switch_log(edit)?;
            db.delete_obsolete_files()?;
        }

        info!(
            path = %db.db_path.display(),
            read_only,
            column_families = db.column_families.len(),
            last_sequence,
            "Opened database"
        );
        Ok(db)
    }

    /// Match the caller's descriptors against the persisted catalog.
    fn plan_column_families(
        versions: &VersionSet,
        options: &Options,
        descriptors: Vec<ColumnFamilyDescriptor>,
        exists: bool,
        read_only: bool,
    ) -> Result<Vec<PlannedFamily>> {
        let persisted: Vec<PersistedColumnFamily> = versions.column_families();

        if exists && !read_only {
            for cf in &persisted {
                let listed = descriptors.iter().any(|d| d.name == cf.name);
                if !listed && cf.id != DEFAULT_COLUMN_FAMILY_ID {
                    return Err(Error::invalid_argument(format!(
                        "column family {:?} exists and must be opened",
                        String::from_utf8_lossy(&cf.name)
                    )));
                }
            }
        }

        let mut plan: Vec<PlannedFamily> = descriptors
            .into_iter()
            .enumerate()
            .map(|(position, descriptor)| PlannedFamily {
                descriptor,
                id: None,
                position: Some(position),
            })
            .collect();

        if !plan
            .iter()
            .any(|p| p.descriptor.name.as_ref() == DEFAULT_COLUMN_FAMILY_NAME.as_bytes())
        {
            plan.push(PlannedFamily {
                descriptor: ColumnFamilyDescriptor::default_family(options.cf_options.clone()),
                id: None,
                position: None,
            });
        }

        for planned in &mut plan {
            let name = &planned.descriptor.name;
            let is_default = name.as_ref() == DEFAULT_COLUMN_FAMILY_NAME.as_bytes();

            match persisted.iter().find(|cf| &cf.name == name) {
                Some(cf) => {
                    let supplied = planned.descriptor.options.comparator.name();
                    if cf.comparator != supplied {
                        return Err(Error::ComparatorMismatch {
                            column_family: String::from_utf8_lossy(name).into_owned(),
                            expected: cf.comparator.clone(),
                            actual: supplied.to_string(),
                        });
                    }
                    planned.id = Some(cf.id);
                }
                None if is_default && !exists => {}
                None if options.create_missing_column_families && !read_only => {}
                None => {
                    return Err(Error::ColumnFamilyNotFound(
                        String::from_utf8_lossy(name).into_owned(),
                    ))
                }
            }
        }

        // Default first so it claims id 0 on a fresh database.
        plan.sort_by_key(|p| p.descriptor.name.as_ref() != DEFAULT_COLUMN_FAMILY_NAME.as_bytes());
        Ok(plan)
    }

    /// Acquire the database lock file.
    fn acquire_lock(db_path: &Path) -> Result<File> {
        let lock_path = lock_file_path(db_path);

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)
            .map_err(|e| {
                Error::LockError(format!(
                    "Failed to open lock file {}: {}",
                    lock_path.display(),
                    e
                ))
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = lock_file.as_raw_fd();
            // SAFETY: `fd` is a valid descriptor owned by `lock_file`.
            let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if result != 0 {
                return Err(Error::LockError(format!(
                    "{} is locked by another process",
                    db_path.display()
                )));
            }
        }

        let mut lock_file = lock_file;
        writeln!(lock_file, "kvcore lock").ok();
        Ok(lock_file)
    }

    /// Replay every live log into the memtables. Returns the last sequence.
    fn replay_logs(
        db_path: &Path,
        versions: &VersionSet,
        column_families: &ColumnFamilySet,
        paranoid: bool,
        mut last_sequence: SequenceNumber,
    ) -> Result<SequenceNumber> {
        let logs = list_files_of_type(db_path, FileType::Log)?;
        let mut batches = 0usize;

        for number in logs.into_iter().filter(|n| *n >= versions.log_number()) {
            versions.mark_file_number_used(number);
            let mut reader = WalReader::open(&log_file_path(db_path, number), number)?;
            reader.set_checksum_errors_fatal(paranoid);

            while let Some(record) = reader.read_record()? {
                let (sequence, batch) = decode_batch_record(&record)?;
                let mut inserter = MemTableInserter::new(column_families, sequence);
                batch.iterate(&mut inserter)?;
                last_sequence = last_sequence.max(sequence);
                batches += 1;
            }

            if reader.dropped_bytes() > 0 {
                warn!(log = number, dropped = reader.dropped_bytes(), "Log had damaged records");
            }
        }

        debug!(batches, last_sequence, "Replayed logs");
        Ok(last_sequence)
    }

    /// Write the current state into a fresh log, record it in the manifest
    /// along with `edit`, and retire the older logs.
    ///
    /// Caller holds the write mutex.
    fn switch_log(&self, mut edit: VersionEdit) -> Result<()> {
        let sequence = self.sequences.last_sequence();
        let state = self.export_state(sequence)?;

        let log_number = self.versions.new_file_number();
        let mut wal = WalWriter::create(
            &log_file_path(&self.db_path, log_number),
            log_number,
            self.options.sync_mode,
        )?;
        if !state.is_empty() {
            wal.add_record(&encode_batch_record(sequence, &state), true)?;
        } else {
            wal.sync()?;
        }

        edit.set_log_number(log_number);
        edit.set_last_sequence(sequence);
        self.versions.log_and_apply(&mut edit)?;

        if let Some(old) = self.wal.lock().replace(wal) {
            old.close()?;
        }
        for number in list_files_of_type(&self.db_path, FileType::Log)? {
            if number < log_number {
                delete_file(&log_file_path(&self.db_path, number))?;
            }
        }

        debug!(log = log_number, sequence, records = state.count(), "Switched log");
        Ok(())
    }

    /// Remove leftover temp files and manifests other than the live one.
    fn delete_obsolete_files(&self) -> Result<()> {
        let live_manifest = self.versions.manifest_number();
        for number in list_files_of_type(&self.db_path, FileType::Manifest)? {
            if number != live_manifest {
                delete_file(&crate::util::filename::manifest_file_path(&self.db_path, number))?;
            }
        }
        for number in list_files_of_type(&self.db_path, FileType::Temp)? {
            delete_file(&crate::util::filename::temp_file_path(&self.db_path, number))?;
        }
        Ok(())
    }

    /// Every live key of every column family as of `sequence`, as one batch.
    ///
    /// Keys are written as puts. Merge operands of a family without an
    /// operator stay merge records on top of their base value.
    pub(crate) fn export_state(&self, sequence: SequenceNumber) -> Result<WriteBatch> {
        let _gc = self.gc_lock.read();
        let mut batch = WriteBatch::new();
        for cf in self.column_families.all() {
            for (key, entry) in cf.memtable.exported_entries(sequence, cf.merge_operator())? {
                match entry {
                    ExportedEntry::Value(value) => batch.push(BatchRecord::Put {
                        cf: cf.id,
                        key,
                        value,
                    }),
                    ExportedEntry::Unmerged { base, operands } => {
                        if let Some(value) = base {
                            batch.push(BatchRecord::Put {
                                cf: cf.id,
                                key: key.clone(),
                                value,
                            });
                        }
                        for operand in operands {
                            batch.push(BatchRecord::Merge {
                                cf: cf.id,
                                key: key.clone(),
                                operand,
                            });
                        }
                    }
                }
            }
        }
        Ok(batch)
    }

    /// Persisted description of the live column families.
    pub(crate) fn live_catalog(&self) -> Vec<PersistedColumnFamily> {
        self.column_families
            .all()
            .into_iter()
            .map(|cf| PersistedColumnFamily {
                id: cf.id,
                name: cf.name.clone(),
                comparator: cf.options.comparator.name().to_string(),
            })
            .collect()
    }

    pub(crate) fn next_column_family_id(&self) -> u32 {
        self.column_families.next_id()
    }

    pub(crate) fn versions(&self) -> &VersionSet {
        &self.versions
    }

    pub(crate) fn sequences(&self) -> &SequenceManager {
        &self.sequences
    }

    pub(crate) fn all_column_families(&self) -> Vec<Arc<ColumnFamilyData>> {
        self.column_families.all()
    }

    pub(crate) fn live_log_files(&self) -> Result<Vec<u64>> {
        Ok(list_files_of_type(&self.db_path, FileType::Log)?
            .into_iter()
            .filter(|n| *n >= self.versions.log_number())
            .collect())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::HandleClosed("database"));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        self.check_open()?;
        if self.read_only {
            return Err(Error::ReadOnlyViolation);
        }
        Ok(())
    }

    fn read_sequence(&self, options: &ReadOptions) -> Result<SequenceNumber> {
        match &options.snapshot {
            Some(snapshot) => snapshot.read_sequence(),
            None => Ok(self.sequences.last_sequence()),
        }
    }

    // ---- writes ----

    /// Put a key-value pair.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(Bytes::copy_from_slice(key), Bytes::copy_from_slice(value));
        self.write(&batch)
    }

    pub fn put_cf(&self, cf: &ColumnFamilyHandle, key: &[u8], value: &[u8]) -> Result<()> {
        cf.data()?;
        let mut batch = WriteBatch::new();
        batch.put_cf(cf, Bytes::copy_from_slice(key), Bytes::copy_from_slice(value));
        self.write(&batch)
    }

    /// Delete a key.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(Bytes::copy_from_slice(key));
        self.write(&batch)
    }

    pub fn delete_cf(&self, cf: &ColumnFamilyHandle, key: &[u8]) -> Result<()> {
        cf.data()?;
        let mut batch = WriteBatch::new();
        batch.delete_cf(cf, Bytes::copy_from_slice(key));
        self.write(&batch)
    }

    pub fn single_delete(&self, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.single_delete(Bytes::copy_from_slice(key));
        self.write(&batch)
    }

    pub fn single_delete_cf(&self, cf: &ColumnFamilyHandle, key: &[u8]) -> Result<()> {
        cf.data()?;
        let mut batch = WriteBatch::new();
        batch.single_delete_cf(cf, Bytes::copy_from_slice(key));
        self.write(&batch)
    }

    /// Delete every key in `[begin, end)`.
    pub fn delete_range(&self, begin: &[u8], end: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete_range(Bytes::copy_from_slice(begin), Bytes::copy_from_slice(end));
        self.write(&batch)
    }

    pub fn delete_range_cf(&self, cf: &ColumnFamilyHandle, begin: &[u8], end: &[u8]) -> Result<()> {
        cf.data()?;
        let mut batch = WriteBatch::new();
        batch.delete_range_cf(cf, Bytes::copy_from_slice(begin), Bytes::copy_from_slice(end));
        self.write(&batch)
    }

    /// Record a merge operand for `key`.
    pub fn merge(&self, key: &[u8], operand: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.merge(Bytes::copy_from_slice(key), Bytes::copy_from_slice(operand));
        self.write(&batch)
    }

    pub fn merge_cf(&self, cf: &ColumnFamilyHandle, key: &[u8], operand: &[u8]) -> Result<()> {
        cf.data()?;
        let mut batch = WriteBatch::new();
        batch.merge_cf(cf, Bytes::copy_from_slice(key), Bytes::copy_from_slice(operand));
        self.write(&batch)
    }

    /// Write a batch of operations atomically with the default write options.
    pub fn write<B: AsRef<WriteBatch> + ?Sized>(&self, batch: &B) -> Result<()> {
        let options = *self.default_write_options.read();
        self.write_opt(batch, &options)
    }

    /// Write a batch of operations atomically.
    ///
    /// The whole batch is validated first; if any record is rejected nothing
    /// is written and no sequence number is consumed. A batch without
    /// mutations commits nothing.
    pub fn write_opt<B: AsRef<WriteBatch> + ?Sized>(
        &self,
        batch: &B,
        options: &WriteOptions,
    ) -> Result<()> {
        let batch = batch.as_ref();
        self.check_writable()?;
        self.validate_payloads(batch)?;

        if batch.count() == 0 {
            return Ok(());
        }

        // Serialize writes
        let _write_guard = self.write_mutex.lock();
        self.check_open()?;
        self.validate_families(batch)?;

        let sequence = self.sequences.next_sequence();

        if !options.disable_wal {
            let mut wal_guard = self.wal.lock();
            let wal = wal_guard
                .as_mut()
                .ok_or(Error::HandleClosed("database"))?;
            wal.add_record(&encode_batch_record(sequence, batch), options.sync)?;
        }

        let mut inserter = MemTableInserter::new(&self.column_families, sequence);
        batch.iterate(&mut inserter)?;
        self.sequences.publish(sequence);
        Ok(())
    }

    fn validate_payloads(&self, batch: &WriteBatch) -> Result<()> {
        let check_key = |key: &Bytes| {
            if key.len() > self.options.max_key_size {
                return Err(Error::PayloadTooLarge {
                    what: "Key",
                    size: key.len(),
                    max: self.options.max_key_size,
                });
            }
            Ok(())
        };
        let check_value = |value: &Bytes| {
            if value.len() > self.options.max_value_size {
                return Err(Error::PayloadTooLarge {
                    what: "Value",
                    size: value.len(),
                    max: self.options.max_value_size,
                });
            }
            Ok(())
        };

        for record in batch.records() {
            match record {
                BatchRecord::Put { key, value, .. } => {
                    check_key(key)?;
                    check_value(value)?;
                }
                BatchRecord::Merge { key, operand, .. } => {
                    check_key(key)?;
                    check_value(operand)?;
                }
                BatchRecord::Delete { key, .. } | BatchRecord::SingleDelete { key, .. } => {
                    check_key(key)?
                }
                BatchRecord::DeleteRange { begin, end, .. } => {
                    check_key(begin)?;
                    check_key(end)?;
                }
                BatchRecord::LogData(_) => {}
            }
        }
        Ok(())
    }

    fn validate_families(&self, batch: &WriteBatch) -> Result<()> {
        for record in batch.records() {
            let Some(id) = record.column_family() else {
                continue;
            };
            let cf = self
                .column_families
                .get(id)
                .ok_or(Error::HandleClosed("column family"))?;
            if matches!(record, BatchRecord::Merge { .. }) && cf.merge_operator().is_none() {
                return Err(Error::MergeOperatorMissing(cf.name_lossy()));
            }
        }
        Ok(())
    }

    // ---- reads ----

    /// Get a value by key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let options = self.default_read_options();
        self.get_cf_opt(&options, &self.default_handle, key)
    }

    pub fn get_opt(&self, options: &ReadOptions, key: &[u8]) -> Result<Option<Bytes>> {
        self.get_cf_opt(options, &self.default_handle, key)
    }

    pub fn get_cf(&self, cf: &ColumnFamilyHandle, key: &[u8]) -> Result<Option<Bytes>> {
        let options = self.default_read_options();
        self.get_cf_opt(&options, cf, key)
    }

    /// Get a value from `cf` as of the options' snapshot (or the latest state).
    pub fn get_cf_opt(
        &self,
        options: &ReadOptions,
        cf: &ColumnFamilyHandle,
        key: &[u8],
    ) -> Result<Option<Bytes>> {
        self.check_open()?;
        if options.verify_checksums {
            self.verify_checksum()?;
        }
        let data = cf.data()?;
        // Pin the horizon before choosing a sequence so compaction cannot
        // pass it.
        let _gc = self.gc_lock.read();
        let sequence = self.read_sequence(options)?;
        Ok(data
            .memtable
            .get(key, sequence, data.merge_operator(), &data.name_lossy())?
            .into_option())
    }

    /// Get several keys from the default family at one sequence.
    pub fn multi_get<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<Vec<Option<Bytes>>> {
        self.multi_get_cf(&self.default_handle, keys)
    }

    pub fn multi_get_cf<K: AsRef<[u8]>>(
        &self,
        cf: &ColumnFamilyHandle,
        keys: &[K],
    ) -> Result<Vec<Option<Bytes>>> {
        let mut options = self.default_read_options();
        if options.verify_checksums {
            self.verify_checksum()?;
            options.verify_checksums = false;
        }
        if options.snapshot.is_none() {
            options.snapshot = Some(self.snapshot()?);
        }
        keys.iter()
            .map(|key| self.get_cf_opt(&options, cf, key.as_ref()))
            .collect()
    }

    /// `false` means the key is certainly absent; `true` means it may exist.
    pub fn key_may_exist(&self, key: &[u8]) -> Result<bool> {
        self.key_may_exist_cf(&self.default_handle, key)
    }

    pub fn key_may_exist_cf(&self, cf: &ColumnFamilyHandle, key: &[u8]) -> Result<bool> {
        self.check_open()?;
        Ok(cf.data()?.memtable.may_contain(key))
    }

    /// Visible entries of `cf` in `[lower, upper)`, in comparator order.
    pub(crate) fn visible_entries(
        &self,
        cf: &ColumnFamilyHandle,
        options: &ReadOptions,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
    ) -> Result<Vec<(Bytes, Bytes)>> {
        self.check_open()?;
        if options.verify_checksums {
            self.verify_checksum()?;
        }
        let data = cf.data()?;
        let _gc = self.gc_lock.read();
        let sequence = self.read_sequence(options)?;
        data.memtable.visible_entries(
            sequence,
            lower,
            upper,
            data.merge_operator(),
            &data.name_lossy(),
        )
    }

    /// Iterate the default family.
    pub fn iter(&self) -> Result<DBIterator> {
        DBIteratorBuilder::new()
            .read_options(self.default_read_options())
            .build(self)
    }

    pub fn iter_opt(&self, options: &ReadOptions) -> Result<DBIterator> {
        DBIteratorBuilder::new()
            .read_options(options.clone())
            .build(self)
    }

    pub fn iter_cf(&self, cf: &ColumnFamilyHandle) -> Result<DBIterator> {
        DBIteratorBuilder::new()
            .read_options(self.default_read_options())
            .build_cf(self, cf)
    }

    pub fn iter_cf_opt(&self, options: &ReadOptions, cf: &ColumnFamilyHandle) -> Result<DBIterator> {
        DBIteratorBuilder::new()
            .read_options(options.clone())
            .build_cf(self, cf)
    }

    /// One iterator per family, all at the same sequence.
    pub fn iterators(
        &self,
        options: &ReadOptions,
        cfs: &[ColumnFamilyHandle],
    ) -> Result<Vec<DBIterator>> {
        let mut options = options.clone();
        if options.verify_checksums {
            self.verify_checksum()?;
            options.verify_checksums = false;
        }
        if options.snapshot.is_none() {
            options.snapshot = Some(self.snapshot()?);
        }
        cfs.iter()
            .map(|cf| self.iter_cf_opt(&options, cf))
            .collect()
    }

    // ---- snapshots ----

    /// Pin the current sequence for reads.
    pub fn snapshot(&self) -> Result<Snapshot> {
        self.check_open()?;
        Ok(self.sequences.snapshot())
    }

    /// Release `snapshot`; reads through it fail afterwards.
    pub fn release_snapshot(&self, snapshot: &Snapshot) {
        snapshot.release();
    }

    /// Sequence number of the last committed batch.
    pub fn latest_sequence_number(&self) -> SequenceNumber {
        self.sequences.last_sequence()
    }

    // ---- column families ----

    /// Create a column family on the live database.
    pub fn create_column_family(
        &self,
        name: impl Into<Bytes>,
        options: ColumnFamilyOptions,
    ) -> Result<ColumnFamilyHandle> {
        self.check_writable()?;
        options.validate()?;
        let name = name.into();

        let _write_guard = self.write_mutex.lock();
        self.check_open()?;
        if self.column_families.get_by_name(&name).is_some() {
            return Err(Error::ColumnFamilyExists(
                String::from_utf8_lossy(&name).into_owned(),
            ));
        }

        let id = self.column_families.allocate_id();
        let mut edit = VersionEdit::new();
        edit.add_column_family(id, name.clone(), options.comparator.name());
        edit.set_next_column_family_id(self.column_families.next_id());
        self.versions.log_and_apply(&mut edit)?;

        let data = Arc::new(ColumnFamilyData::new(id, name, options));
        self.column_families.insert(Arc::clone(&data));
        info!(id, name = %data.name_lossy(), "Created column family");
        Ok(ColumnFamilyHandle::new(data))
    }

    /// Drop a column family. The handle stays closable but every further
    /// operation through it fails.
    pub fn drop_column_family(&self, cf: &ColumnFamilyHandle) -> Result<()> {
        self.check_writable()?;
        let data = Arc::clone(cf.data()?);
        if data.id == DEFAULT_COLUMN_FAMILY_ID {
            return Err(Error::invalid_argument("cannot drop the default column family"));
        }

        let _write_guard = self.write_mutex.lock();
        self.check_open()?;
        if data.is_dropped() {
            return Err(Error::HandleClosed("column family"));
        }

        let mut edit = VersionEdit::new();
        edit.drop_column_family(data.id);
        self.versions.log_and_apply(&mut edit)?;

        data.mark_dropped();
        self.column_families.remove(data.id);
        info!(id = data.id, name = %data.name_lossy(), "Dropped column family");
        Ok(())
    }

    /// A new handle for the live family called `name`.
    pub fn column_family(&self, name: &[u8]) -> Option<ColumnFamilyHandle> {
        self.column_families.get_by_name(name).map(ColumnFamilyHandle::new)
    }

    /// Handles for the families named at open, in descriptor order.
    pub fn column_families(&self) -> &[ColumnFamilyHandle] {
        &self.handles
    }

    pub fn default_column_family(&self) -> ColumnFamilyHandle {
        self.default_handle.clone()
    }

    /// Empty indexed batch ordered like the default family.
    pub fn indexed_write_batch(&self) -> IndexedWriteBatch {
        IndexedWriteBatch::for_column_family(&self.default_handle)
    }

    /// Names of the column families persisted at `path`, without opening it.
    pub fn list_column_families(path: impl AsRef<Path>) -> Result<Vec<Bytes>> {
        Ok(VersionSet::read_catalog(path.as_ref())?
            .into_iter()
            .map(|cf| cf.name)
            .collect())
    }

    // ---- maintenance ----

    /// Drop versions in `[begin, end)` of the default family that no
    /// snapshot can observe.
    pub fn compact_range(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        self.compact_range_cf(&self.default_handle, begin, end)
    }

    pub fn compact_range_cf(
        &self,
        cf: &ColumnFamilyHandle,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        self.check_writable()?;
        let data = cf.data()?;

        let _write_guard = self.write_mutex.lock();
        self.check_open()?;
        let _gc = self.gc_lock.write();
        let horizon = self.sequences.gc_horizon();
        let removed = data.memtable.collect_garbage(
            horizon,
            begin,
            end,
            data.merge_operator(),
            &data.name_lossy(),
        );
        debug!(cf = %data.name_lossy(), horizon, removed, "Compacted range");
        Ok(())
    }

    /// Rewrite the database state into a fresh log and retire the old ones.
    pub fn flush(&self) -> Result<()> {
        self.check_writable()?;
        let _write_guard = self.write_mutex.lock();
        self.check_open()?;
        self.switch_log(VersionEdit::new())
    }

    /// Push buffered log data to the OS, and to disk when `sync` is set.
    pub fn flush_wal(&self, sync: bool) -> Result<()> {
        self.check_writable()?;
        let mut guard = self.wal.lock();
        let wal = guard.as_mut().ok_or(Error::HandleClosed("database"))?;
        if sync {
            wal.sync()
        } else {
            wal.flush()
        }
    }

    /// Sync the live log to disk.
    pub fn sync_wal(&self) -> Result<()> {
        self.flush_wal(true)
    }

    /// Re-read the manifest and every live log with strict checksums.
    pub fn verify_checksum(&self) -> Result<()> {
        self.check_open()?;
        let _write_guard = self.write_mutex.lock();
        if let Some(wal) = self.wal.lock().as_mut() {
            wal.flush()?;
        }

        let manifest = self.versions.manifest_number();
        let mut reader = crate::version::ManifestReader::open(&self.db_path, manifest)?;
        reader.set_checksum_errors_fatal(true);
        reader.read_all_edits()?;

        for number in self.live_log_files()? {
            let mut reader = WalReader::open(&log_file_path(&self.db_path, number), number)?;
            reader.set_checksum_errors_fatal(true);
            while let Some(record) = reader.read_record()? {
                decode_batch_record(&record)?;
            }
        }
        Ok(())
    }

    // ---- lifecycle ----

    /// Flush and close the database. Later calls fail with `HandleClosed`.
    /// Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let _write_guard = self.write_mutex.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let result = if self.read_only {
            Ok(())
        } else {
            self.switch_log(VersionEdit::new())
        };

        if let Some(wal) = self.wal.lock().take() {
            wal.close()?;
        }
        self.lock_file.lock().take();
        info!(path = %self.db_path.display(), "Closed database");
        result
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Delete the database at `path`. Fails if it is open elsewhere.
    pub fn destroy(path: impl AsRef<Path>) -> Result<()> {
        let db_path = path.as_ref();
        if !db_path.exists() {
            return Ok(());
        }

        let lock = Self::acquire_lock(db_path)?;
        for file in list_db_files(db_path)? {
            if file != lock_file_path(db_path) {
                delete_file(&file)?;
            }
        }
        drop(lock);
        delete_file(&lock_file_path(db_path))?;
        // Only removed when nothing foreign is left in it.
        std::fs::remove_dir(db_path).ok();
        info!(path = %db_path.display(), "Destroyed database");
        Ok(())
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn default_read_options(&self) -> ReadOptions {
        self.default_read_options.read().clone()
    }

    pub fn set_default_read_options(&self, options: ReadOptions) {
        *self.default_read_options.write() = options;
    }

    pub fn default_write_options(&self) -> WriteOptions {
        *self.default_write_options.read()
    }

    pub fn set_default_write_options(&self, options: WriteOptions) {
        *self.default_write_options.write() = options;
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if !self.is_closed() {
            if let Err(e) = self.close() {
                warn!(error = %e, "Error closing database on drop");
            }
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.db_path)
            .field("read_only", &self.read_only)
            .field("last_sequence", &self.sequences.last_sequence())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Applies batch records to memtables at one sequence number.
///
/// Records for families that no longer exist are skipped, which only
/// happens while replaying logs written before a drop.
struct MemTableInserter<'a> {
    families: &'a ColumnFamilySet,
    sequence: SequenceNumber,
    offset: u32,
}

impl<'a> MemTableInserter<'a> {
    fn new(families: &'a ColumnFamilySet, sequence: SequenceNumber) -> Self {
        Self {
            families,
            sequence,
            offset: 0,
        }
    }

    fn next_stamp(&mut self) -> Stamp {
        let stamp = Stamp::new(self.sequence, self.offset);
        self.offset += 1;
        stamp
    }

    fn add(&mut self, cf: u32, value_type: ValueType, key: &Bytes, value: Bytes) {
        let stamp = self.next_stamp();
        if let Some(data) = self.families.get(cf) {
            data.memtable.add(stamp, value_type, key.clone(), value);
        }
    }
}

impl WriteBatchHandler for MemTableInserter<'_> {
    fn put(&mut self, cf: u32, key: &Bytes, value: &Bytes) -> Result<()> {
        self.add(cf, ValueType::Value, key, value.clone());
        Ok(())
    }

    fn delete(&mut self, cf: u32, key: &Bytes) -> Result<()> {
        self.add(cf, ValueType::Deletion, key, Bytes::new());
        Ok(())
    }

    fn delete_range(&mut self, cf: u32, begin: &Bytes, end: &Bytes) -> Result<()> {
        let stamp = self.next_stamp();
        if let Some(data) = self.families.get(cf) {
            data.memtable
                .add_range_tombstone(stamp, begin.clone(), end.clone());
        }
        Ok(())
    }

    fn merge(&mut self, cf: u32, key: &Bytes, operand: &Bytes) -> Result<()> {
        self.add(cf, ValueType::Merge, key, operand.clone());
        Ok(())
    }

    fn log_data(&mut self, _blob: &Bytes) -> Result<()> {
        self.offset += 1;
        Ok(())
    }
}
