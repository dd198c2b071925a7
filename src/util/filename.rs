//! Database directory layout.
//!
//! A database directory holds `LOCK`, `CURRENT`, one or more
//! `MANIFEST-NNNNNN` files, numbered `NNNNNN.log` write-ahead logs and
//! transient `NNNNNN.tmp` files. Anything else in the directory belongs to
//! the application and is left alone by restore and cleanup.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// File types in the database directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Write-ahead log file.
    Log,
    /// Lock file to prevent concurrent access.
    Lock,
    /// Manifest file (column family catalog and counters).
    Manifest,
    /// Current file (points to current manifest).
    Current,
    /// Temporary file.
    Temp,
}

const MANIFEST_PREFIX: &str = "MANIFEST-";

pub fn lock_file_path(db_path: &Path) -> PathBuf {
    db_path.join("LOCK")
}

pub fn current_file_path(db_path: &Path) -> PathBuf {
    db_path.join("CURRENT")
}

pub fn manifest_file_name(number: u64) -> String {
    format!("{}{:06}", MANIFEST_PREFIX, number)
}

pub fn manifest_file_path(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(manifest_file_name(number))
}

pub fn log_file_path(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(format!("{:06}.log", number))
}

pub fn temp_file_path(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(format!("{:06}.tmp", number))
}

/// Parse a file name and return its type and number.
///
/// Returns `None` for names that are not database files.
pub fn parse_file_name(name: &str) -> Option<(FileType, u64)> {
    match name {
        "CURRENT" => return Some((FileType::Current, 0)),
        "LOCK" => return Some((FileType::Lock, 0)),
        _ => {}
    }

    if let Some(suffix) = name.strip_prefix(MANIFEST_PREFIX) {
        return suffix
            .parse::<u64>()
            .ok()
            .map(|number| (FileType::Manifest, number));
    }

    let (num_str, ext) = name.rsplit_once('.')?;
    if num_str.is_empty() || !num_str.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let number = num_str.parse::<u64>().ok()?;
    let file_type = match ext {
        "log" => FileType::Log,
        "tmp" => FileType::Temp,
        _ => return None,
    };
    Some((file_type, number))
}

/// Point CURRENT at the given manifest.
///
/// Writes a temp file and renames it over CURRENT, so readers see either the
/// old or the new manifest name.
pub fn set_current_file(db_path: &Path, manifest_number: u64) -> io::Result<()> {
    let temp_path = temp_file_path(db_path, manifest_number);
    fs::write(&temp_path, format!("{}\n", manifest_file_name(manifest_number)))?;
    fs::File::open(&temp_path)?.sync_all()?;
    fs::rename(&temp_path, current_file_path(db_path))?;
    sync_dir(db_path)
}

/// Get the manifest number from the CURRENT file.
pub fn read_current_manifest_number(db_path: &Path) -> Result<u64> {
    let content = fs::read_to_string(current_file_path(db_path))?;
    let name = content.trim();

    match parse_file_name(name) {
        Some((FileType::Manifest, number)) => Ok(number),
        _ => Err(Error::corruption(format!(
            "invalid manifest name in CURRENT: {:?}",
            name
        ))),
    }
}

/// Whether the directory looks like an existing database.
pub fn database_exists(db_path: &Path) -> bool {
    current_file_path(db_path).is_file()
}

/// List all files of a given type in the database directory, sorted by number.
pub fn list_files_of_type(db_path: &Path, file_type: FileType) -> io::Result<Vec<u64>> {
    let mut numbers = Vec::new();

    for entry in fs::read_dir(db_path)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some((ft, number)) = parse_file_name(&name.to_string_lossy()) {
            if ft == file_type {
                numbers.push(number);
            }
        }
    }

    numbers.sort_unstable();
    Ok(numbers)
}

/// List every recognized database file in the directory.
pub fn list_db_files(db_path: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !db_path.is_dir() {
        return Ok(files);
    }

    for entry in fs::read_dir(db_path)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if parse_file_name(&entry.file_name().to_string_lossy()).is_some() {
            files.push(entry.path());
        }
    }

    files.sort();
    Ok(files)
}

/// Delete a file, ignoring "not found" errors.
pub fn delete_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Create directory if it doesn't exist.
pub fn create_dir_if_missing(path: &Path) -> io::Result<()> {
    match fs::create_dir_all(path) {
        Err(e) if e.kind() != io::ErrorKind::AlreadyExists => Err(e),
        _ => Ok(()),
    }
}

/// Sync a directory so renames and creations inside it are durable.
pub fn sync_dir(path: &Path) -> io::Result<()> {
    fs::File::open(path)?.sync_all()
}
