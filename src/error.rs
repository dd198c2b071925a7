//! Error types for kvcore.

use std::io;
use thiserror::Error;

/// Result type alias for kvcore operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for engine operations.
///
/// A missing key is never an error: reads return `Ok(None)` for absent keys,
/// so callers can always tell "key absent" from "store broken".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// I/O error from file operations. Transient; callers may retry.
    #[error("I/O error: {0}")]
    Io(String),

    /// Data corruption detected. Fatal.
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Operation against a closed database, column family, snapshot or iterator.
    #[error("{0} is closed")]
    HandleClosed(&'static str),

    /// A column family was reopened with a different comparator.
    #[error(
        "Comparator mismatch for column family {column_family:?}: expected {expected}, found {actual}"
    )]
    ComparatorMismatch {
        column_family: String,
        expected: String,
        actual: String,
    },

    /// Rollback requested with an empty save point stack.
    #[error("No save point to roll back to")]
    NoSavePoint,

    /// A key or value exceeds the configured size limit.
    #[error("{what} too large: {size} bytes (max: {max})")]
    PayloadTooLarge {
        what: &'static str,
        size: usize,
        max: usize,
    },

    /// Write attempted against a read-only engine.
    #[error("Database was opened read-only")]
    ReadOnlyViolation,

    /// No backup with the given ID.
    #[error("Backup {0} not found")]
    BackupNotFound(u32),

    /// Database already exists when `error_if_exists` is set.
    #[error("Database already exists at: {0}")]
    DatabaseExists(String),

    /// Database not found and `create_if_missing` is unset.
    #[error("Database not found at: {0}")]
    DatabaseNotFound(String),

    /// A persisted column family was not supplied, or a supplied one is not
    /// persisted and auto-creation is off.
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Column family name already taken.
    #[error("Column family already exists: {0}")]
    ColumnFamilyExists(String),

    /// Lock error.
    #[error("Lock error: {0}")]
    LockError(String),

    /// Merge record against a column family without a merge operator.
    #[error("No merge operator configured for column family {0:?}")]
    MergeOperatorMissing(String),

    /// Batch-only lookup hit merge operands with no base value in the batch.
    #[error("Merge in progress: base value not in batch")]
    MergeInProgress,

    /// CRC checksum mismatch.
    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    /// Invalid file format or magic number.
    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal error (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// Create a corruption error with the given message.
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        Error::Corruption(msg.into())
    }

    /// Create an invalid format error.
    pub fn invalid_format<S: Into<String>>(msg: S) -> Self {
        Error::InvalidFormat(msg.into())
    }

    /// Create an invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Create an internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Check if a higher layer may retry the failed call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_) | Error::LockError(_))
    }

    /// Check if this error indicates corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::Corruption(_) | Error::CrcMismatch { .. } | Error::InvalidFormat(_)
        )
    }

    /// Check if this error reports use of a dead handle.
    pub fn is_handle_closed(&self) -> bool {
        matches!(self, Error::HandleClosed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::corruption("bad data");
        assert_eq!(format!("{}", err), "Corruption detected: bad data");

        let err = Error::PayloadTooLarge {
            what: "Key",
            size: 1000,
            max: 100,
        };
        assert_eq!(format!("{}", err), "Key too large: 1000 bytes (max: 100)");

        assert_eq!(
            format!("{}", Error::HandleClosed("snapshot")),
            "snapshot is closed"
        );
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::Io("disk busy".into()).is_retryable());
        assert!(!Error::Corruption("bad".into()).is_retryable());
        assert!(!Error::NoSavePoint.is_retryable());
    }

    #[test]
    fn test_error_is_corruption() {
        assert!(Error::corruption("bad").is_corruption());
        assert!(Error::CrcMismatch {
            expected: 1,
            actual: 2
        }
        .is_corruption());
        assert!(!Error::ReadOnlyViolation.is_corruption());
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::Other, "boom");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
