//! Configuration options for kvcore.

use std::sync::Arc;

use bytes::Bytes;

use crate::merge::MergeOperator;
use crate::snapshot::Snapshot;
use crate::util::comparator::{default_comparator, Comparator};
use crate::{Error, Result};

/// Name of the column family that always exists.
pub const DEFAULT_COLUMN_FAMILY_NAME: &str = "default";

/// Default write buffer size (64MB).
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Default L1 size (256MB).
pub const DEFAULT_L1_SIZE: u64 = 256 * 1024 * 1024;

/// Default level size multiplier.
pub const DEFAULT_LEVEL_MULTIPLIER: f64 = 10.0;

/// Maximum key size (8KB).
pub const MAX_KEY_SIZE: usize = 8 * 1024;

/// Maximum value size (1GB).
pub const MAX_VALUE_SIZE: usize = 1024 * 1024 * 1024;

/// WAL sync mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Sync on every write (safest, slowest).
    Always,
    /// Sync after N bytes written.
    Bytes {
        /// Number of bytes before sync.
        bytes: usize,
    },
    /// Let OS decide when to sync. Writes marked `sync` are still synced.
    #[default]
    None,
}

/// Compaction style, passed through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompactionStyle {
    #[default]
    Level,
    Universal,
    Fifo,
}

/// Per column family configuration.
///
/// Only `comparator` and `merge_operator` change engine behaviour; the
/// tuning fields are validated and reported but otherwise carried along.
#[derive(Clone)]
pub struct ColumnFamilyOptions {
    /// Key ordering. Its name is persisted and checked on every reopen.
    pub comparator: Arc<dyn Comparator>,
    /// Operator used to resolve `Merge` records.
    pub merge_operator: Option<Arc<dyn MergeOperator>>,

    pub write_buffer_size: usize,
    pub max_write_buffer_number: usize,
    pub num_levels: usize,
    pub level0_file_num_compaction_trigger: usize,
    pub target_file_size_base: u64,
    pub target_file_size_multiplier: u32,
    pub max_bytes_for_level_base: u64,
    pub max_bytes_for_level_multiplier: f64,
    pub compaction_style: CompactionStyle,
    pub disable_auto_compactions: bool,
}

impl Default for ColumnFamilyOptions {
    fn default() -> Self {
        Self {
            comparator: default_comparator(),
            merge_operator: None,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            max_write_buffer_number: 2,
            num_levels: 7,
            level0_file_num_compaction_trigger: 4,
            target_file_size_base: 64 * 1024 * 1024,
            target_file_size_multiplier: 1,
            max_bytes_for_level_base: DEFAULT_L1_SIZE,
            max_bytes_for_level_multiplier: DEFAULT_LEVEL_MULTIPLIER,
            compaction_style: CompactionStyle::default(),
            disable_auto_compactions: false,
        }
    }
}

impl std::fmt::Debug for ColumnFamilyOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnFamilyOptions")
            .field("comparator", &self.comparator.name())
            .field(
                "merge_operator",
                &self.merge_operator.as_ref().map(|op| op.name().to_string()),
            )
            .field("write_buffer_size", &self.write_buffer_size)
            .field("max_write_buffer_number", &self.max_write_buffer_number)
            .field("num_levels", &self.num_levels)
            .field("compaction_style", &self.compaction_style)
            .finish_non_exhaustive()
    }
}

impl ColumnFamilyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the comparator.
    pub fn comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.comparator = comparator;
        self
    }

    /// Set the merge operator.
    pub fn merge_operator(mut self, op: Arc<dyn MergeOperator>) -> Self {
        self.merge_operator = Some(op);
        self
    }

    /// Validate the tuning parameters.
    pub fn validate(&self) -> Result<()> {
        if self.write_buffer_size < 1024 {
            return Err(Error::InvalidConfiguration(
                "write_buffer_size must be at least 1KB".into(),
            ));
        }

        if self.max_write_buffer_number < 1 {
            return Err(Error::InvalidConfiguration(
                "max_write_buffer_number must be at least 1".into(),
            ));
        }

        if self.num_levels < 1 {
            return Err(Error::InvalidConfiguration(
                "num_levels must be at least 1".into(),
            ));
        }

        if self.max_bytes_for_level_multiplier <= 0.0 {
            return Err(Error::InvalidConfiguration(
                "max_bytes_for_level_multiplier must be positive".into(),
            ));
        }

        if self.comparator.name().is_empty() {
            return Err(Error::InvalidConfiguration(
                "comparator name must not be empty".into(),
            ));
        }

        Ok(())
    }
}

/// Name plus options for one column family at open time.
#[derive(Debug, Clone)]
pub struct ColumnFamilyDescriptor {
    pub name: Bytes,
    pub options: ColumnFamilyOptions,
}

impl ColumnFamilyDescriptor {
    pub fn new(name: impl Into<Bytes>, options: ColumnFamilyOptions) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }

    /// Descriptor for the default column family.
    pub fn default_family(options: ColumnFamilyOptions) -> Self {
        Self::new(DEFAULT_COLUMN_FAMILY_NAME, options)
    }
}

/// Database configuration options.
#[derive(Debug, Clone)]
pub struct Options {
    /// Create database if it doesn't exist.
    pub create_if_missing: bool,

    /// Return error if database already exists.
    pub error_if_exists: bool,

    /// Create column families named at open time that are not persisted yet.
    pub create_missing_column_families: bool,

    /// Treat any checksum problem found during recovery as fatal.
    pub paranoid_checks: bool,

    /// WAL sync mode.
    pub sync_mode: SyncMode,

    /// Maximum key size.
    pub max_key_size: usize,

    /// Maximum value size.
    pub max_value_size: usize,

    /// Options for the default column family.
    pub cf_options: ColumnFamilyOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            create_missing_column_families: false,
            paranoid_checks: false,
            sync_mode: SyncMode::default(),
            max_key_size: MAX_KEY_SIZE,
            max_value_size: MAX_VALUE_SIZE,
            cf_options: ColumnFamilyOptions::default(),
        }
    }
}

impl Options {
    /// Create new options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<()> {
        if self.max_key_size == 0 || self.max_key_size > MAX_KEY_SIZE {
            return Err(Error::InvalidConfiguration(format!(
                "max_key_size must be between 1 and {}",
                MAX_KEY_SIZE
            )));
        }

        if self.max_value_size > MAX_VALUE_SIZE {
            return Err(Error::InvalidConfiguration(format!(
                "max_value_size cannot exceed {}",
                MAX_VALUE_SIZE
            )));
        }

        if let SyncMode::Bytes { bytes: 0 } = self.sync_mode {
            return Err(Error::InvalidConfiguration(
                "sync_mode byte threshold must be positive".into(),
            ));
        }

        self.cf_options.validate()
    }
}

/// Builder for Options.
#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Create a new builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.options.create_if_missing = value;
        self
    }

    pub fn error_if_exists(mut self, value: bool) -> Self {
        self.options.error_if_exists = value;
        self
    }

    pub fn create_missing_column_families(mut self, value: bool) -> Self {
        self.options.create_missing_column_families = value;
        self
    }

    pub fn paranoid_checks(mut self, value: bool) -> Self {
        self.options.paranoid_checks = value;
        self
    }

    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.options.sync_mode = mode;
        self
    }

    pub fn max_key_size(mut self, size: usize) -> Self {
        self.options.max_key_size = size;
        self
    }

    pub fn max_value_size(mut self, size: usize) -> Self {
        self.options.max_value_size = size;
        self
    }

    /// Comparator of the default column family.
    pub fn comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.options.cf_options.comparator = comparator;
        self
    }

    /// Merge operator of the default column family.
    pub fn merge_operator(mut self, op: Arc<dyn MergeOperator>) -> Self {
        self.options.cf_options.merge_operator = Some(op);
        self
    }

    pub fn cf_options(mut self, cf_options: ColumnFamilyOptions) -> Self {
        self.options.cf_options = cf_options;
        self
    }

    /// Build the options.
    pub fn build(self) -> Result<Options> {
        self.options.validate()?;
        Ok(self.options)
    }
}

/// Per-read settings.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Read as of this snapshot instead of the latest state.
    pub snapshot: Option<Snapshot>,
    /// Re-read the live logs with strict checksums before answering, so a
    /// damaged log fails the read instead of going unnoticed.
    pub verify_checksums: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            snapshot: None,
            verify_checksums: false,
        }
    }
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read options pinned to a snapshot.
    pub fn with_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            snapshot: Some(snapshot.clone()),
            ..Self::default()
        }
    }

    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }
}

/// Per-write settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Sync the log before acknowledging the write.
    pub sync: bool,
    /// Skip the log entirely. Writes are lost on crash.
    pub disable_wal: bool,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::comparator::ReverseBytewiseComparator;

    #[test]
    fn test_default_options() {
        let opts = Options::default();
        assert!(opts.create_if_missing);
        assert!(!opts.error_if_exists);
        assert!(!opts.create_missing_column_families);
        assert_eq!(opts.cf_options.comparator.name(), "kvcore.BytewiseComparator");
        assert!(opts.cf_options.merge_operator.is_none());
    }

    #[test]
    fn test_options_validation() {
        let mut opts = Options::default();
        assert!(opts.validate().is_ok());

        opts.cf_options.write_buffer_size = 100;
        assert!(opts.validate().is_err());

        let mut opts = Options::default();
        opts.max_key_size = MAX_KEY_SIZE + 1;
        assert!(matches!(
            opts.validate(),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_options_builder() {
        let opts = OptionsBuilder::new()
            .create_if_missing(false)
            .create_missing_column_families(true)
            .comparator(Arc::new(ReverseBytewiseComparator::new()))
            .max_key_size(128)
            .build()
            .unwrap();

        assert!(!opts.create_if_missing);
        assert!(opts.create_missing_column_families);
        assert_eq!(opts.max_key_size, 128);
        assert_eq!(
            opts.cf_options.comparator.name(),
            "kvcore.ReverseBytewiseComparator"
        );
    }

    #[test]
    fn test_builder_rejects_zero_sync_bytes() {
        let result = OptionsBuilder::new()
            .sync_mode(SyncMode::Bytes { bytes: 0 })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_default_descriptor() {
        let desc = ColumnFamilyDescriptor::default_family(ColumnFamilyOptions::default());
        assert_eq!(&desc.name[..], DEFAULT_COLUMN_FAMILY_NAME.as_bytes());
    }
}
