//! # kvcore
//!
//! An embedded, ordered key-value engine core.
//!
//! ## Features
//!
//! - **Atomic batches**: every committed batch consumes exactly one sequence
//!   number and becomes visible all at once
//! - **Snapshots**: point-in-time reads pinned to a sequence number
//! - **Column families**: named keyspaces, each with its own comparator and
//!   merge operator, sharing one sequence space
//! - **Indexed write batches**: read-your-own-writes lookups and ordered
//!   overlay iteration over uncommitted writes
//! - **Durability**: write-ahead logging with configurable sync, plus
//!   checkpoints and backups
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kvcore::{Database, IndexedWriteBatch, ReadOptions, WriteBatch};
//!
//! let db = Database::open("./my_data")?;
//!
//! db.put(b"hello", b"world")?;
//! let value = db.get(b"hello")?;
//!
//! let mut batch = WriteBatch::new();
//! batch.put("key1", "value1");
//! batch.delete("hello");
//! db.write(&batch)?;
//!
//! let snapshot = db.snapshot()?;
//! let mut overlay = IndexedWriteBatch::new();
//! overlay.put("key2", "value2");
//! let merged = overlay.iter_with_base(&db, &ReadOptions::with_snapshot(&snapshot))?;
//! ```

// Public modules
pub mod error;
pub mod merge;
pub mod options;
pub mod types;

mod db;

pub mod backup;
pub mod batch;
pub mod checkpoint;
mod column_family;
mod iterator;
mod memtable;
pub mod properties;
mod snapshot;
mod util;
mod version;
mod wal;

pub use error::{Error, Result};
pub use options::{
    ColumnFamilyDescriptor, ColumnFamilyOptions, CompactionStyle, Options, OptionsBuilder,
    ReadOptions, SyncMode, WriteOptions, DEFAULT_COLUMN_FAMILY_NAME,
};
pub use types::{LookupResult, SequenceNumber, ValueType};

pub use db::Database;

pub use backup::{BackupEngine, BackupInfo};
pub use batch::{
    BatchRecord, IndexedWriteBatch, WriteBatch, WriteBatchHandler, WriteBatchIterator,
    WriteEntry, WriteType,
};
pub use checkpoint::Checkpoint;
pub use column_family::{ColumnFamilyHandle, ColumnFamilyMetadata};
pub use iterator::{DBIterator, DBIteratorBuilder, IteratorDirection};
pub use merge::{FnMergeOperator, MergeOperator, StringAppendOperator};
pub use properties::{DbStats, Property};
pub use snapshot::Snapshot;
pub use util::comparator::{
    default_comparator, BytewiseComparator, Comparator, ReverseBytewiseComparator,
    ReverseComparator, StringComparator,
};
