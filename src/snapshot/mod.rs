//! Snapshots and sequence number management.
//!
//! Every committed batch gets the next sequence number. A snapshot pins the
//! last published sequence; reads through it ignore anything newer.

mod manager;
#[allow(clippy::module_inception)]
mod snapshot;

pub(crate) use manager::SequenceManager;
pub use snapshot::{Snapshot, SnapshotList};
