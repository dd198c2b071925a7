//! Database iterators for range scans.
//!
//! - DBIterator: ordered cursor over the keys visible at one sequence
//! - DBIteratorBuilder: bounds, prefix, snapshot and direction
//! - Deleted keys are skipped and merges are already resolved

mod db_iterator;

pub use db_iterator::{DBIterator, DBIteratorBuilder, IteratorDirection};
