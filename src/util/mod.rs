//! Utility modules.

pub mod coding;
pub mod comparator;
pub mod crc;
pub mod filename;
