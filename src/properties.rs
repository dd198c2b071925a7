//! Database properties.
//!
//! Named, read-only views of internal state:
//!
//! - **Memtable**: entries, deletions, range deletions, memory usage
//! - **Snapshots**: live count and the oldest pinned sequence
//! - **Storage**: live log files, latest sequence number
//! - **Summaries**: `kvcore.stats` (text) and `kvcore.cfstats` (map)

use std::collections::BTreeMap;
use std::fmt;

use crate::column_family::{ColumnFamilyHandle, ColumnFamilyMetadata};
use crate::db::Database;
use crate::Result;

/// Every property the database answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    NumEntriesActiveMemTable,
    NumDeletesActiveMemTable,
    NumRangeDeletes,
    EstimateNumKeys,
    CurSizeActiveMemTable,
    NumSnapshots,
    /// Sequence pinned by the oldest live snapshot, 0 without snapshots.
    OldestSnapshotTime,
    LatestSequenceNumber,
    Stats,
    CfStats,
    LogFiles,
}

impl Property {
    pub const ALL: [Property; 11] = [
        Property::NumEntriesActiveMemTable,
        Property::NumDeletesActiveMemTable,
        Property::NumRangeDeletes,
        Property::EstimateNumKeys,
        Property::CurSizeActiveMemTable,
        Property::NumSnapshots,
        Property::OldestSnapshotTime,
        Property::LatestSequenceNumber,
        Property::Stats,
        Property::CfStats,
        Property::LogFiles,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Property::NumEntriesActiveMemTable => "kvcore.num-entries-active-mem-table",
            Property::NumDeletesActiveMemTable => "kvcore.num-deletes-active-mem-table",
            Property::NumRangeDeletes => "kvcore.num-range-deletes",
            Property::EstimateNumKeys => "kvcore.estimate-num-keys",
            Property::CurSizeActiveMemTable => "kvcore.cur-size-active-mem-table",
            Property::NumSnapshots => "kvcore.num-snapshots",
            Property::OldestSnapshotTime => "kvcore.oldest-snapshot-time",
            Property::LatestSequenceNumber => "kvcore.latest-sequence-number",
            Property::Stats => "kvcore.stats",
            Property::CfStats => "kvcore.cfstats",
            Property::LogFiles => "kvcore.log-files",
        }
    }

    /// Look a property up by name. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    fn is_integer(self) -> bool {
        !matches!(self, Property::Stats | Property::CfStats)
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Point-in-time summary of one column family.
#[derive(Debug, Clone)]
pub struct ColumnFamilyStats {
    pub name: String,
    pub entries: u64,
    pub deletes: u64,
    pub range_deletes: u64,
    pub memory_usage: u64,
}

/// Point-in-time summary of the database, rendered by `kvcore.stats`.
#[derive(Debug, Clone)]
pub struct DbStats {
    pub latest_sequence: u64,
    pub snapshots: u64,
    pub oldest_snapshot: Option<u64>,
    pub log_files: u64,
    pub column_families: Vec<ColumnFamilyStats>,
}

impl fmt::Display for DbStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Database Stats ===")?;
        writeln!(f)?;
        writeln!(f, "Sequence:  {}", self.latest_sequence)?;
        match self.oldest_snapshot {
            Some(seq) => writeln!(f, "Snapshots: {} (oldest at {})", self.snapshots, seq)?,
            None => writeln!(f, "Snapshots: {}", self.snapshots)?,
        }
        writeln!(f, "Log files: {}", self.log_files)?;
        for cf in &self.column_families {
            writeln!(f)?;
            writeln!(f, "Column family {}:", cf.name)?;
            writeln!(f, "  Entries:       {}", cf.entries)?;
            writeln!(f, "  Deletes:       {}", cf.deletes)?;
            writeln!(f, "  Range deletes: {}", cf.range_deletes)?;
            writeln!(f, "  Memory:        {}", format_bytes(cf.memory_usage))?;
        }
        Ok(())
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

impl Database {
    /// Property of the default column family, rendered as text.
    pub fn property_value(&self, name: &str) -> Result<Option<String>> {
        self.property_value_cf(&self.default_column_family(), name)
    }

    pub fn property_value_cf(&self, cf: &ColumnFamilyHandle, name: &str) -> Result<Option<String>> {
        let Some(property) = Property::from_name(name) else {
            return Ok(None);
        };
        match property {
            Property::Stats => Ok(Some(self.stats()?.to_string())),
            Property::CfStats => Ok(Some(
                self.cf_stats_map(cf)?
                    .into_iter()
                    .map(|(k, v)| format!("{}={}\n", k, v))
                    .collect(),
            )),
            p => Ok(self.integer_property(cf, p)?.map(|v| v.to_string())),
        }
    }

    /// Integer-valued property of the default column family.
    pub fn property_int_value(&self, name: &str) -> Result<Option<u64>> {
        self.property_int_value_cf(&self.default_column_family(), name)
    }

    pub fn property_int_value_cf(&self, cf: &ColumnFamilyHandle, name: &str) -> Result<Option<u64>> {
        match Property::from_name(name) {
            Some(p) if p.is_integer() => self.integer_property(cf, p),
            _ => Ok(None),
        }
    }

    /// Map-valued property of the default column family.
    pub fn property_map_value(&self, name: &str) -> Result<Option<BTreeMap<String, String>>> {
        self.property_map_value_cf(&self.default_column_family(), name)
    }

    pub fn property_map_value_cf(
        &self,
        cf: &ColumnFamilyHandle,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        match Property::from_name(name) {
            Some(Property::CfStats) => Ok(Some(self.cf_stats_map(cf)?)),
            _ => Ok(None),
        }
    }

    fn integer_property(&self, cf: &ColumnFamilyHandle, property: Property) -> Result<Option<u64>> {
        if self.is_closed() {
            return Err(crate::Error::HandleClosed("database"));
        }
        let data = cf.data()?;
        let memtable = &data.memtable;
        let value = match property {
            Property::NumEntriesActiveMemTable => memtable.entry_count() as u64,
            Property::NumDeletesActiveMemTable => memtable.deletion_count() as u64,
            Property::NumRangeDeletes => memtable.range_tombstone_count() as u64,
            Property::EstimateNumKeys => {
                memtable.entry_count().saturating_sub(memtable.deletion_count()) as u64
            }
            Property::CurSizeActiveMemTable => memtable.approximate_memory_usage() as u64,
            Property::NumSnapshots => self.sequences().snapshot_count() as u64,
            Property::OldestSnapshotTime => self.sequences().oldest_snapshot().unwrap_or(0),
            Property::LatestSequenceNumber => self.latest_sequence_number(),
            Property::LogFiles => self.live_log_files()?.len() as u64,
            Property::Stats | Property::CfStats => return Ok(None),
        };
        Ok(Some(value))
    }

    fn cf_stats_map(&self, cf: &ColumnFamilyHandle) -> Result<BTreeMap<String, String>> {
        let mut map = BTreeMap::new();
        for property in Property::ALL.into_iter().filter(|p| p.is_integer()) {
            if let Some(value) = self.integer_property(cf, property)? {
                map.insert(property.name().to_string(), value.to_string());
            }
        }
        map.insert("name".to_string(), cf.name_lossy());
        Ok(map)
    }

    /// Summary of the whole database.
    pub fn stats(&self) -> Result<DbStats> {
        if self.is_closed() {
            return Err(crate::Error::HandleClosed("database"));
        }
        let column_families = self
            .all_column_families()
            .into_iter()
            .map(|cf| ColumnFamilyStats {
                name: cf.name_lossy(),
                entries: cf.memtable.entry_count() as u64,
                deletes: cf.memtable.deletion_count() as u64,
                range_deletes: cf.memtable.range_tombstone_count() as u64,
                memory_usage: cf.memtable.approximate_memory_usage() as u64,
            })
            .collect();

        Ok(DbStats {
            latest_sequence: self.latest_sequence_number(),
            snapshots: self.sequences().snapshot_count() as u64,
            oldest_snapshot: self.sequences().oldest_snapshot(),
            log_files: self.live_log_files()?.len() as u64,
            column_families,
        })
    }

    /// Size and entry summary of `cf`.
    pub fn column_family_metadata(&self, cf: &ColumnFamilyHandle) -> Result<ColumnFamilyMetadata> {
        if self.is_closed() {
            return Err(crate::Error::HandleClosed("database"));
        }
        let data = cf.data()?;
        Ok(ColumnFamilyMetadata {
            name: data.name.clone(),
            size: data.memtable.approximate_memory_usage() as u64,
            entry_count: data.memtable.entry_count() as u64,
            log_files: self.live_log_files()?.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_property_names_round_trip() {
        for property in Property::ALL {
            assert_eq!(Property::from_name(property.name()), Some(property));
        }
        assert_eq!(Property::from_name("kvcore.no-such-thing"), None);
    }

    #[test]
    fn test_integer_properties() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        db.put(b"a", b"1").unwrap();
        db.put(b"b", b"2").unwrap();
        db.delete(b"a").unwrap();
        db.delete_range(b"x", b"z").unwrap();

        assert_eq!(
            db.property_int_value("kvcore.num-entries-active-mem-table").unwrap(),
            Some(3)
        );
        assert_eq!(
            db.property_int_value("kvcore.num-deletes-active-mem-table").unwrap(),
            Some(1)
        );
        assert_eq!(db.property_int_value("kvcore.num-range-deletes").unwrap(), Some(1));
        assert_eq!(db.property_int_value("kvcore.latest-sequence-number").unwrap(), Some(4));
        assert_eq!(db.property_int_value("kvcore.log-files").unwrap(), Some(1));
        assert_eq!(db.property_int_value("kvcore.stats").unwrap(), None);
        assert_eq!(db.property_value("unknown").unwrap(), None);
    }

    #[test]
    fn test_snapshot_properties() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        assert_eq!(db.property_int_value("kvcore.num-snapshots").unwrap(), Some(0));
        assert_eq!(db.property_int_value("kvcore.oldest-snapshot-time").unwrap(), Some(0));

        db.put(b"k", b"v").unwrap();
        let snapshot = db.snapshot().unwrap();
        db.put(b"k", b"w").unwrap();

        assert_eq!(db.property_int_value("kvcore.num-snapshots").unwrap(), Some(1));
        assert_eq!(db.property_int_value("kvcore.oldest-snapshot-time").unwrap(), Some(1));
        snapshot.release();
        assert_eq!(db.property_int_value("kvcore.num-snapshots").unwrap(), Some(0));
    }

    #[test]
    fn test_text_and_map_properties() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        db.put(b"k", b"v").unwrap();

        let stats = db.property_value("kvcore.stats").unwrap().unwrap();
        assert!(stats.contains("Column family default"));

        let map = db.property_map_value("kvcore.cfstats").unwrap().unwrap();
        assert_eq!(map["name"], "default");
        assert_eq!(map["kvcore.num-entries-active-mem-table"], "1");
        assert!(db.property_map_value("kvcore.num-snapshots").unwrap().is_none());

        let metadata = db.column_family_metadata(&db.default_column_family()).unwrap();
        assert_eq!(metadata.entry_count, 1);
        assert!(metadata.size > 0);
    }
}
