//! Integration tests for indexed write batches read against a live database.

use bytes::Bytes;
use kvcore::{
    ColumnFamilyOptions, Database, Error, IndexedWriteBatch, OptionsBuilder, ReadOptions,
    ReverseBytewiseComparator, StringAppendOperator, WriteType,
};
use std::sync::Arc;
use tempfile::TempDir;

fn collect(iter: kvcore::DBIterator) -> Vec<(String, String)> {
    iter.map(|(k, v)| {
        (
            String::from_utf8(k.to_vec()).unwrap(),
            String::from_utf8(v.to_vec()).unwrap(),
        )
    })
    .collect()
}

fn pair(k: &str, v: &str) -> (String, String) {
    (k.to_string(), v.to_string())
}

/// Test read-your-own-writes lookups through the batch.
#[test]
fn integration_get_from_batch_and_db() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    db.put(b"a", b"db-a").unwrap();
    db.put(b"b", b"db-b").unwrap();
    db.put(b"c", b"db-c").unwrap();

    let mut batch = IndexedWriteBatch::new();
    batch.put("a", "batch-a");
    batch.delete("b");
    batch.put("d", "batch-d");

    let options = ReadOptions::new();
    let get = |key: &[u8]| batch.get_from_batch_and_db(&db, &options, key).unwrap();
    assert_eq!(get(b"a"), Some(Bytes::from("batch-a")));
    assert_eq!(get(b"b"), None);
    assert_eq!(get(b"c"), Some(Bytes::from("db-c")));
    assert_eq!(get(b"d"), Some(Bytes::from("batch-d")));
    assert_eq!(get(b"e"), None);

    // Nothing reached the database yet.
    assert_eq!(db.get(b"a").unwrap(), Some(Bytes::from("db-a")));
    assert_eq!(db.get(b"d").unwrap(), None);

    db.write(&batch).unwrap();
    assert_eq!(db.get(b"a").unwrap(), Some(Bytes::from("batch-a")));
    assert_eq!(db.get(b"b").unwrap(), None);
    assert_eq!(db.get(b"d").unwrap(), Some(Bytes::from("batch-d")));
}

/// Test the merged view of batch and database.
#[test]
fn integration_iter_with_base() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    for (k, v) in [("a", "1"), ("c", "3"), ("e", "5"), ("g", "7")] {
        db.put(k.as_bytes(), v.as_bytes()).unwrap();
    }

    let mut batch = IndexedWriteBatch::new();
    batch.put("b", "batch-b");
    batch.put("c", "batch-c");
    batch.delete("e");
    batch.put("h", "batch-h");

    let merged = collect(batch.iter_with_base(&db, &ReadOptions::new()).unwrap());
    assert_eq!(
        merged,
        vec![
            pair("a", "1"),
            pair("b", "batch-b"),
            pair("c", "batch-c"),
            pair("g", "7"),
            pair("h", "batch-h"),
        ]
    );
}

/// Test that the database side of the overlay honors a snapshot.
#[test]
fn integration_iter_with_base_at_snapshot() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    db.put(b"a", b"old").unwrap();
    let snapshot = db.snapshot().unwrap();
    db.put(b"a", b"new").unwrap();
    db.put(b"z", b"late").unwrap();

    let mut batch = IndexedWriteBatch::new();
    batch.put("m", "batch");

    let options = ReadOptions::with_snapshot(&snapshot);
    let merged = collect(batch.iter_with_base(&db, &options).unwrap());
    assert_eq!(merged, vec![pair("a", "old"), pair("m", "batch")]);
    assert_eq!(
        batch.get_from_batch_and_db(&db, &options, b"a").unwrap(),
        Some(Bytes::from("old"))
    );
}

/// Test range deletions in the overlay.
#[test]
fn integration_overlay_range_delete() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    for k in ["a", "b", "c", "d"] {
        db.put(k.as_bytes(), b"db").unwrap();
    }

    let mut batch = IndexedWriteBatch::new();
    batch.delete_range("b", "d");
    batch.put("c", "revived");

    let merged = collect(batch.iter_with_base(&db, &ReadOptions::new()).unwrap());
    assert_eq!(
        merged,
        vec![pair("a", "db"), pair("c", "revived"), pair("d", "db")]
    );
    assert_eq!(
        batch
            .get_from_batch_and_db(&db, &ReadOptions::new(), b"b")
            .unwrap(),
        None
    );
}

/// Test merge operands resolved against the database value.
#[test]
fn integration_overlay_merge_reads_through() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    let tags = db
        .create_column_family(
            "tags",
            ColumnFamilyOptions::new().merge_operator(Arc::new(StringAppendOperator::new(","))),
        )
        .unwrap();
    db.put_cf(&tags, b"post", b"rust").unwrap();

    let mut batch = IndexedWriteBatch::new();
    batch.merge_cf(&tags, "post", "db");
    batch.merge_cf(&tags, "post", "lsm");

    // The batch alone cannot settle the value.
    assert_eq!(
        batch.get_from_batch_cf(&tags, b"post").unwrap_err(),
        Error::MergeInProgress
    );
    assert_eq!(
        batch
            .get_from_batch_and_db_cf(&db, &ReadOptions::new(), &tags, b"post")
            .unwrap(),
        Some(Bytes::from("rust,db,lsm"))
    );

    let merged = collect(
        batch
            .iter_with_base_cf(&db, &ReadOptions::new(), &tags)
            .unwrap(),
    );
    assert_eq!(merged, vec![pair("post", "rust,db,lsm")]);

    db.write(&batch).unwrap();
    assert_eq!(
        db.get_cf(&tags, b"post").unwrap(),
        Some(Bytes::from("rust,db,lsm"))
    );
}

/// Test that rolled-back records vanish from lookups and from the commit.
#[test]
fn integration_save_point_rollback() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    db.put(b"k", b"db").unwrap();

    let mut batch = IndexedWriteBatch::new();
    batch.put("kept", "1");
    batch.set_save_point();
    batch.put("k", "overwritten");
    batch.put("dropped", "2");
    assert_eq!(
        batch
            .get_from_batch_and_db(&db, &ReadOptions::new(), b"k")
            .unwrap(),
        Some(Bytes::from("overwritten"))
    );

    batch.rollback_to_save_point().unwrap();
    assert_eq!(batch.count(), 1);
    assert_eq!(
        batch
            .get_from_batch_and_db(&db, &ReadOptions::new(), b"k")
            .unwrap(),
        Some(Bytes::from("db"))
    );
    assert_eq!(batch.rollback_to_save_point(), Err(Error::NoSavePoint));

    db.write(&batch).unwrap();
    assert_eq!(db.get(b"kept").unwrap(), Some(Bytes::from("1")));
    assert_eq!(db.get(b"dropped").unwrap(), None);
    assert_eq!(db.get(b"k").unwrap(), Some(Bytes::from("db")));
}

/// Test the overlay cursor of a family with a reversed comparator.
#[test]
fn integration_family_overlay_order() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    let reversed = db
        .create_column_family(
            "reversed",
            ColumnFamilyOptions::new().comparator(Arc::new(ReverseBytewiseComparator::new())),
        )
        .unwrap();
    db.put_cf(&reversed, b"b", b"db").unwrap();

    let mut batch = IndexedWriteBatch::new();
    batch.put_cf(&reversed, "a", "1");
    batch.put_cf(&reversed, "c", "3");
    batch.put("x", "default family");

    let mut iter = batch.iterator_cf(&reversed);
    iter.seek_to_first();
    let first = iter.entry().unwrap();
    assert_eq!(first.record_type, WriteType::Put);
    assert_eq!(first.key, Bytes::from("c"));
    assert_eq!(iter.len(), 2);

    let merged = collect(
        batch
            .iter_with_base_cf(&db, &ReadOptions::new(), &reversed)
            .unwrap(),
    );
    assert_eq!(merged, vec![pair("c", "3"), pair("b", "db"), pair("a", "1")]);
}

fn reversed_db(dir: &TempDir) -> Arc<Database> {
    let options = OptionsBuilder::new()
        .comparator(Arc::new(ReverseBytewiseComparator::new()))
        .build()
        .unwrap();
    Database::open_with_options(dir.path(), options).unwrap()
}

/// Test the overlay of a default family ordered by a reversed comparator.
#[test]
fn integration_reversed_default_family_overlay() {
    let dir = TempDir::new().unwrap();
    let db = reversed_db(&dir);
    db.put(b"a", b"db-a").unwrap();
    db.put(b"c", b"db-c").unwrap();

    let mut batch = db.indexed_write_batch();
    batch.put("b", "batch-b");
    batch.put("d", "batch-d");
    batch.put("c", "batch-c");

    let merged = collect(batch.iter_with_base(&db, &ReadOptions::new()).unwrap());
    assert_eq!(
        merged,
        vec![
            pair("d", "batch-d"),
            pair("c", "batch-c"),
            pair("b", "batch-b"),
            pair("a", "db-a"),
        ]
    );

    // [c, a) under the reversed order covers c and b only.
    let mut ranged = db.indexed_write_batch();
    ranged.delete_range("c", "a");
    let options = ReadOptions::new();
    let from_batch: Vec<Option<Bytes>> = [&b"a"[..], &b"b"[..], &b"c"[..]]
        .iter()
        .map(|k| ranged.get_from_batch_and_db(&db, &options, k).unwrap())
        .collect();
    assert_eq!(from_batch, vec![Some(Bytes::from("db-a")), None, None]);

    db.write(&ranged).unwrap();
    let committed: Vec<Option<Bytes>> = [&b"a"[..], &b"b"[..], &b"c"[..]]
        .iter()
        .map(|k| db.get(k).unwrap())
        .collect();
    assert_eq!(committed, from_batch);
}

/// Test that a batch ordered differently from the family is refused, and
/// re-keyed once the family's handle is used.
#[test]
fn integration_overlay_comparator_mismatch() {
    let dir = TempDir::new().unwrap();
    let db = reversed_db(&dir);
    db.put(b"a", b"db-a").unwrap();
    db.put(b"c", b"db-c").unwrap();

    let mut batch = IndexedWriteBatch::new();
    batch.put("b", "batch-b");
    batch.put("c", "batch-c");
    assert!(matches!(
        batch.iter_with_base(&db, &ReadOptions::new()),
        Err(Error::ComparatorMismatch { .. })
    ));
    assert!(matches!(
        batch.get_from_batch_and_db(&db, &ReadOptions::new(), b"b"),
        Err(Error::ComparatorMismatch { .. })
    ));

    batch.put_cf(&db.default_column_family(), "d", "batch-d");
    let merged = collect(batch.iter_with_base(&db, &ReadOptions::new()).unwrap());
    assert_eq!(
        merged,
        vec![
            pair("d", "batch-d"),
            pair("c", "batch-c"),
            pair("b", "batch-b"),
            pair("a", "db-a"),
        ]
    );
    assert_eq!(
        batch
            .get_from_batch_and_db(&db, &ReadOptions::new(), b"c")
            .unwrap(),
        Some(Bytes::from("batch-c"))
    );
}
