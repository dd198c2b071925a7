//! Integration tests for column families.

use bytes::Bytes;
use kvcore::{
    ColumnFamilyDescriptor, ColumnFamilyOptions, Database, Error, Options, OptionsBuilder,
    ReadOptions, ReverseBytewiseComparator, StringAppendOperator, WriteBatch,
    DEFAULT_COLUMN_FAMILY_NAME,
};
use std::sync::Arc;
use tempfile::TempDir;

fn reverse_options() -> ColumnFamilyOptions {
    ColumnFamilyOptions::new().comparator(Arc::new(ReverseBytewiseComparator::new()))
}

fn append_options() -> ColumnFamilyOptions {
    ColumnFamilyOptions::new().merge_operator(Arc::new(StringAppendOperator::new(",")))
}

/// Test that families are separate keyspaces.
#[test]
fn integration_families_are_isolated() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    let users = db
        .create_column_family("users", ColumnFamilyOptions::default())
        .unwrap();

    db.put(b"k", b"default").unwrap();
    db.put_cf(&users, b"k", b"users").unwrap();

    assert_eq!(db.get(b"k").unwrap(), Some(Bytes::from("default")));
    assert_eq!(db.get_cf(&users, b"k").unwrap(), Some(Bytes::from("users")));

    db.delete_cf(&users, b"k").unwrap();
    assert_eq!(db.get_cf(&users, b"k").unwrap(), None);
    assert_eq!(db.get(b"k").unwrap(), Some(Bytes::from("default")));
}

/// Test that one batch spanning families commits atomically.
#[test]
fn integration_cross_family_batch() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    let orders = db
        .create_column_family("orders", ColumnFamilyOptions::default())
        .unwrap();
    let snapshot = db.snapshot().unwrap();

    let mut batch = WriteBatch::new();
    batch.put("customer:1", "alice");
    batch.put_cf(&orders, "order:1", "customer:1");
    db.write(&batch).unwrap();

    let old = ReadOptions::with_snapshot(&snapshot);
    assert_eq!(db.get_cf_opt(&old, &orders, b"order:1").unwrap(), None);
    assert_eq!(db.get_opt(&old, b"customer:1").unwrap(), None);

    let latest = db.snapshot().unwrap();
    assert_eq!(latest.sequence_number(), snapshot.sequence_number() + 1);

    let iters = db
        .iterators(
            &ReadOptions::with_snapshot(&latest),
            &[db.default_column_family(), orders.clone()],
        )
        .unwrap();
    let counts: Vec<usize> = iters.into_iter().map(|it| it.count()).collect();
    assert_eq!(counts, vec![1, 1]);
}

/// Test per-family comparators.
#[test]
fn integration_family_comparator_orders_keys() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    let reversed = db.create_column_family("reversed", reverse_options()).unwrap();

    for key in ["a", "c", "b"] {
        db.put_cf(&reversed, key.as_bytes(), b"v").unwrap();
        db.put(key.as_bytes(), b"v").unwrap();
    }

    let keys: Vec<_> = db.iter_cf(&reversed).unwrap().map(|(k, _)| k).collect();
    assert_eq!(
        keys,
        vec![Bytes::from("c"), Bytes::from("b"), Bytes::from("a")]
    );
    let keys: Vec<_> = db.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(
        keys,
        vec![Bytes::from("a"), Bytes::from("b"), Bytes::from("c")]
    );
}

/// Test families and their data across a reopen.
#[test]
fn integration_families_persist() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::open(dir.path()).unwrap();
        let logs = db.create_column_family("logs", append_options()).unwrap();
        let reversed = db.create_column_family("reversed", reverse_options()).unwrap();
        db.merge_cf(&logs, b"day", b"login").unwrap();
        db.merge_cf(&logs, b"day", b"logout").unwrap();
        db.put_cf(&reversed, b"x", b"1").unwrap();
        db.close().unwrap();
    }

    let mut names = Database::list_column_families(dir.path()).unwrap();
    names.sort();
    assert_eq!(
        names,
        vec![
            Bytes::from(DEFAULT_COLUMN_FAMILY_NAME),
            Bytes::from("logs"),
            Bytes::from("reversed"),
        ]
    );

    let db = Database::open_cf_descriptors(
        dir.path(),
        Options::default(),
        vec![
            ColumnFamilyDescriptor::new("reversed", reverse_options()),
            ColumnFamilyDescriptor::new("logs", append_options()),
        ],
    )
    .unwrap();

    // Handles follow descriptor order.
    let handles = db.column_families();
    assert_eq!(handles[0].name().as_ref(), b"reversed");
    assert_eq!(handles[1].name().as_ref(), b"logs");

    assert_eq!(
        db.get_cf(&handles[1], b"day").unwrap(),
        Some(Bytes::from("login,logout"))
    );
    assert_eq!(db.get_cf(&handles[0], b"x").unwrap(), Some(Bytes::from("1")));
}

/// Test that reopening with another comparator is refused.
#[test]
fn integration_comparator_mismatch() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::open(dir.path()).unwrap();
        db.create_column_family("ordered", ColumnFamilyOptions::default())
            .unwrap();
        db.close().unwrap();
    }

    let result = Database::open_cf_descriptors(
        dir.path(),
        Options::default(),
        vec![ColumnFamilyDescriptor::new("ordered", reverse_options())],
    );
    assert!(matches!(result, Err(Error::ComparatorMismatch { .. })));
}

/// Test open rules for listed and unlisted families.
#[test]
fn integration_open_family_rules() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::open(dir.path()).unwrap();
        db.create_column_family("extra", ColumnFamilyOptions::default())
            .unwrap();
        db.close().unwrap();
    }

    // A persisted family must be listed on a read-write open.
    assert!(matches!(
        Database::open(dir.path()),
        Err(Error::InvalidArgument(_))
    ));

    // An unknown family needs create_missing_column_families.
    let descriptors = || {
        vec![
            ColumnFamilyDescriptor::new("extra", ColumnFamilyOptions::default()),
            ColumnFamilyDescriptor::new("fresh", ColumnFamilyOptions::default()),
        ]
    };
    assert!(matches!(
        Database::open_cf_descriptors(dir.path(), Options::default(), descriptors()),
        Err(Error::ColumnFamilyNotFound(_))
    ));

    let options = OptionsBuilder::new()
        .create_missing_column_families(true)
        .build()
        .unwrap();
    let db = Database::open_cf_descriptors(dir.path(), options, descriptors()).unwrap();
    let fresh = db.column_family(b"fresh").unwrap();
    db.put_cf(&fresh, b"k", b"v").unwrap();
    db.close().unwrap();

    // Read-only opens may name a subset.
    let db = Database::open_read_only_cf_descriptors(
        dir.path(),
        Options::default(),
        vec![ColumnFamilyDescriptor::new("fresh", ColumnFamilyOptions::default())],
    )
    .unwrap();
    let fresh = db.column_family(b"fresh").unwrap();
    assert_eq!(db.get_cf(&fresh, b"k").unwrap(), Some(Bytes::from("v")));
    assert!(db.column_family(b"extra").is_none());
}

/// Test dropping a family.
#[test]
fn integration_drop_family() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    let temp = db
        .create_column_family("temp", ColumnFamilyOptions::default())
        .unwrap();
    db.put_cf(&temp, b"k", b"v").unwrap();

    assert!(matches!(
        db.create_column_family("temp", ColumnFamilyOptions::default()),
        Err(Error::ColumnFamilyExists(_))
    ));

    db.drop_column_family(&temp).unwrap();
    assert!(matches!(
        db.get_cf(&temp, b"k"),
        Err(Error::HandleClosed(_))
    ));
    assert!(matches!(
        db.put_cf(&temp, b"k", b"v"),
        Err(Error::HandleClosed(_))
    ));
    assert!(db.column_family(b"temp").is_none());

    // The default family cannot be dropped.
    assert!(db.drop_column_family(&db.default_column_family()).is_err());

    // The name is free again, under a new id.
    let again = db
        .create_column_family("temp", ColumnFamilyOptions::default())
        .unwrap();
    assert_ne!(again.id(), temp.id());
    assert_eq!(db.get_cf(&again, b"k").unwrap(), None);
    db.close().unwrap();

    let names = Database::list_column_families(dir.path()).unwrap();
    assert_eq!(names.len(), 2);
}

/// Test merges in a family with an operator and without one.
#[test]
fn integration_family_merge_operator() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    let tags = db.create_column_family("tags", append_options()).unwrap();

    db.put_cf(&tags, b"post", b"rust").unwrap();
    db.merge_cf(&tags, b"post", b"db").unwrap();
    db.merge_cf(&tags, b"post", b"lsm").unwrap();
    assert_eq!(
        db.get_cf(&tags, b"post").unwrap(),
        Some(Bytes::from("rust,db,lsm"))
    );

    db.delete_cf(&tags, b"post").unwrap();
    db.merge_cf(&tags, b"post", b"fresh").unwrap();
    assert_eq!(db.get_cf(&tags, b"post").unwrap(), Some(Bytes::from("fresh")));

    assert!(matches!(
        db.merge(b"post", b"x"),
        Err(Error::MergeOperatorMissing(_))
    ));
    assert_eq!(db.get(b"post").unwrap(), None);
}

/// Test a batch bound to one family.
#[test]
fn integration_batch_for_family() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    let cf = db
        .create_column_family("bound", ColumnFamilyOptions::default())
        .unwrap();

    let mut batch = WriteBatch::for_column_family(&cf);
    batch.put("a", "1");
    batch.delete_range("b", "z");
    db.write(&batch).unwrap();

    assert_eq!(db.get_cf(&cf, b"a").unwrap(), Some(Bytes::from("1")));
    assert_eq!(db.get(b"a").unwrap(), None);
}
