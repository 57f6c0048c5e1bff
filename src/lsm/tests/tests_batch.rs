use tempfile::TempDir;

use crate::error::ErrorKind;
use crate::lsm::BatchOptions;
use crate::lsm::tests::open_tree;

#[test]
fn batch_commits_all_operations() {
    let tmp = TempDir::new().unwrap();
    let tree = open_tree(&tmp);

    let mut batch = tree.batch();
    batch.put(b"a", b"1").put(b"b", b"2").delete(b"c");
    assert_eq!(batch.len(), 3);
    let report = batch.commit().unwrap();

    assert_eq!(report.committed, 3);
    assert_eq!(report.failed, 0);
    assert!(report.first_error.is_none());
    assert!(report.wal_writes >= 3);
    assert_eq!(&tree.get(b"a").unwrap().unwrap()[..], b"1");
    assert_eq!(&tree.get(b"b").unwrap().unwrap()[..], b"2");
    assert!(tree.get(b"c").unwrap().is_none());
}

#[test]
fn batch_sequences_are_monotonic_and_later_than_prior_writes() {
    let tmp = TempDir::new().unwrap();
    let tree = open_tree(&tmp);

    tree.put(b"before", b"x").unwrap();
    let seq_before = tree.last_seq();

    let mut batch = tree.batch();
    batch.put(b"a", b"1").put(b"b", b"2");
    batch.commit().unwrap();

    assert!(tree.last_seq() >= seq_before + 2);
}

#[test]
fn empty_batch_is_a_no_op() {
    let tmp = TempDir::new().unwrap();
    let tree = open_tree(&tmp);

    let report = tree.batch().commit().unwrap();
    assert_eq!(report.committed, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(report.wal_writes, 0);
}

#[test]
fn invalid_operation_fails_the_whole_batch_upfront() {
    let tmp = TempDir::new().unwrap();
    let tree = open_tree(&tmp);
    tree.put(b"existing", b"untouched").unwrap();

    let mut batch = tree.batch();
    batch.put(b"good", b"1");
    batch.put(b"", b"empty key");
    batch.put(b"also-good", b"2");
    let report = batch.commit().unwrap();

    assert_eq!(report.committed, 0);
    assert_eq!(report.failed, 3);
    assert_eq!(report.first_error, Some(ErrorKind::InvalidParam));
    assert_eq!(report.first_error_index, Some(1));
    assert_eq!(report.wal_writes, 0);

    // Nothing leaked into the tree.
    assert!(tree.get(b"good").unwrap().is_none());
    assert!(tree.get(b"also-good").unwrap().is_none());
    assert_eq!(&tree.get(b"existing").unwrap().unwrap()[..], b"untouched");
}

#[test]
fn dedup_keeps_the_latest_operation_per_key() {
    let tmp = TempDir::new().unwrap();
    let tree = open_tree(&tmp);

    let mut batch = tree.batch_with(BatchOptions {
        dedup_keys: true,
        ..BatchOptions::default()
    });
    batch.put(b"k", b"first");
    batch.put(b"k", b"second");
    batch.delete(b"other");
    batch.put(b"k", b"final");
    let report = batch.commit().unwrap();

    assert_eq!(report.committed, 2);
    assert_eq!(&tree.get(b"k").unwrap().unwrap()[..], b"final");
}

#[test]
fn dedup_applies_a_trailing_delete() {
    let tmp = TempDir::new().unwrap();
    let tree = open_tree(&tmp);
    tree.put(b"k", b"old").unwrap();

    let mut batch = tree.batch_with(BatchOptions {
        dedup_keys: true,
        ..BatchOptions::default()
    });
    batch.put(b"k", b"temp");
    batch.delete(b"k");
    batch.commit().unwrap();

    assert!(tree.get(b"k").unwrap().is_none());
}

#[test]
fn sorted_batch_commits_in_key_order() {
    let tmp = TempDir::new().unwrap();
    let tree = open_tree(&tmp);

    let mut batch = tree.batch_with(BatchOptions {
        sort_keys: true,
        ..BatchOptions::default()
    });
    batch.put(b"zulu", b"3");
    batch.put(b"alpha", b"1");
    batch.put(b"mike", b"2");
    let report = batch.commit().unwrap();
    assert_eq!(report.committed, 3);

    for (key, value) in [(&b"alpha"[..], &b"1"[..]), (b"mike", b"2"), (b"zulu", b"3")] {
        assert_eq!(&tree.get(key).unwrap().unwrap()[..], value);
    }
}

#[test]
fn batched_writes_survive_recovery() {
    let tmp = TempDir::new().unwrap();
    {
        let tree = open_tree(&tmp);
        let mut batch = tree.batch();
        batch.put(b"a", b"1").put(b"b", b"2").delete(b"a");
        batch.commit().unwrap();
        // Crash: no close.
    }

    let tree = open_tree(&tmp);
    assert!(tree.get(b"a").unwrap().is_none());
    assert_eq!(&tree.get(b"b").unwrap().unwrap()[..], b"2");
}

#[test]
fn report_measures_elapsed_time() {
    let tmp = TempDir::new().unwrap();
    let tree = open_tree(&tmp);

    let mut batch = tree.batch();
    for i in 0..100u32 {
        batch.put(format!("key-{i}").as_bytes(), b"v");
    }
    let report = batch.commit().unwrap();
    assert_eq!(report.committed, 100);
    assert!(report.elapsed_us > 0);
}

#[test]
fn rollback_restores_prior_versions() {
    // Exercise the journal directly: revert must restore overwritten
    // versions and remove fresh inserts.
    let manager = crate::memtable::MemtableManager::new(1 << 20, 4, false);
    manager.put(b"a", b"original", 1).unwrap();
    let active = manager.active();

    // Simulate a partially applied batch.
    let prior_a = active.get(b"a");
    let prior_b = active.get(b"b");
    active.put(b"a", b"dirty", 5).unwrap();
    active.put(b"b", b"new", 6).unwrap();

    // Unwind in reverse order.
    active.revert(b"b", prior_b);
    active.revert(b"a", prior_a);

    let a = active.get(b"a").unwrap();
    assert_eq!(&a.value[..], b"original");
    assert_eq!(a.seq, 1);
    assert!(active.get(b"b").is_none());
    assert_eq!(active.entry_count(), 1);
}
