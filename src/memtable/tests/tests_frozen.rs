use crate::error::{ErrorKind, KindError};
use crate::memtable::{Memtable, MemtableError, MemtableState};

#[test]
fn freeze_is_one_way() {
    let table = Memtable::new(1, 0);
    table.put(b"k", b"v", 1).unwrap();

    table.freeze();
    assert_eq!(table.state(), MemtableState::Frozen);

    // Freezing again is a no-op, never a revert.
    table.freeze();
    assert_eq!(table.state(), MemtableState::Frozen);
}

#[test]
fn frozen_table_rejects_writes_as_busy() {
    let table = Memtable::new(1, 0);
    table.put(b"k", b"v", 1).unwrap();
    table.freeze();

    let err = table.put(b"k2", b"v2", 2).unwrap_err();
    assert!(matches!(err, MemtableError::NotActive(MemtableState::Frozen)));
    assert_eq!(err.kind(), ErrorKind::Busy);

    let err = table.delete(b"k", 3).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Busy);
}

#[test]
fn frozen_table_still_serves_reads_and_iteration() {
    let table = Memtable::new(1, 0);
    table.put(b"a", b"1", 1).unwrap();
    table.delete(b"b", 2).unwrap();
    table.freeze();

    let version = table.get(b"a").unwrap();
    assert_eq!(&version.value[..], b"1");
    assert_eq!(table.iter(true).count(), 2);
}

#[test]
fn flush_state_progression() {
    let table = Memtable::new(1, 0);
    table.freeze();
    table.mark_flushing();
    assert_eq!(table.state(), MemtableState::Flushing);
    table.mark_flushed();
    assert_eq!(table.state(), MemtableState::Flushed);
}

#[test]
fn mark_flushing_requires_frozen() {
    let table = Memtable::new(1, 0);
    // Still active: flushing must not engage.
    table.mark_flushing();
    assert_eq!(table.state(), MemtableState::Active);
}

#[test]
fn failed_write_leaves_table_consistent() {
    let table = Memtable::new(1, 0);
    table.put(b"k", b"v", 1).unwrap();
    let bytes_before = table.approximate_bytes();

    assert!(table.put(b"", b"junk", 2).is_err());

    assert_eq!(table.entry_count(), 1);
    assert_eq!(table.approximate_bytes(), bytes_before);
    assert_eq!(&table.get(b"k").unwrap().value[..], b"v");
}
