use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ErrorKind, KindError};
use crate::sync::{DeadlockDetector, SegmentedLock, SpinLock, SyncError, TimedRwLock};

#[test]
fn timed_rwlock_grants_uncontended_access() {
    let lock = TimedRwLock::new("test", 41);
    {
        let mut guard = lock.write_for(Duration::from_millis(50)).unwrap();
        *guard += 1;
    }
    let guard = lock.read_for(Duration::from_millis(50)).unwrap();
    assert_eq!(*guard, 42);
}

#[test]
fn timed_rwlock_write_times_out_under_reader() {
    let lock = Arc::new(TimedRwLock::new("held", 0u32));
    let guard = lock.read();

    let err = lock.write_for(Duration::from_millis(20)).unwrap_err();
    assert!(matches!(err, SyncError::Timeout { lock: "held", .. }));
    assert_eq!(err.kind(), ErrorKind::Timeout);
    drop(guard);

    // Once released, the write goes through.
    assert!(lock.write_for(Duration::from_millis(20)).is_ok());
}

#[test]
fn timed_waits_register_with_an_attached_detector() {
    let detector = Arc::new(DeadlockDetector::new());
    let lock = Arc::new(TimedRwLock::with_detector(
        "tree",
        (),
        Arc::clone(&detector),
    ));

    // A blocked timed writer must be visible to a sweep while it
    // waits, and gone once the wait ends.
    let reader = lock.read();
    let waiter = {
        let lock = Arc::clone(&lock);
        std::thread::spawn(move || lock.write_for(Duration::from_millis(300)).is_ok())
    };
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(detector.waiter_count(), 1);
    assert!(detector.sweep().is_empty(), "not overdue yet");

    drop(reader);
    assert!(waiter.join().unwrap(), "writer must acquire after release");
    assert_eq!(detector.waiter_count(), 0);
}

#[test]
fn timed_out_wait_leaves_no_waiter_behind() {
    let detector = Arc::new(DeadlockDetector::new());
    let lock = TimedRwLock::with_detector("stuck", (), Arc::clone(&detector));

    let guard = lock.write();
    let err = lock.read_for(Duration::from_millis(10)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(detector.waiter_count(), 0);
    drop(guard);
}

#[test]
fn spinlock_counts_across_threads() {
    let lock = Arc::new(SpinLock::new(0u64));
    let mut handles = Vec::new();
    for _ in 0..4 {
        let lock = Arc::clone(&lock);
        handles.push(std::thread::spawn(move || {
            for _ in 0..1000 {
                *lock.lock() += 1;
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(*lock.lock(), 4000);
}

#[test]
fn spinlock_try_lock_fails_while_held() {
    let lock = SpinLock::new(());
    let guard = lock.lock();
    assert!(lock.try_lock().is_none());
    drop(guard);
    assert!(lock.try_lock().is_some());
}

#[test]
fn segmented_lock_is_stable_per_key() {
    let bank: SegmentedLock<()> = SegmentedLock::new(16, || ());
    assert_eq!(bank.stripe_of(b"alpha"), bank.stripe_of(b"alpha"));
    assert!(bank.stripe_of(b"alpha") < bank.stripe_count());
}

#[test]
fn segmented_stripe_count_rounds_to_power_of_two() {
    assert_eq!(SegmentedLock::new(10, || ()).stripe_count(), 16);
    assert_eq!(SegmentedLock::new(0, || ()).stripe_count(), 1);
    assert_eq!(SegmentedLock::new(8, || ()).stripe_count(), 8);
}

#[test]
fn shards_hold_independent_data() {
    let bank: SegmentedLock<HashMap<Vec<u8>, u32>> = SegmentedLock::new(4, HashMap::new);

    for i in 0..32u32 {
        let key = format!("key-{i}").into_bytes();
        bank.write_key(&key).insert(key.clone(), i);
    }
    for i in 0..32u32 {
        let key = format!("key-{i}").into_bytes();
        assert_eq!(bank.read_key(&key).get(&key), Some(&i));
    }

    // Whole-bank view sees every shard's contents.
    let total: usize = bank.read_all().iter().map(|shard| shard.len()).sum();
    assert_eq!(total, 32);
}

#[test]
fn segmented_multi_key_dedups_same_stripe() {
    let bank: SegmentedLock<()> = SegmentedLock::new(4, || ());
    // Same key twice must not self-deadlock: the stripe set is
    // deduplicated before acquisition.
    let guards = bank.write_keys(&[b"k1", b"k1"]);
    assert_eq!(guards.len(), 1);
}

#[test]
fn segmented_multi_key_orders_stripes() {
    let bank: SegmentedLock<()> = SegmentedLock::new(8, || ());
    let keys: Vec<Vec<u8>> = (0u8..32).map(|i| vec![i]).collect();
    let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
    let guards = bank.write_keys(&refs);
    assert!(guards.len() <= bank.stripe_count());
    // All stripes locked: a timed single-key write must fail.
    let err = bank.write_key_for(b"anything", Duration::from_millis(10));
    if guards.len() == bank.stripe_count() {
        assert!(err.is_err());
    }
}

#[test]
fn segmented_timed_write_times_out_on_held_stripe() {
    let bank: SegmentedLock<()> = SegmentedLock::new(1, || ());
    let guard = bank.write_key(b"a");
    let err = bank
        .write_key_for(b"b", Duration::from_millis(10))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    drop(guard);
}

#[test]
fn segmented_write_all_locks_every_shard() {
    let bank: SegmentedLock<u32> = SegmentedLock::new(4, || 0);
    let guards = bank.write_all();
    assert_eq!(guards.len(), bank.stripe_count());
    assert!(bank.write_key_for(b"k", Duration::from_millis(10)).is_err());
}

#[test]
fn detector_reports_overdue_waiters_only() {
    let detector = DeadlockDetector::new();
    let _patient = detector.watch("tree", Duration::from_secs(60));
    let overdue = detector.watch("wal", Duration::from_millis(0));
    std::thread::sleep(Duration::from_millis(5));

    let stalled = detector.sweep();
    assert_eq!(stalled.len(), 1);
    assert_eq!(stalled[0].lock, "wal");
    drop(overdue);
    assert!(detector.sweep().is_empty());
}

#[test]
fn detector_deregisters_on_drop() {
    let detector = DeadlockDetector::new();
    {
        let _guard = detector.watch("levels", Duration::from_millis(1));
        assert_eq!(detector.waiter_count(), 1);
    }
    assert_eq!(detector.waiter_count(), 0);
}
