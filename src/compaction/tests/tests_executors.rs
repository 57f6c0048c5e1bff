use std::time::Duration;

use crate::compaction::tests::{Fixture, small_config, start_scheduler, wait_until};
use crate::config::LsmConfig;
use crate::level::parse_table_file_name;

#[test]
fn flush_produces_exactly_one_level0_table() {
    let fixture = Fixture::new(small_config());
    fixture.memtables.put(b"alpha", b"1", 1).unwrap();
    fixture.memtables.put(b"beta", b"2", 2).unwrap();
    fixture.memtables.rotate();

    let scheduler = start_scheduler(&fixture);
    scheduler.trigger_check();
    assert!(wait_until(Duration::from_secs(5), || {
        fixture.levels.file_count(0) == 1 && fixture.memtables.immutable_count() == 0
    }));

    // On-disk file carries the level and id in its name.
    let tables = fixture.levels.tables(0);
    assert_eq!(tables.len(), 1);
    let parsed = parse_table_file_name(&tables[0].file_name).unwrap();
    assert_eq!(parsed.0, 0);

    // Data is readable through the hierarchy, tombstones included.
    let version = fixture.levels.get(b"alpha").unwrap().unwrap();
    assert_eq!(&version.value[..], b"1");
    scheduler.shutdown();
}

#[test]
fn empty_memtable_flush_produces_no_table() {
    let fixture = Fixture::new(small_config());
    fixture.memtables.rotate(); // freeze an empty table

    let scheduler = start_scheduler(&fixture);
    scheduler.trigger_check();
    assert!(wait_until(Duration::from_secs(5), || {
        fixture.memtables.immutable_count() == 0
    }));
    assert_eq!(fixture.levels.file_count(0), 0);

    let stats = scheduler.stats();
    assert_eq!(stats.failed, 0);
    assert!(stats.completed >= 1);
    scheduler.shutdown();
}

#[test]
fn flush_checkpoints_and_prunes_wal() {
    let fixture = Fixture::new(small_config());
    // Simulate the write path: WAL first, then memtable.
    for i in 0..5u64 {
        let key = format!("key-{i}");
        fixture
            .wal
            .append(&crate::wal::WalRecord::put(i + 1, key.as_bytes(), b"v"))
            .unwrap();
        fixture.memtables.put(key.as_bytes(), b"v", i + 1).unwrap();
    }
    fixture.wal.rotate().unwrap();
    fixture.memtables.rotate();

    let scheduler = start_scheduler(&fixture);
    scheduler.trigger_check();
    assert!(wait_until(Duration::from_secs(5), || {
        fixture.memtables.immutable_count() == 0
    }));
    scheduler.shutdown();

    // The checkpoint landed after the flush; the pre-rotation segment
    // is gone and replay yields nothing older than the checkpoint.
    let segments = fixture.wal.segments().unwrap();
    assert_eq!(segments, vec![1]);
}

#[test]
fn leveln_merge_keeps_newest_version_per_key() {
    let fixture = Fixture::new(small_config());
    // Older data at level 1, newer overlapping data at level 0.
    fixture.plant_table(1, &[(b"a", b"old-a", 1, false), (b"m", b"old-m", 2, false)]);
    fixture.plant_table(0, &[(b"a", b"new-a", 9, false), (b"z", b"new-z", 10, false)]);

    let scheduler = start_scheduler(&fixture);
    scheduler.schedule_manual(0);
    assert!(wait_until(Duration::from_secs(5), || {
        fixture.levels.file_count(0) == 0
    }));
    scheduler.shutdown();

    // Everything merged into level 1.
    assert_eq!(fixture.levels.file_count(1), 1);
    assert_eq!(&fixture.levels.get(b"a").unwrap().unwrap().value[..], b"new-a");
    assert_eq!(&fixture.levels.get(b"m").unwrap().unwrap().value[..], b"old-m");
    assert_eq!(&fixture.levels.get(b"z").unwrap().unwrap().value[..], b"new-z");
}

#[test]
fn leveln_merge_unlinks_inputs() {
    let fixture = Fixture::new(small_config());
    let lower = fixture.plant_table(1, &[(b"a", b"1", 1, false)]);
    let upper = fixture.plant_table(0, &[(b"a", b"2", 5, false)]);

    let scheduler = start_scheduler(&fixture);
    scheduler.schedule_manual(0);
    assert!(wait_until(Duration::from_secs(5), || {
        fixture.levels.file_count(0) == 0 && fixture.levels.file_count(1) == 1
    }));
    scheduler.shutdown();

    assert!(!lower.path().exists());
    assert!(!upper.path().exists());
    // The output is a different file.
    let survivor = &fixture.levels.tables(1)[0];
    assert!(survivor.path().exists());
}

#[test]
fn tombstones_purged_only_at_deepest_level() {
    let fixture = Fixture::new(small_config());
    // A tombstone shadowing a live value; nothing deeper than level 1.
    fixture.plant_table(1, &[(b"k", b"live", 1, false)]);
    fixture.plant_table(0, &[(b"k", b"", 5, true)]);

    let scheduler = start_scheduler(&fixture);
    scheduler.schedule_manual(0);
    assert!(wait_until(Duration::from_secs(5), || {
        fixture.levels.file_count(0) == 0
    }));
    scheduler.shutdown();

    // Key fully gone: the tombstone consumed the value and then
    // itself (no deeper occurrence can exist).
    assert!(fixture.levels.get(b"k").unwrap().is_none());
    assert_eq!(fixture.levels.file_count(1), 0);
}

#[test]
fn tombstones_survive_when_deeper_data_may_exist() {
    let fixture = Fixture::new(small_config());
    // Older value buried at level 2.
    fixture.plant_table(2, &[(b"k", b"buried", 1, false)]);
    fixture.plant_table(1, &[(b"k", b"mid", 3, false)]);
    fixture.plant_table(0, &[(b"k", b"", 5, true)]);

    let scheduler = start_scheduler(&fixture);
    scheduler.schedule_manual(0);
    assert!(wait_until(Duration::from_secs(5), || {
        fixture.levels.file_count(0) == 0
    }));
    scheduler.shutdown();

    // The tombstone must still shadow the buried value.
    let version = fixture.levels.get(b"k").unwrap().unwrap();
    assert!(version.deleted, "tombstone must survive the merge");
    assert_eq!(version.seq, 5);
}

#[test]
fn major_compaction_pushes_everything_to_one_level() {
    let fixture = Fixture::new(small_config());
    fixture.plant_table(0, &[(b"a", b"1", 1, false)]);
    fixture.plant_table(0, &[(b"b", b"2", 2, false)]);
    fixture.plant_table(1, &[(b"c", b"3", 3, false)]);

    let scheduler = start_scheduler(&fixture);
    scheduler.schedule_major();
    assert!(wait_until(Duration::from_secs(10), || {
        (0..crate::config::MAX_LEVELS - 1).all(|l| fixture.levels.file_count(l) == 0)
    }));
    scheduler.shutdown();

    for key in [&b"a"[..], b"b", b"c"] {
        assert!(fixture.levels.get(key).unwrap().is_some(), "lost {key:?}");
    }
}

#[test]
fn output_tables_split_at_the_configured_bound() {
    let config = LsmConfig {
        block_size: 256,
        blocks_per_output: 2, // split outputs every ~512 bytes
        ..small_config()
    };
    let fixture = Fixture::new(config);

    let rows: Vec<(Vec<u8>, Vec<u8>)> = (0..50u32)
        .map(|i| (format!("key-{i:04}").into_bytes(), vec![b'v'; 40]))
        .collect();
    let planted: Vec<(&[u8], &[u8], u64, bool)> = rows
        .iter()
        .enumerate()
        .map(|(i, (k, v))| (k.as_slice(), v.as_slice(), i as u64 + 1, false))
        .collect();
    fixture.plant_table(0, &planted);

    let scheduler = start_scheduler(&fixture);
    scheduler.schedule_manual(0);
    assert!(wait_until(Duration::from_secs(5), || {
        fixture.levels.file_count(0) == 0
    }));
    scheduler.shutdown();

    assert!(
        fixture.levels.file_count(1) > 1,
        "a large merge must split into multiple outputs"
    );
    // Outputs are disjoint and ordered; every key still resolves.
    for (k, _) in &rows {
        assert!(fixture.levels.get(k).unwrap().is_some());
    }
}
