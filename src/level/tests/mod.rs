use std::sync::Arc;

use tempfile::TempDir;

use crate::config::LsmConfig;
use crate::level::{LevelManager, TableMeta, parse_table_file_name, table_file_name};
use crate::sstable::TableWriter;
use crate::types::Entry;

/// Writes a table holding `(key, value, seq)` triples and loads its
/// metadata at the given level.
fn make_table(
    tmp: &TempDir,
    level: usize,
    file_id: u64,
    rows: &[(&[u8], &[u8], u64)],
) -> Arc<TableMeta> {
    let path = tmp.path().join(table_file_name(level, file_id));
    let mut writer = TableWriter::create(&path, 4096, 0.01).unwrap();
    for (key, value, seq) in rows {
        writer
            .add(&Entry::put(key.to_vec(), value.to_vec(), *seq))
            .unwrap();
    }
    writer.finalize().unwrap();
    TableMeta::load(&path, level, file_id).unwrap()
}

fn small_config() -> LsmConfig {
    LsmConfig {
        level0_file_limit: 2,
        max_level_base_bytes: 1024,
        level_size_multiplier: 10,
        max_files_per_level: 4,
        ..LsmConfig::default()
    }
}

#[test]
fn file_names_round_trip() {
    let name = table_file_name(3, 42);
    assert_eq!(parse_table_file_name(&name), Some((3, 42)));
    assert_eq!(parse_table_file_name("MANIFEST"), None);
    assert_eq!(parse_table_file_name("level_x_1_0_0.sst"), None);
    assert_eq!(parse_table_file_name("wal-000001.log"), None);
}

#[test]
fn meta_captures_key_range_and_counts() {
    let tmp = TempDir::new().unwrap();
    let meta = make_table(&tmp, 0, 1, &[(b"aa", b"1", 1), (b"zz", b"2", 2)]);

    assert_eq!(&meta.min_key[..], b"aa");
    assert_eq!(&meta.max_key[..], b"zz");
    assert_eq!(meta.entry_count, 2);
    assert!(meta.file_size > 0);
    assert!(meta.covers(b"mm"));
    assert!(!meta.covers(b"a"));
    assert!(meta.overlaps(b"z", b"zzz"));
    assert!(!meta.overlaps(b"zzz", b"zzzz"));
}

#[test]
fn reader_cache_survives_eviction() {
    let tmp = TempDir::new().unwrap();
    let meta = make_table(&tmp, 0, 1, &[(b"k", b"v", 1)]);

    let first = meta.reader().unwrap();
    assert!(first.get(b"k").unwrap().is_some());

    meta.evict_reader();
    // Reopens lazily.
    let second = meta.reader().unwrap();
    assert!(second.get(b"k").unwrap().is_some());
    assert!(!Arc::ptr_eq(&first, &second));
}

#[test]
fn level0_lookup_is_newest_first() {
    let tmp = TempDir::new().unwrap();
    let manager = LevelManager::new(small_config());

    // Two overlapping L0 tables; file 2 is newer and must win.
    manager
        .add_table(make_table(&tmp, 0, 1, &[(b"k", b"old", 5)]))
        .unwrap();
    manager
        .add_table(make_table(&tmp, 0, 2, &[(b"k", b"new", 9)]))
        .unwrap();

    let version = manager.get(b"k").unwrap().unwrap();
    assert_eq!(&version.value[..], b"new");
    assert_eq!(version.seq, 9);
}

#[test]
fn upper_levels_use_key_range_search() {
    let tmp = TempDir::new().unwrap();
    let manager = LevelManager::new(small_config());

    manager
        .add_table(make_table(&tmp, 1, 1, &[(b"a", b"1", 1), (b"f", b"2", 2)]))
        .unwrap();
    manager
        .add_table(make_table(&tmp, 1, 2, &[(b"g", b"3", 3), (b"p", b"4", 4)]))
        .unwrap();
    manager
        .add_table(make_table(&tmp, 1, 3, &[(b"q", b"5", 5), (b"z", b"6", 6)]))
        .unwrap();

    assert_eq!(&manager.get(b"g").unwrap().unwrap().value[..], b"3");
    assert_eq!(&manager.get(b"z").unwrap().unwrap().value[..], b"6");
    // Inside a gap between tables: no hit, no error.
    assert!(manager.get(b"fz").unwrap().is_none());
    assert!(manager.get(b"0").unwrap().is_none());
}

#[test]
fn level0_is_searched_before_deeper_levels() {
    let tmp = TempDir::new().unwrap();
    let manager = LevelManager::new(small_config());

    manager
        .add_table(make_table(&tmp, 1, 1, &[(b"k", b"deep", 1)]))
        .unwrap();
    manager
        .add_table(make_table(&tmp, 0, 2, &[(b"k", b"shallow", 8)]))
        .unwrap();

    assert_eq!(&manager.get(b"k").unwrap().unwrap().value[..], b"shallow");
}

#[test]
fn remove_table_is_identity_based() {
    let tmp = TempDir::new().unwrap();
    let manager = LevelManager::new(small_config());
    let meta = make_table(&tmp, 0, 1, &[(b"k", b"v", 1)]);

    manager.add_table(Arc::clone(&meta)).unwrap();
    assert!(manager.remove_table(&meta));
    assert!(!manager.remove_table(&meta));
    assert_eq!(manager.file_count(0), 0);
}

#[test]
fn needs_compaction_level0_by_file_count() {
    let tmp = TempDir::new().unwrap();
    let manager = LevelManager::new(small_config());

    manager
        .add_table(make_table(&tmp, 0, 1, &[(b"a", b"1", 1)]))
        .unwrap();
    assert!(!manager.needs_compaction(0));
    manager
        .add_table(make_table(&tmp, 0, 2, &[(b"b", b"2", 2)]))
        .unwrap();
    assert!(manager.needs_compaction(0));
}

#[test]
fn needs_compaction_level_n_by_bytes() {
    let tmp = TempDir::new().unwrap();
    let config = LsmConfig {
        max_level_base_bytes: 1, // any table overflows level 1
        ..small_config()
    };
    let manager = LevelManager::new(config);

    assert!(!manager.needs_compaction(1));
    manager
        .add_table(make_table(&tmp, 1, 1, &[(b"a", b"1", 1)]))
        .unwrap();
    assert!(manager.needs_compaction(1));
    // Level 2's budget is 10x; one small table stays under it.
    manager
        .add_table(make_table(&tmp, 2, 2, &[(b"b", b"2", 2)]))
        .unwrap();
    assert!(!manager.needs_compaction(2));
}

#[test]
fn full_level_rejects_additional_tables() {
    let tmp = TempDir::new().unwrap();
    let config = LsmConfig {
        max_files_per_level: 1,
        ..small_config()
    };
    let manager = LevelManager::new(config);

    manager
        .add_table(make_table(&tmp, 0, 1, &[(b"a", b"1", 1)]))
        .unwrap();
    let err = manager
        .add_table(make_table(&tmp, 0, 2, &[(b"b", b"2", 2)]))
        .unwrap_err();
    assert!(matches!(err, crate::level::LevelError::LevelFull(0)));
}

#[test]
fn install_compaction_swaps_atomically() {
    let tmp = TempDir::new().unwrap();
    let manager = LevelManager::new(small_config());

    let input_a = make_table(&tmp, 0, 1, &[(b"a", b"1", 1)]);
    let input_b = make_table(&tmp, 0, 2, &[(b"b", b"2", 2)]);
    manager.add_table(Arc::clone(&input_a)).unwrap();
    manager.add_table(Arc::clone(&input_b)).unwrap();

    let output = make_table(&tmp, 1, 3, &[(b"a", b"1", 1), (b"b", b"2", 2)]);
    manager
        .install_compaction(&[input_a, input_b], &[output])
        .unwrap();

    assert_eq!(manager.file_count(0), 0);
    assert_eq!(manager.file_count(1), 1);
    assert_eq!(&manager.get(b"a").unwrap().unwrap().value[..], b"1");
}

#[test]
fn overlapping_selects_by_range() {
    let tmp = TempDir::new().unwrap();
    let manager = LevelManager::new(small_config());

    let left = make_table(&tmp, 1, 1, &[(b"a", b"1", 1), (b"f", b"2", 2)]);
    let right = make_table(&tmp, 1, 2, &[(b"m", b"3", 3), (b"z", b"4", 4)]);
    manager.add_table(Arc::clone(&left)).unwrap();
    manager.add_table(Arc::clone(&right)).unwrap();

    let hits = manager.overlapping(1, b"e", b"n");
    assert_eq!(hits.len(), 2);
    let hits = manager.overlapping(1, b"g", b"l");
    assert!(hits.is_empty());
    let hits = manager.overlapping(1, b"n", b"o");
    assert_eq!(hits.len(), 1);
    assert!(Arc::ptr_eq(&hits[0], &right));
}

#[test]
fn stats_and_counts_aggregate() {
    let tmp = TempDir::new().unwrap();
    let manager = LevelManager::new(small_config());
    manager
        .add_table(make_table(&tmp, 0, 1, &[(b"a", b"1", 1)]))
        .unwrap();
    manager
        .add_table(make_table(&tmp, 2, 5, &[(b"b", b"2", 2)]))
        .unwrap();

    assert_eq!(manager.total_file_count(), 2);
    assert_eq!(manager.max_file_id(), 5);
    assert_eq!(manager.deepest_populated_level(), 2);
    let counts = manager.file_counts();
    assert_eq!(counts[0], 1);
    assert_eq!(counts[2], 1);
    assert!(manager.level_size(2) > 0);
}
