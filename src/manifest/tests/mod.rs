use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};

use tempfile::TempDir;

use crate::config::MAX_LEVELS;
use crate::manifest::{MANIFEST_FILE, MANIFEST_SIZE, Manifest, ManifestError};

#[test]
fn fresh_directory_starts_at_defaults() {
    let tmp = TempDir::new().unwrap();
    let manifest = Manifest::open(tmp.path()).unwrap();

    assert_eq!(manifest.version(), 0);
    assert_eq!(manifest.next_file_id(), 1);
    assert_eq!(manifest.active_memtable(), 0);
    assert_eq!(manifest.file_counts(), [0; MAX_LEVELS]);
}

#[test]
fn save_then_load_round_trips() {
    let tmp = TempDir::new().unwrap();
    {
        let manifest = Manifest::open(tmp.path()).unwrap();
        assert_eq!(manifest.allocate_file_id(), 1);
        assert_eq!(manifest.allocate_file_id(), 2);
        manifest.set_active_memtable(7);
        let mut counts = [0u32; MAX_LEVELS];
        counts[0] = 3;
        counts[2] = 1;
        manifest.set_file_counts(counts);
        manifest.save().unwrap();
    }

    let manifest = Manifest::open(tmp.path()).unwrap();
    assert_eq!(manifest.version(), 1);
    assert_eq!(manifest.next_file_id(), 3);
    assert_eq!(manifest.active_memtable(), 7);
    let counts = manifest.file_counts();
    assert_eq!(counts[0], 3);
    assert_eq!(counts[2], 1);
    assert_eq!(counts[1], 0);
}

#[test]
fn version_bumps_on_every_save() {
    let tmp = TempDir::new().unwrap();
    let manifest = Manifest::open(tmp.path()).unwrap();
    manifest.save().unwrap();
    manifest.save().unwrap();
    manifest.save().unwrap();
    assert_eq!(manifest.version(), 3);

    let reloaded = Manifest::open(tmp.path()).unwrap();
    assert_eq!(reloaded.version(), 3);
}

#[test]
fn snapshot_file_has_fixed_size() {
    let tmp = TempDir::new().unwrap();
    let manifest = Manifest::open(tmp.path()).unwrap();
    manifest.save().unwrap();

    let len = std::fs::metadata(tmp.path().join(MANIFEST_FILE)).unwrap().len();
    assert_eq!(len as usize, MANIFEST_SIZE);
}

#[test]
fn no_temp_file_survives_a_save() {
    let tmp = TempDir::new().unwrap();
    let manifest = Manifest::open(tmp.path()).unwrap();
    manifest.save().unwrap();

    let names: Vec<String> = std::fs::read_dir(tmp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec![MANIFEST_FILE.to_string()]);
}

#[test]
fn corrupted_snapshot_is_rejected() {
    let tmp = TempDir::new().unwrap();
    {
        let manifest = Manifest::open(tmp.path()).unwrap();
        manifest.save().unwrap();
    }

    // Flip a byte in the middle; the trailing CRC goes stale.
    let path = tmp.path().join(MANIFEST_FILE);
    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(10)).unwrap();
    file.write_all(&[0xFF]).unwrap();

    assert!(matches!(
        Manifest::open(tmp.path()),
        Err(ManifestError::Corrupted(_))
    ));
}

#[test]
fn truncated_snapshot_is_rejected() {
    let tmp = TempDir::new().unwrap();
    {
        let manifest = Manifest::open(tmp.path()).unwrap();
        manifest.save().unwrap();
    }
    let path = tmp.path().join(MANIFEST_FILE);
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(MANIFEST_SIZE as u64 / 2).unwrap();

    assert!(Manifest::open(tmp.path()).is_err());
}

#[test]
fn ensure_next_file_id_only_raises() {
    let tmp = TempDir::new().unwrap();
    let manifest = Manifest::open(tmp.path()).unwrap();

    manifest.ensure_next_file_id(10);
    assert_eq!(manifest.next_file_id(), 10);
    manifest.ensure_next_file_id(5);
    assert_eq!(manifest.next_file_id(), 10);
    assert_eq!(manifest.allocate_file_id(), 10);
    assert_eq!(manifest.next_file_id(), 11);
}
