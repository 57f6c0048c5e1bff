
use std::path::PathBuf;

use tempfile::TempDir;

use crate::sstable::{TableReader, TableWriter};
use crate::types::Entry;

/// Builds a table at `name` from the given entries (must be sorted).
pub(crate) fn build_table(tmp: &TempDir, name: &str, entries: &[Entry]) -> PathBuf {
    build_table_sized(tmp, name, entries, 4096)
}

pub(crate) fn build_table_sized(
    tmp: &TempDir,
    name: &str,
    entries: &[Entry],
    block_size: usize,
) -> PathBuf {
    let path = tmp.path().join(name);
    let mut writer = TableWriter::create(&path, block_size, 0.01).unwrap();
    for entry in entries {
        writer.add(entry).unwrap();
    }
    writer.finalize().unwrap()
}

pub(crate) fn open_table(path: &PathBuf) -> TableReader {
    TableReader::open(path).unwrap()
}
