mod tests_batch;

use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

use crate::config::LsmConfig;
use crate::lsm::LsmTree;

/// Installs a log subscriber honoring `RUST_LOG` (once per process).
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) fn test_config() -> LsmConfig {
    LsmConfig {
        memtable_max_size: 4096,
        max_immutable_count: 4,
        worker_count: 2,
        ..LsmConfig::default()
    }
}

pub(crate) fn open_tree(tmp: &TempDir) -> LsmTree {
    init_tracing();
    LsmTree::open(tmp.path(), test_config()).unwrap()
}
