use tempfile::TempDir;

use crate::config::DbConfig;
use crate::engine::{EngineKind, EngineManager, EngineOp, StorageEngine};
use crate::error::{ErrorKind, KindError};

fn manager(tmp: &TempDir) -> EngineManager {
    let config = DbConfig {
        data_dir: tmp.path().to_path_buf(),
        default_engine: EngineKind::Ordered,
        ..DbConfig::default()
    };
    EngineManager::open(&config).unwrap()
}

#[test]
fn routes_to_the_default_engine() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);

    assert_eq!(manager.active_kind(), EngineKind::Ordered);
    manager.put(b"k", b"v").unwrap();
    assert_eq!(&manager.get(b"k").unwrap().unwrap()[..], b"v");
    assert_eq!(manager.count().unwrap(), 1);
}

#[test]
fn switching_does_not_move_data_between_engines() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);

    manager.put(b"k", b"ordered-value").unwrap();
    manager.switch_engine(EngineKind::Hash);
    assert_eq!(manager.active_kind(), EngineKind::Hash);

    // Each engine owns its own keyspace (and sequence space).
    assert!(manager.get(b"k").unwrap().is_none());
    manager.put(b"k", b"hash-value").unwrap();

    manager.switch_engine(EngineKind::Ordered);
    assert_eq!(&manager.get(b"k").unwrap().unwrap()[..], b"ordered-value");
}

#[test]
fn lsm_engine_is_durable_through_the_manager() {
    let tmp = TempDir::new().unwrap();
    {
        let manager = manager(&tmp);
        manager.switch_engine(EngineKind::Lsm);
        manager.put(b"durable", b"yes").unwrap();
        manager.close().unwrap();
    }
    {
        let manager = manager(&tmp);
        manager.switch_engine(EngineKind::Lsm);
        assert_eq!(&manager.get(b"durable").unwrap().unwrap()[..], b"yes");
        manager.close().unwrap();
    }
}

#[test]
fn lsm_optional_ops_are_supported_through_dispatch() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);
    let lsm = manager.engine(EngineKind::Lsm);

    assert!(lsm.supports(EngineOp::Flush));
    assert!(lsm.supports(EngineOp::Sync));
    assert!(lsm.supports(EngineOp::Compact));
    assert!(!lsm.supports(EngineOp::RangeScan));

    lsm.put(b"k", b"v").unwrap();
    lsm.flush().unwrap();
    lsm.sync().unwrap();
    assert_eq!(
        lsm.range_scan(b"a", b"z").unwrap_err().kind(),
        ErrorKind::NotSupported
    );
    manager.close().unwrap();
}

#[test]
fn routed_operations_feed_the_metrics_registry() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);

    manager.put(b"k", b"v").unwrap();
    manager.get(b"k").unwrap();
    manager.get(b"k").unwrap();
    manager.delete(b"k").unwrap();
    let _ = manager.delete(b"k"); // NotFound, counted as such

    let metrics = manager
        .metrics()
        .engine(EngineKind::Ordered)
        .unwrap();
    assert_eq!(metrics.writes(), 1);
    assert_eq!(metrics.reads(), 2);
    assert_eq!(metrics.deletes(), 2);
    assert_eq!(metrics.not_found(), 1);
    assert_eq!(metrics.errors(), 0);
    manager.close().unwrap();
}

#[test]
fn stats_report_covers_every_engine() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);
    manager.put(b"k", b"v").unwrap();

    let report = manager.stats_report();
    for kind in EngineKind::ALL {
        assert!(
            report.contains(&format!("engine=\"{kind}\"")),
            "report is missing {kind}"
        );
    }
    // Extras made it in.
    assert!(report.contains("concord_ordered_depth"));
    assert!(report.contains("concord_lsm_sstable_count"));
    manager.close().unwrap();
}

#[test]
fn update_routes_with_not_found_semantics() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);

    let err = manager.update(b"ghost", b"v").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    manager.put(b"real", b"1").unwrap();
    manager.update(b"real", b"2").unwrap();
    assert_eq!(&manager.get(b"real").unwrap().unwrap()[..], b"2");
    manager.close().unwrap();
}
