use crate::engine::tests::memory_backends;
use crate::engine::{EngineKind, EngineOp, StorageEngine};
use crate::error::{ErrorKind, KindError};

#[test]
fn put_get_delete_update_on_every_backend() {
    for engine in memory_backends() {
        let kind = engine.kind();

        engine.put(b"k", b"v1").unwrap();
        assert_eq!(&engine.get(b"k").unwrap().unwrap()[..], b"v1", "{kind}");

        engine.put(b"k", b"v2").unwrap();
        assert_eq!(&engine.get(b"k").unwrap().unwrap()[..], b"v2", "{kind}");

        engine.update(b"k", b"v3").unwrap();
        assert_eq!(&engine.get(b"k").unwrap().unwrap()[..], b"v3", "{kind}");

        engine.delete(b"k").unwrap();
        assert!(engine.get(b"k").unwrap().is_none(), "{kind}");
    }
}

#[test]
fn update_missing_key_is_not_found() {
    for engine in memory_backends() {
        let err = engine.update(b"ghost", b"v").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound, "{}", engine.kind());
    }
}

#[test]
fn delete_missing_key_is_not_found() {
    for engine in memory_backends() {
        let err = engine.delete(b"ghost").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound, "{}", engine.kind());
    }
}

#[test]
fn empty_key_rejected_everywhere() {
    for engine in memory_backends() {
        let err = engine.put(b"", b"v").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParam, "{}", engine.kind());
    }
}

#[test]
fn count_and_memory_usage_track_contents() {
    for engine in memory_backends() {
        let kind = engine.kind();
        assert_eq!(engine.count().unwrap(), 0, "{kind}");

        for i in 0..10u32 {
            engine.put(format!("k{i}").as_bytes(), b"value").unwrap();
        }
        assert_eq!(engine.count().unwrap(), 10, "{kind}");
        assert!(engine.memory_usage().unwrap() > 0, "{kind}");

        engine.delete(b"k0").unwrap();
        assert_eq!(engine.count().unwrap(), 9, "{kind}");
    }
}

#[test]
fn unsupported_operations_surface_not_supported() {
    for engine in memory_backends() {
        let kind = engine.kind();
        // No in-memory backend implements transactions or durability
        // hooks.
        assert!(!engine.supports(EngineOp::Transactions), "{kind}");
        assert_eq!(
            engine.begin_transaction().unwrap_err().kind(),
            ErrorKind::NotSupported,
            "{kind}"
        );
        assert_eq!(
            engine.flush().unwrap_err().kind(),
            ErrorKind::NotSupported,
            "{kind}"
        );
        assert_eq!(
            engine.sync().unwrap_err().kind(),
            ErrorKind::NotSupported,
            "{kind}"
        );
    }
}

#[test]
fn feature_detection_matches_behavior() {
    for engine in memory_backends() {
        let kind = engine.kind();
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();

        if engine.supports(EngineOp::RangeScan) {
            let hits = engine.range_scan(b"a", b"c").unwrap();
            assert_eq!(hits.len(), 2, "{kind}");
            // Results arrive key-ordered.
            assert!(hits.windows(2).all(|w| w[0].0 < w[1].0), "{kind}");
        } else {
            assert_eq!(
                engine.range_scan(b"a", b"c").unwrap_err().kind(),
                ErrorKind::NotSupported,
                "{kind}"
            );
        }

        if engine.supports(EngineOp::Snapshot) {
            assert_eq!(engine.snapshot().unwrap().len(), 2, "{kind}");
        }
    }
}

#[test]
fn batch_set_inserts_all_pairs() {
    for engine in memory_backends() {
        assert!(engine.supports(EngineOp::BatchSet));
        engine
            .batch_set(&[(b"a".as_ref(), b"1".as_ref()), (b"b", b"2"), (b"c", b"3")])
            .unwrap();
        assert_eq!(engine.count().unwrap(), 3, "{}", engine.kind());
    }
}

#[test]
fn engine_kind_names_round_trip() {
    for kind in EngineKind::ALL {
        assert_eq!(EngineKind::parse(kind.as_str()), Some(kind));
    }
    assert_eq!(EngineKind::parse("rbtree"), Some(EngineKind::Ordered));
    assert_eq!(EngineKind::parse("B+Tree"), Some(EngineKind::BPlusTree));
    assert_eq!(EngineKind::parse("bogus"), None);
}

#[test]
fn hash_engine_reports_rehashes_under_growth() {
    let engine = crate::engine::HashEngine::new();
    for i in 0..200u32 {
        engine.put(format!("key-{i}").as_bytes(), b"v").unwrap();
    }
    let crate::metrics::EngineExtras::Hash {
        load_factor,
        rehashes,
        ..
    } = engine.extras()
    else {
        panic!("wrong extras variant");
    };
    assert!(rehashes >= 3, "200 inserts from 16 buckets must rehash");
    assert!(load_factor <= 0.75 + f64::EPSILON);
    assert_eq!(engine.count().unwrap(), 200);
    for i in (0..200u32).step_by(17) {
        assert!(engine.get(format!("key-{i}").as_bytes()).unwrap().is_some());
    }
}

#[test]
fn array_engine_reports_resizes() {
    let engine = crate::engine::ArrayEngine::new();
    for i in 0..100u32 {
        engine.put(format!("key-{i}").as_bytes(), b"v").unwrap();
    }
    let crate::metrics::EngineExtras::Array {
        resizes,
        capacity,
        utilization,
    } = engine.extras()
    else {
        panic!("wrong extras variant");
    };
    assert!(resizes > 0);
    assert!(capacity >= 100);
    assert!(utilization > 0.0 && utilization <= 1.0);
}
