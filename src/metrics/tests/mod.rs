use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::EngineKind;
use crate::error::{Error, ErrorKind, Result};
use crate::metrics::{EngineExtras, Histogram, MetricsRegistry};

fn ok<T>(value: T) -> Result<T> {
    Ok(value)
}

#[test]
fn histogram_buckets_by_edge() {
    let histogram = Histogram::new(&[1.0, 10.0, 100.0]);
    histogram.observe(Duration::from_micros(500)); // 0.5ms -> first
    histogram.observe(Duration::from_millis(5)); // second
    histogram.observe(Duration::from_millis(50)); // third
    histogram.observe(Duration::from_millis(500)); // +Inf

    assert_eq!(histogram.bucket_counts(), vec![1, 1, 1, 1]);
    assert_eq!(histogram.count(), 4);
    assert!(histogram.sum_micros() >= 555_000);
}

#[test]
fn histogram_edge_values_land_in_their_bucket() {
    let histogram = Histogram::new(&[1.0]);
    histogram.observe(Duration::from_millis(1)); // exactly the edge
    assert_eq!(histogram.bucket_counts(), vec![1, 0]);
}

#[test]
fn register_is_idempotent_and_deregister_removes() {
    let registry = MetricsRegistry::new();
    let first = registry.register(EngineKind::Hash);
    let second = registry.register(EngineKind::Hash);
    assert!(Arc::ptr_eq(&first, &second));

    assert!(registry.deregister(EngineKind::Hash));
    assert!(!registry.deregister(EngineKind::Hash));
    assert!(registry.engine(EngineKind::Hash).is_none());
}

#[test]
fn recorded_operations_show_up_in_counters() {
    let registry = MetricsRegistry::new();
    registry.register(EngineKind::Lsm);

    registry.record_read(EngineKind::Lsm, Duration::from_micros(100), &ok(()));
    registry.record_read(EngineKind::Lsm, Duration::from_micros(100), &ok(()));
    registry.record_write(EngineKind::Lsm, Duration::from_micros(200), &ok(()));
    registry.record_delete(EngineKind::Lsm, Duration::from_micros(50), &ok(()));

    let metrics = registry.engine(EngineKind::Lsm).unwrap();
    assert_eq!(metrics.reads(), 2);
    assert_eq!(metrics.writes(), 1);
    assert_eq!(metrics.deletes(), 1);
    assert_eq!(metrics.errors(), 0);
    assert_eq!(metrics.read_latency().count(), 2);
}

#[test]
fn not_found_is_counted_separately_from_errors() {
    let registry = MetricsRegistry::new();
    registry.register(EngineKind::Array);

    let not_found: Result<()> = Err(Error::op(ErrorKind::NotFound, "missing"));
    let timeout: Result<()> = Err(Error::op(ErrorKind::Timeout, "slow"));
    let io: Result<()> = Err(Error::op(ErrorKind::Io, "disk"));

    registry.record_read(EngineKind::Array, Duration::ZERO, &not_found);
    registry.record_read(EngineKind::Array, Duration::ZERO, &timeout);
    registry.record_read(EngineKind::Array, Duration::ZERO, &io);

    let metrics = registry.engine(EngineKind::Array).unwrap();
    assert_eq!(metrics.not_found(), 1);
    assert_eq!(metrics.errors(), 2);
}

#[test]
fn text_snapshot_carries_counters_gauges_and_extras() {
    let registry = MetricsRegistry::new();
    registry.register(EngineKind::Lsm);
    registry.record_write(EngineKind::Lsm, Duration::from_micros(10), &ok(()));
    registry.set_memory_bytes(EngineKind::Lsm, 4096);
    registry.set_cache_hit_rate(EngineKind::Lsm, 0.75);
    registry.set_extras(
        EngineKind::Lsm,
        EngineExtras::Lsm {
            compactions: 3,
            flushes: 7,
            levels: 2,
            memtable_bytes: 1024,
            sstable_count: 5,
        },
    );

    let text = registry.render_text();
    assert!(text.contains("concord_writes{engine=\"lsm\"} 1"));
    assert!(text.contains("concord_memory_bytes{engine=\"lsm\"} 4096"));
    assert!(text.contains("concord_cache_hit_rate{engine=\"lsm\"} 0.7500"));
    assert!(text.contains("concord_lsm_flushes{engine=\"lsm\"} 7"));
    assert!(text.contains("concord_lsm_sstable_count{engine=\"lsm\"} 5"));
    assert!(text.contains("concord_write_latency_ms_count{engine=\"lsm\"} 1"));
}

#[test]
fn custom_bucket_edges_are_respected() {
    let registry = MetricsRegistry::with_buckets(&[2.0, 20.0]);
    registry.register(EngineKind::Hash);
    registry.record_read(EngineKind::Hash, Duration::from_millis(10), &ok(()));

    let text = registry.render_text();
    assert!(text.contains("le=\"2\""));
    assert!(text.contains("le=\"20\""));
    assert!(!text.contains("le=\"0.05\""));
}

#[test]
fn http_exporter_serves_the_snapshot() {
    let registry = Arc::new(MetricsRegistry::new());
    registry.register(EngineKind::Ordered);
    registry.record_write(EngineKind::Ordered, Duration::from_micros(5), &ok(()));

    // Port 0: the OS picks a free one.
    let exporter = Arc::clone(&registry).serve_http(0).unwrap();
    let addr = exporter.addr();

    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .write_all(b"GET /metrics HTTP/1.0\r\n\r\n")
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();

    assert!(response.starts_with("HTTP/1.0 200 OK"));
    assert!(response.contains("concord_writes{engine=\"ordered\"} 1"));
    drop(exporter); // joins the thread
}
