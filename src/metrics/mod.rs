//! # Metrics Registry
//!
//! Per-engine counters, gauges, and latency histograms, keyed by
//! `(engine, operation)`. The engine manager times every routed
//! operation into here; engine-specific extras (compactions, tree
//! height, hash load factor, …) travel as a tagged enum refreshed on
//! demand.
//!
//! Snapshots render to a plain text exposition format
//! (`concord_<metric>{engine="<kind>",...} <value>` lines) and can be
//! served over HTTP by a minimal exporter thread with a crossbeam
//! shutdown channel.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::io::Write;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, bounded};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::engine::EngineKind;
use crate::error::{ErrorKind, KindError};
use crate::sync::SpinLock;

/// Default latency bucket edges, in milliseconds.
pub const DEFAULT_BUCKET_EDGES_MS: &[f64] = &[0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 50.0, 100.0, 500.0];

// ------------------------------------------------------------------------------------------------
// Histogram
// ------------------------------------------------------------------------------------------------

/// Fixed-bucket latency histogram (cumulative on render).
pub struct Histogram {
    /// Upper bucket edges in milliseconds; an implicit +Inf bucket
    /// follows.
    edges_ms: Vec<f64>,
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    sum_micros: AtomicU64,
}

impl Histogram {
    /// Creates a histogram over the given edges (must be ascending).
    pub fn new(edges_ms: &[f64]) -> Self {
        Self {
            edges_ms: edges_ms.to_vec(),
            buckets: (0..=edges_ms.len()).map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum_micros: AtomicU64::new(0),
        }
    }

    /// Records one observation.
    pub fn observe(&self, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        let at = self
            .edges_ms
            .partition_point(|edge| *edge < ms)
            .min(self.edges_ms.len());
        self.buckets[at].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Total observations.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of observations in microseconds.
    pub fn sum_micros(&self) -> u64 {
        self.sum_micros.load(Ordering::Relaxed)
    }

    /// Per-bucket counts (non-cumulative), +Inf last.
    pub fn bucket_counts(&self) -> Vec<u64> {
        self.buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect()
    }

    fn render(&self, out: &mut String, name: &str, engine: EngineKind) {
        use std::fmt::Write as _;
        let mut cumulative = 0;
        for (edge, bucket) in self.edges_ms.iter().zip(&self.buckets) {
            cumulative += bucket.load(Ordering::Relaxed);
            let _ = writeln!(
                out,
                "concord_{name}_bucket{{engine=\"{engine}\",le=\"{edge}\"}} {cumulative}"
            );
        }
        cumulative += self.buckets[self.edges_ms.len()].load(Ordering::Relaxed);
        let _ = writeln!(
            out,
            "concord_{name}_bucket{{engine=\"{engine}\",le=\"+Inf\"}} {cumulative}"
        );
        let _ = writeln!(
            out,
            "concord_{name}_count{{engine=\"{engine}\"}} {}",
            self.count()
        );
        let _ = writeln!(
            out,
            "concord_{name}_sum_us{{engine=\"{engine}\"}} {}",
            self.sum_micros()
        );
    }
}

// ------------------------------------------------------------------------------------------------
// Engine-specific extras
// ------------------------------------------------------------------------------------------------

/// Engine-family-specific metric fields.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineExtras {
    /// LSM tree internals.
    Lsm {
        /// Completed level merges.
        compactions: u64,
        /// Completed level-0 flushes.
        flushes: u64,
        /// Levels currently holding tables.
        levels: u64,
        /// Resident memtable bytes.
        memtable_bytes: u64,
        /// Tables on disk.
        sstable_count: u64,
    },
    /// B+Tree internals.
    BPlusTree {
        /// Node splits.
        splits: u64,
        /// Node merges.
        merges: u64,
        /// Tree height.
        height: u64,
    },
    /// Hash-table internals.
    Hash {
        /// Chained inserts into occupied buckets.
        collisions: u64,
        /// Entries per bucket.
        load_factor: f64,
        /// Bucket-array doublings.
        rehashes: u64,
    },
    /// Ordered-map internals.
    Ordered {
        /// Structural mutations.
        rebalances: u64,
        /// Balanced-depth estimate.
        depth: u64,
    },
    /// Array internals.
    Array {
        /// Vector reallocations.
        resizes: u64,
        /// Allocated slots.
        capacity: u64,
        /// `len / capacity`.
        utilization: f64,
    },
    /// No extras reported yet.
    None,
}

impl EngineExtras {
    fn render(&self, out: &mut String, engine: EngineKind) {
        use std::fmt::Write as _;
        match self {
            Self::Lsm {
                compactions,
                flushes,
                levels,
                memtable_bytes,
                sstable_count,
            } => {
                let _ = writeln!(out, "concord_lsm_compactions{{engine=\"{engine}\"}} {compactions}");
                let _ = writeln!(out, "concord_lsm_flushes{{engine=\"{engine}\"}} {flushes}");
                let _ = writeln!(out, "concord_lsm_levels{{engine=\"{engine}\"}} {levels}");
                let _ = writeln!(
                    out,
                    "concord_lsm_memtable_bytes{{engine=\"{engine}\"}} {memtable_bytes}"
                );
                let _ = writeln!(
                    out,
                    "concord_lsm_sstable_count{{engine=\"{engine}\"}} {sstable_count}"
                );
            }
            Self::BPlusTree {
                splits,
                merges,
                height,
            } => {
                let _ = writeln!(out, "concord_btree_splits{{engine=\"{engine}\"}} {splits}");
                let _ = writeln!(out, "concord_btree_merges{{engine=\"{engine}\"}} {merges}");
                let _ = writeln!(out, "concord_btree_height{{engine=\"{engine}\"}} {height}");
            }
            Self::Hash {
                collisions,
                load_factor,
                rehashes,
            } => {
                let _ = writeln!(out, "concord_hash_collisions{{engine=\"{engine}\"}} {collisions}");
                let _ = writeln!(
                    out,
                    "concord_hash_load_factor{{engine=\"{engine}\"}} {load_factor:.4}"
                );
                let _ = writeln!(out, "concord_hash_rehashes{{engine=\"{engine}\"}} {rehashes}");
            }
            Self::Ordered { rebalances, depth } => {
                let _ = writeln!(
                    out,
                    "concord_ordered_rebalances{{engine=\"{engine}\"}} {rebalances}"
                );
                let _ = writeln!(out, "concord_ordered_depth{{engine=\"{engine}\"}} {depth}");
            }
            Self::Array {
                resizes,
                capacity,
                utilization,
            } => {
                let _ = writeln!(out, "concord_array_resizes{{engine=\"{engine}\"}} {resizes}");
                let _ = writeln!(out, "concord_array_capacity{{engine=\"{engine}\"}} {capacity}");
                let _ = writeln!(
                    out,
                    "concord_array_utilization{{engine=\"{engine}\"}} {utilization:.4}"
                );
            }
            Self::None => {}
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Per-engine metric set
// ------------------------------------------------------------------------------------------------

/// Counters, gauges, and histograms for one engine.
pub struct EngineMetrics {
    kind: EngineKind,

    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    updates: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
    not_found: AtomicU64,

    /// Gauge: resident bytes.
    memory_bytes: AtomicU64,
    /// Gauge: cache hit rate in basis points (0..=10000).
    cache_hit_rate_bp: AtomicU64,

    read_latency: Histogram,
    write_latency: Histogram,
    delete_latency: Histogram,

    /// Engine-specific extras: swapped wholesale on refresh, cloned
    /// on render — a few instructions either way, so a spinlock.
    extras: SpinLock<EngineExtras>,
}

impl EngineMetrics {
    fn new(kind: EngineKind, edges_ms: &[f64]) -> Self {
        Self {
            kind,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            updates: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            not_found: AtomicU64::new(0),
            memory_bytes: AtomicU64::new(0),
            cache_hit_rate_bp: AtomicU64::new(0),
            read_latency: Histogram::new(edges_ms),
            write_latency: Histogram::new(edges_ms),
            delete_latency: Histogram::new(edges_ms),
            extras: SpinLock::new(EngineExtras::None),
        }
    }

    fn record_error_kind(&self, kind: ErrorKind) {
        match kind {
            ErrorKind::NotFound => {
                // Data signal, not an error: counted separately and
                // never logged.
                self.not_found.fetch_add(1, Ordering::Relaxed);
            }
            ErrorKind::Timeout => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Total reads routed to this engine.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Total writes routed to this engine.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Total deletes routed to this engine.
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Total errors observed (timeouts included, not-found excluded).
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Total not-found results.
    pub fn not_found(&self) -> u64 {
        self.not_found.load(Ordering::Relaxed)
    }

    /// The read-latency histogram.
    pub fn read_latency(&self) -> &Histogram {
        &self.read_latency
    }

    fn render(&self, out: &mut String) {
        use std::fmt::Write as _;
        let engine = self.kind;
        let _ = writeln!(out, "concord_reads{{engine=\"{engine}\"}} {}", self.reads());
        let _ = writeln!(out, "concord_writes{{engine=\"{engine}\"}} {}", self.writes());
        let _ = writeln!(out, "concord_deletes{{engine=\"{engine}\"}} {}", self.deletes());
        let _ = writeln!(
            out,
            "concord_updates{{engine=\"{engine}\"}} {}",
            self.updates.load(Ordering::Relaxed)
        );
        let _ = writeln!(out, "concord_errors{{engine=\"{engine}\"}} {}", self.errors());
        let _ = writeln!(
            out,
            "concord_timeouts{{engine=\"{engine}\"}} {}",
            self.timeouts.load(Ordering::Relaxed)
        );
        let _ = writeln!(
            out,
            "concord_not_found{{engine=\"{engine}\"}} {}",
            self.not_found()
        );
        let _ = writeln!(
            out,
            "concord_memory_bytes{{engine=\"{engine}\"}} {}",
            self.memory_bytes.load(Ordering::Relaxed)
        );
        let _ = writeln!(
            out,
            "concord_cache_hit_rate{{engine=\"{engine}\"}} {:.4}",
            self.cache_hit_rate_bp.load(Ordering::Relaxed) as f64 / 10_000.0
        );
        self.read_latency.render(out, "read_latency_ms", engine);
        self.write_latency.render(out, "write_latency_ms", engine);
        self.delete_latency.render(out, "delete_latency_ms", engine);
        self.extras.lock().render(out, engine);
    }
}

// ------------------------------------------------------------------------------------------------
// Registry
// ------------------------------------------------------------------------------------------------

/// Registry of per-engine metric sets.
pub struct MetricsRegistry {
    edges_ms: Vec<f64>,
    engines: RwLock<HashMap<EngineKind, Arc<EngineMetrics>>>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Creates a registry with the default latency buckets.
    pub fn new() -> Self {
        Self::with_buckets(DEFAULT_BUCKET_EDGES_MS)
    }

    /// Creates a registry with custom millisecond bucket edges.
    pub fn with_buckets(edges_ms: &[f64]) -> Self {
        Self {
            edges_ms: edges_ms.to_vec(),
            engines: RwLock::new(HashMap::new()),
        }
    }

    /// Registers an engine (idempotent) and returns its metric set.
    pub fn register(&self, kind: EngineKind) -> Arc<EngineMetrics> {
        let mut engines = self.engines.write();
        Arc::clone(
            engines
                .entry(kind)
                .or_insert_with(|| Arc::new(EngineMetrics::new(kind, &self.edges_ms))),
        )
    }

    /// Removes an engine's metric set.
    pub fn deregister(&self, kind: EngineKind) -> bool {
        self.engines.write().remove(&kind).is_some()
    }

    /// Metric set for an engine, if registered.
    pub fn engine(&self, kind: EngineKind) -> Option<Arc<EngineMetrics>> {
        self.engines.read().get(&kind).cloned()
    }

    /// Records a routed read.
    pub fn record_read<T>(
        &self,
        kind: EngineKind,
        elapsed: Duration,
        result: &crate::error::Result<T>,
    ) {
        if let Some(metrics) = self.engine(kind) {
            metrics.reads.fetch_add(1, Ordering::Relaxed);
            metrics.read_latency.observe(elapsed);
            if let Err(e) = result {
                metrics.record_error_kind(e.kind());
            }
        }
    }

    /// Records a routed write.
    pub fn record_write<T>(
        &self,
        kind: EngineKind,
        elapsed: Duration,
        result: &crate::error::Result<T>,
    ) {
        if let Some(metrics) = self.engine(kind) {
            metrics.writes.fetch_add(1, Ordering::Relaxed);
            metrics.write_latency.observe(elapsed);
            if let Err(e) = result {
                metrics.record_error_kind(e.kind());
            }
        }
    }

    /// Records a routed delete.
    pub fn record_delete<T>(
        &self,
        kind: EngineKind,
        elapsed: Duration,
        result: &crate::error::Result<T>,
    ) {
        if let Some(metrics) = self.engine(kind) {
            metrics.deletes.fetch_add(1, Ordering::Relaxed);
            metrics.delete_latency.observe(elapsed);
            if let Err(e) = result {
                metrics.record_error_kind(e.kind());
            }
        }
    }

    /// Records a routed update.
    pub fn record_update<T>(
        &self,
        kind: EngineKind,
        elapsed: Duration,
        result: &crate::error::Result<T>,
    ) {
        if let Some(metrics) = self.engine(kind) {
            metrics.updates.fetch_add(1, Ordering::Relaxed);
            metrics.write_latency.observe(elapsed);
            if let Err(e) = result {
                metrics.record_error_kind(e.kind());
            }
        }
    }

    /// Sets the resident-memory gauge.
    pub fn set_memory_bytes(&self, kind: EngineKind, bytes: u64) {
        if let Some(metrics) = self.engine(kind) {
            metrics.memory_bytes.store(bytes, Ordering::Relaxed);
        }
    }

    /// Sets the cache-hit-rate gauge (`rate` in `[0, 1]`).
    pub fn set_cache_hit_rate(&self, kind: EngineKind, rate: f64) {
        if let Some(metrics) = self.engine(kind) {
            let bp = (rate.clamp(0.0, 1.0) * 10_000.0) as u64;
            metrics.cache_hit_rate_bp.store(bp, Ordering::Relaxed);
        }
    }

    /// Replaces an engine's extras.
    pub fn set_extras(&self, kind: EngineKind, extras: EngineExtras) {
        if let Some(metrics) = self.engine(kind) {
            *metrics.extras.lock() = extras;
        }
    }

    /// Renders every registered engine to the text exposition format.
    pub fn render_text(&self) -> String {
        let engines: Vec<Arc<EngineMetrics>> = {
            let guard = self.engines.read();
            let mut list: Vec<_> = guard.values().cloned().collect();
            list.sort_by_key(|m| m.kind.slot());
            list
        };
        let mut out = String::new();
        for metrics in engines {
            metrics.render(&mut out);
        }
        out
    }

    /// Starts a minimal HTTP exporter serving [`render_text`] on
    /// every request. The registry handle is cloned into the exporter
    /// thread.
    ///
    /// [`render_text`]: Self::render_text
    pub fn serve_http(self: Arc<Self>, port: u16) -> std::io::Result<MetricsExporter> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let registry = self;

        let handle = std::thread::Builder::new()
            .name("concord-metrics".into())
            .spawn(move || exporter_loop(registry, listener, shutdown_rx))?;

        info!(%addr, "metrics exporter listening");
        Ok(MetricsExporter {
            addr,
            shutdown: shutdown_tx,
            handle: Some(handle),
        })
    }
}

// ------------------------------------------------------------------------------------------------
// HTTP exporter
// ------------------------------------------------------------------------------------------------

/// Handle to the exporter thread; shuts down on drop.
pub struct MetricsExporter {
    addr: SocketAddr,
    shutdown: Sender<()>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl MetricsExporter {
    /// The bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for MetricsExporter {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn exporter_loop(registry: Arc<MetricsRegistry>, listener: TcpListener, shutdown: Receiver<()>) {
    loop {
        match shutdown.recv_timeout(Duration::from_millis(50)) {
            Ok(()) | Err(crossbeam::channel::RecvTimeoutError::Disconnected) => return,
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => {}
        }
        loop {
            match listener.accept() {
                Ok((mut stream, peer)) => {
                    debug!(%peer, "metrics scrape");
                    let body = registry.render_text();
                    let response = format!(
                        "HTTP/1.0 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    if let Err(e) = stream.write_all(response.as_bytes()) {
                        warn!(error = %e, "metrics response failed");
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "metrics accept failed");
                    break;
                }
            }
        }
    }
}
