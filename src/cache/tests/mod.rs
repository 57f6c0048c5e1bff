
use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::config::{CacheConfig, EvictionPolicy};

pub(crate) fn cache_with(policy: EvictionPolicy, max_entries: usize) -> Arc<Cache> {
    Cache::new(CacheConfig {
        policy,
        max_entries,
        max_bytes: 1024 * 1024,
        eviction_factor: 0.1,
        min_eviction_count: 1,
        max_eviction_count: 64,
        default_ttl: None,
        sweep_interval: None, // tests drive sweeps by hand
        stripe_count: 4,
    })
}

pub(crate) fn short_ttl() -> Option<Duration> {
    Some(Duration::from_millis(30))
}
