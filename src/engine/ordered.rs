//! Ordered in-memory backend.
//!
//! The red-black-tree backend of the original design, realized with
//! the standard library's balanced ordered map — the backend is
//! specified by the engine contract alone, and hand-rolling the
//! rebalancing would buy nothing but bugs. Rebalance work is
//! approximated by counting structural mutations; depth is the
//! balanced-tree estimate `ceil(log2(n + 1))`.

use std::collections::BTreeMap;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::{Error, ErrorKind, Result};
use crate::metrics::EngineExtras;

use super::{EngineOp, StorageEngine};

struct OrderedInner {
    map: BTreeMap<Bytes, Bytes>,
    rebalances: u64,
}

/// Ordered-map engine.
pub struct OrderedEngine {
    inner: RwLock<OrderedInner>,
}

impl Default for OrderedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderedEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(OrderedInner {
                map: BTreeMap::new(),
                rebalances: 0,
            }),
        }
    }

    fn validate(key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::invalid_param("key must not be empty"));
        }
        Ok(())
    }
}

impl StorageEngine for OrderedEngine {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        Self::validate(key)?;
        if value.is_empty() {
            return Err(Error::invalid_param("value must not be empty"));
        }
        let mut inner = self.inner.write();
        let fresh = inner
            .map
            .insert(Bytes::copy_from_slice(key), Bytes::copy_from_slice(value))
            .is_none();
        if fresh {
            inner.rebalances += 1;
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Self::validate(key)?;
        Ok(self.inner.read().map.get(key).cloned())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        Self::validate(key)?;
        let mut inner = self.inner.write();
        match inner.map.remove(key) {
            Some(_) => {
                inner.rebalances += 1;
                Ok(())
            }
            None => Err(Error::op(ErrorKind::NotFound, "key not found")),
        }
    }

    fn update(&self, key: &[u8], value: &[u8]) -> Result<()> {
        Self::validate(key)?;
        let mut inner = self.inner.write();
        match inner.map.get_mut(key) {
            Some(slot) => {
                *slot = Bytes::copy_from_slice(value);
                Ok(())
            }
            None => Err(Error::op(ErrorKind::NotFound, "key not found")),
        }
    }

    fn count(&self) -> Result<u64> {
        Ok(self.inner.read().map.len() as u64)
    }

    fn memory_usage(&self) -> Result<u64> {
        let inner = self.inner.read();
        let payload: usize = inner.map.iter().map(|(k, v)| k.len() + v.len()).sum();
        let nodes = inner.map.len() * 2 * std::mem::size_of::<Bytes>();
        Ok((payload + nodes) as u64)
    }

    fn supports(&self, op: EngineOp) -> bool {
        matches!(
            op,
            EngineOp::RangeScan | EngineOp::Snapshot | EngineOp::BatchSet | EngineOp::Iterate
        )
    }

    fn batch_set(&self, pairs: &[(&[u8], &[u8])]) -> Result<()> {
        for (key, value) in pairs {
            self.put(key, value)?;
        }
        Ok(())
    }

    fn range_scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        let inner = self.inner.read();
        Ok(inner
            .map
            .range::<[u8], _>((
                std::ops::Bound::Included(start),
                std::ops::Bound::Excluded(end),
            ))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn iter(&self) -> Result<Box<dyn Iterator<Item = (Bytes, Bytes)> + Send>> {
        Ok(Box::new(self.snapshot()?.into_iter()))
    }

    fn snapshot(&self) -> Result<Vec<(Bytes, Bytes)>> {
        Ok(self
            .inner
            .read()
            .map
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn extras(&self) -> EngineExtras {
        let inner = self.inner.read();
        let n = inner.map.len() as u64;
        EngineExtras::Ordered {
            rebalances: inner.rebalances,
            // Balanced-tree depth estimate: ceil(log2(n + 1)).
            depth: u64::from(u64::BITS - n.leading_zeros()),
        }
    }
}
