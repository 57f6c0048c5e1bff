//! Unordered array backend: a flat vector of pairs.
//!
//! Every operation is a linear scan. It exists as the baseline
//! backend for tiny datasets and for exercising the engine contract;
//! the interesting statistics are its reallocation behavior
//! (`resizes`, `capacity`, utilization).

use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::{Error, ErrorKind, Result};
use crate::metrics::EngineExtras;

use super::{EngineOp, StorageEngine};

struct ArrayInner {
    entries: Vec<(Bytes, Bytes)>,
    resizes: u64,
}

/// Vector-of-pairs engine.
pub struct ArrayEngine {
    inner: RwLock<ArrayInner>,
}

impl Default for ArrayEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ArrayEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(ArrayInner {
                entries: Vec::new(),
                resizes: 0,
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

impl StorageEngine for ArrayEngine {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        Self::validate(key)?;
        if value.is_empty() {
            return Err(Error::invalid_param("value must not be empty"));
        }
        let mut inner = self.inner.write();
        if let Some(slot) = inner.entries.iter_mut().find(|(k, _)| k.as_ref() == key) {
            slot.1 = Bytes::copy_from_slice(value);
            return Ok(());
        }
        let capacity_before = inner.entries.capacity();
        inner
            .entries
            .push((Bytes::copy_from_slice(key), Bytes::copy_from_slice(value)));
        if inner.entries.capacity() != capacity_before {
            inner.resizes += 1;
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Self::validate(key)?;
        let inner = self.inner.read();
        Ok(inner
            .entries
            .iter()
            .find(|(k, _)| k.as_ref() == key)
            .map(|(_, v)| v.clone()))
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        Self::validate(key)?;
        let mut inner = self.inner.write();
        match inner.entries.iter().position(|(k, _)| k.as_ref() == key) {
            Some(at) => {
                inner.entries.swap_remove(at);
                Ok(())
            }
            None => Err(Error::op(ErrorKind::NotFound, "key not found")),
        }
    }

    fn update(&self, key: &[u8], value: &[u8]) -> Result<()> {
        Self::validate(key)?;
        let mut inner = self.inner.write();
        match inner.entries.iter_mut().find(|(k, _)| k.as_ref() == key) {
            Some(slot) => {
                slot.1 = Bytes::copy_from_slice(value);
                Ok(())
            }
            None => Err(Error::op(ErrorKind::NotFound, "key not found")),
        }
    }

    fn count(&self) -> Result<u64> {
        Ok(self.inner.read().entries.len() as u64)
    }

    fn memory_usage(&self) -> Result<u64> {
        let inner = self.inner.read();
        let payload: usize = inner
            .entries
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum();
        let slots = inner.entries.capacity() * std::mem::size_of::<(Bytes, Bytes)>();
        Ok((payload + slots) as u64)
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
        let mut hits: Vec<(Bytes, Bytes)> = inner
            .entries
            .iter()
            .filter(|(k, _)| k.as_ref() >= start && k.as_ref() < end)
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(hits)
    }

    fn iter(&self) -> Result<Box<dyn Iterator<Item = (Bytes, Bytes)> + Send>> {
        Ok(Box::new(self.snapshot()?.into_iter()))
    }

    fn snapshot(&self) -> Result<Vec<(Bytes, Bytes)>> {
        Ok(self.inner.read().entries.clone())
    }

    fn extras(&self) -> EngineExtras {
        let inner = self.inner.read();
        let capacity = inner.entries.capacity() as u64;
        let len = inner.entries.len() as u64;
        EngineExtras::Array {
            resizes: inner.resizes,
            capacity,
            utilization: if capacity == 0 {
                0.0
            } else {
                len as f64 / capacity as f64
            },
        }
    }
}
