//! Chained hash table backend.
//!
//! Explicit bucket vectors with separate chaining, doubling rehash at
//! a 0.75 load factor. Collisions (inserts landing in a non-empty
//! bucket) and rehashes are tracked for the metrics registry.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::{Error, ErrorKind, Result};
use crate::metrics::EngineExtras;

use super::{EngineOp, StorageEngine};

const INITIAL_BUCKETS: usize = 16;
const MAX_LOAD_FACTOR: f64 = 0.75;

struct HashInner {
    buckets: Vec<Vec<(Bytes, Bytes)>>,
    len: usize,
    collisions: u64,
    rehashes: u64,
}

impl HashInner {
    fn bucket_of(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & (self.buckets.len() - 1)
    }

    fn load_factor(&self) -> f64 {
        self.len as f64 / self.buckets.len() as f64
    }

    /// Doubles the bucket array and redistributes every entry.
    fn rehash(&mut self) {
        let new_size = self.buckets.len() * 2;
        let old = std::mem::replace(&mut self.buckets, vec![Vec::new(); new_size]);
        for bucket in old {
            for (key, value) in bucket {
                let at = {
                    let mut hasher = DefaultHasher::new();
                    key.hash(&mut hasher);
                    (hasher.finish() as usize) & (new_size - 1)
                };
                self.buckets[at].push((key, value));
            }
        }
        self.rehashes += 1;
    }
}

/// Separate-chaining hash engine.
pub struct HashEngine {
    inner: RwLock<HashInner>,
}

impl Default for HashEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HashEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashInner {
                buckets: vec![Vec::new(); INITIAL_BUCKETS],
                len: 0,
                collisions: 0,
                rehashes: 0,
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

impl StorageEngine for HashEngine {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        Self::validate(key)?;
        if value.is_empty() {
            return Err(Error::invalid_param("value must not be empty"));
        }
        let mut inner = self.inner.write();

        let at = inner.bucket_of(key);
        if let Some(slot) = inner.buckets[at]
            .iter_mut()
            .find(|(k, _)| k.as_ref() == key)
        {
            slot.1 = Bytes::copy_from_slice(value);
            return Ok(());
        }

        if !inner.buckets[at].is_empty() {
            inner.collisions += 1;
        }
        inner.buckets[at].push((Bytes::copy_from_slice(key), Bytes::copy_from_slice(value)));
        inner.len += 1;

        if inner.load_factor() > MAX_LOAD_FACTOR {
            inner.rehash();
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Self::validate(key)?;
        let inner = self.inner.read();
        let at = inner.bucket_of(key);
        Ok(inner.buckets[at]
            .iter()
            .find(|(k, _)| k.as_ref() == key)
            .map(|(_, v)| v.clone()))
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        Self::validate(key)?;
        let mut inner = self.inner.write();
        let at = inner.bucket_of(key);
        match inner.buckets[at].iter().position(|(k, _)| k.as_ref() == key) {
            Some(pos) => {
                inner.buckets[at].swap_remove(pos);
                inner.len -= 1;
                Ok(())
            }
            None => Err(Error::op(ErrorKind::NotFound, "key not found")),
        }
    }

    fn update(&self, key: &[u8], value: &[u8]) -> Result<()> {
        Self::validate(key)?;
        let mut inner = self.inner.write();
        let at = inner.bucket_of(key);
        match inner.buckets[at]
            .iter_mut()
            .find(|(k, _)| k.as_ref() == key)
        {
            Some(slot) => {
                slot.1 = Bytes::copy_from_slice(value);
                Ok(())
            }
            None => Err(Error::op(ErrorKind::NotFound, "key not found")),
        }
    }

    fn count(&self) -> Result<u64> {
        Ok(self.inner.read().len as u64)
    }

    fn memory_usage(&self) -> Result<u64> {
        let inner = self.inner.read();
        let payload: usize = inner
            .buckets
            .iter()
            .flatten()
            .map(|(k, v)| k.len() + v.len())
            .sum();
        let slots = inner.buckets.capacity() * std::mem::size_of::<Vec<(Bytes, Bytes)>>();
        Ok((payload + slots) as u64)
    }

    fn supports(&self, op: EngineOp) -> bool {
        matches!(op, EngineOp::Snapshot | EngineOp::BatchSet | EngineOp::Iterate)
    }

    fn batch_set(&self, pairs: &[(&[u8], &[u8])]) -> Result<()> {
        for (key, value) in pairs {
            self.put(key, value)?;
        }
        Ok(())
    }

    fn iter(&self) -> Result<Box<dyn Iterator<Item = (Bytes, Bytes)> + Send>> {
        Ok(Box::new(self.snapshot()?.into_iter()))
    }

    fn snapshot(&self) -> Result<Vec<(Bytes, Bytes)>> {
        let inner = self.inner.read();
        Ok(inner.buckets.iter().flatten().cloned().collect())
    }

    fn extras(&self) -> EngineExtras {
        let inner = self.inner.read();
        EngineExtras::Hash {
            collisions: inner.collisions,
            load_factor: inner.load_factor(),
            rehashes: inner.rehashes,
        }
    }
}
