//! Concurrency primitives shared across the engine.
//!
//! - [`TimedRwLock`] — reader/writer lock whose acquisition variants
//!   take a deadline and fail with `Timeout` instead of blocking
//!   forever; timed waits can register with a [`DeadlockDetector`].
//! - [`SpinLock`] — busy-wait mutex for tiny critical sections (the
//!   metrics registry keeps its per-engine extras slot behind one).
//! - [`SegmentedLock`] — a bank of N rw-lock stripes addressed by key
//!   hash, each guarding its own shard of data, with ordered
//!   multi-key acquisition. The cache builds its hash index on it.
//! - [`DeadlockDetector`] — coarse registry of waiting threads with
//!   per-lock deadlines; a sweep reports every overdue waiter. The
//!   LSM wires its tree lock through it so an operator can see what a
//!   stalled maintenance pass is blocked on.
//!
//! Lock state lives in `parking_lot` locks; the wrappers here add the
//! deadline surface, the sharding, and the waiter bookkeeping the
//! rest of the crate relies on.

#[cfg(test)]
mod tests;

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

use crate::error::{ErrorKind, KindError};

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by the timed lock primitives.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The deadline elapsed before the lock was granted.
    #[error("lock '{lock}' timed out after {waited_ms} ms")]
    Timeout {
        /// Name of the lock that timed out.
        lock: &'static str,
        /// Milliseconds waited before giving up.
        waited_ms: u64,
    },
}

impl KindError for SyncError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TimedRwLock
// ------------------------------------------------------------------------------------------------

/// Reader/writer lock with deadline-bounded acquisition.
///
/// `read()`/`write()` block indefinitely; `read_for()`/`write_for()`
/// give up after the timeout and return [`SyncError::Timeout`]. When
/// a detector is attached, every timed wait is registered for the
/// duration of its patience, so a sweep can name the locks a stalled
/// process is stuck on.
pub struct TimedRwLock<T> {
    name: &'static str,
    inner: RwLock<T>,
    detector: Option<Arc<DeadlockDetector>>,
}

impl<T> TimedRwLock<T> {
    /// Creates a named lock. The name appears in timeout errors and
    /// deadlock reports.
    pub fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            inner: RwLock::new(value),
            detector: None,
        }
    }

    /// Creates a named lock whose timed waits report to `detector`.
    pub fn with_detector(name: &'static str, value: T, detector: Arc<DeadlockDetector>) -> Self {
        Self {
            name,
            inner: RwLock::new(value),
            detector: Some(detector),
        }
    }

    /// Shared acquisition, blocking without bound.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read()
    }

    /// Exclusive acquisition, blocking without bound.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.write()
    }

    /// Shared acquisition bounded by `timeout`.
    pub fn read_for(&self, timeout: Duration) -> Result<RwLockReadGuard<'_, T>, SyncError> {
        let _watch = self.watch(timeout);
        self.inner.try_read_for(timeout).ok_or(SyncError::Timeout {
            lock: self.name,
            waited_ms: timeout.as_millis() as u64,
        })
    }

    /// Exclusive acquisition bounded by `timeout`.
    pub fn write_for(&self, timeout: Duration) -> Result<RwLockWriteGuard<'_, T>, SyncError> {
        let _watch = self.watch(timeout);
        self.inner.try_write_for(timeout).ok_or(SyncError::Timeout {
            lock: self.name,
            waited_ms: timeout.as_millis() as u64,
        })
    }

    /// The lock's diagnostic name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn watch(&self, patience: Duration) -> Option<WaiterGuard<'_>> {
        self.detector
            .as_ref()
            .map(|detector| detector.watch(self.name, patience))
    }
}

// ------------------------------------------------------------------------------------------------
// SpinLock
// ------------------------------------------------------------------------------------------------

/// Busy-wait mutex for critical sections of a few instructions.
///
/// Spins with [`std::hint::spin_loop`]; never syscalls. Use only where
/// contention is rare and the hold time is bounded.
pub struct SpinLock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is serialized by the `locked` flag.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates an unlocked spinlock.
    pub fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, spinning until it is free.
    pub fn lock(&self) -> SpinGuard<'_, T> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                std::hint::spin_loop();
            }
        }
        SpinGuard { lock: self }
    }

    /// Single acquisition attempt.
    pub fn try_lock(&self) -> Option<SpinGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinGuard { lock: self })
    }
}

/// RAII guard for [`SpinLock`].
pub struct SpinGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard holds the lock.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the lock exclusively.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

// ------------------------------------------------------------------------------------------------
// SegmentedLock
// ------------------------------------------------------------------------------------------------

/// A bank of rw-lock stripes addressed by key hash, each guarding its
/// own shard of `T`.
///
/// Different keys usually land on different stripes, so unrelated
/// operations never contend. Multi-key acquisition sorts stripe
/// indices ascending and deduplicates, which makes the lock order
/// global and cycle-free; whole-bank acquisition walks the same
/// ascending order.
pub struct SegmentedLock<T> {
    stripes: Vec<RwLock<T>>,
}

impl<T> SegmentedLock<T> {
    /// Creates a bank of `stripe_count` stripes (rounded up to a
    /// power of two, minimum 1), initializing each shard with `init`.
    pub fn new(stripe_count: usize, mut init: impl FnMut() -> T) -> Self {
        let count = stripe_count.max(1).next_power_of_two();
        Self {
            stripes: (0..count).map(|_| RwLock::new(init())).collect(),
        }
    }

    /// Number of stripes.
    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// Stripe index for a key.
    pub fn stripe_of(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & (self.stripes.len() - 1)
    }

    /// Shared lock on the shard covering `key`.
    pub fn read_key(&self, key: &[u8]) -> RwLockReadGuard<'_, T> {
        self.stripes[self.stripe_of(key)].read()
    }

    /// Exclusive lock on the shard covering `key`.
    pub fn write_key(&self, key: &[u8]) -> RwLockWriteGuard<'_, T> {
        self.stripes[self.stripe_of(key)].write()
    }

    /// Exclusive lock on the shard covering `key`, bounded by
    /// `timeout`.
    pub fn write_key_for(
        &self,
        key: &[u8],
        timeout: Duration,
    ) -> Result<RwLockWriteGuard<'_, T>, SyncError> {
        self.stripes[self.stripe_of(key)]
            .try_write_for(timeout)
            .ok_or(SyncError::Timeout {
                lock: "segmented",
                waited_ms: timeout.as_millis() as u64,
            })
    }

    /// Exclusively locks every shard covering `keys`, in ascending
    /// stripe order, and returns the guards.
    ///
    /// Keys hashing to the same stripe are collapsed to one guard, so
    /// the returned set never deadlocks against another ordered
    /// multi-key acquisition.
    pub fn write_keys<'a>(&'a self, keys: &[&[u8]]) -> Vec<RwLockWriteGuard<'a, T>> {
        let mut indices: Vec<usize> = keys.iter().map(|k| self.stripe_of(k)).collect();
        indices.sort_unstable();
        indices.dedup();
        indices.into_iter().map(|i| self.stripes[i].write()).collect()
    }

    /// Shared locks on every shard, ascending order.
    pub fn read_all(&self) -> Vec<RwLockReadGuard<'_, T>> {
        self.stripes.iter().map(RwLock::read).collect()
    }

    /// Exclusive locks on every shard, ascending order.
    pub fn write_all(&self) -> Vec<RwLockWriteGuard<'_, T>> {
        self.stripes.iter().map(RwLock::write).collect()
    }
}

// ------------------------------------------------------------------------------------------------
// DeadlockDetector
// ------------------------------------------------------------------------------------------------

/// A waiter that exceeded its deadline, as reported by
/// [`DeadlockDetector::sweep`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledWaiter {
    /// Diagnostic name of the lock being waited on.
    pub lock: &'static str,
    /// Registration token.
    pub token: u64,
    /// How far past the deadline the waiter is, in milliseconds.
    pub overdue_ms: u64,
}

struct WaiterRecord {
    lock: &'static str,
    deadline: Instant,
}

/// Coarse deadlock detector: every timed acquisition registers itself
/// with a deadline; a periodic [`sweep`](Self::sweep) declares any
/// waiter past its deadline as part of a global stall.
///
/// The detector never cancels anything itself — the timed lock
/// variants already abort their own waits. It exists so an operator
/// thread can observe *which* locks a stalled process is stuck on.
#[derive(Default)]
pub struct DeadlockDetector {
    next_token: AtomicU64,
    waiters: Mutex<HashMap<u64, WaiterRecord>>,
}

impl DeadlockDetector {
    /// Creates an empty detector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for `lock` with the given patience. The
    /// returned guard deregisters on drop (i.e. when the wait ends,
    /// successfully or not).
    pub fn watch(&self, lock: &'static str, patience: Duration) -> WaiterGuard<'_> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.waiters.lock().insert(
            token,
            WaiterRecord {
                lock,
                deadline: Instant::now() + patience,
            },
        );
        WaiterGuard {
            detector: self,
            token,
        }
    }

    /// Reports every registered waiter whose deadline has passed.
    pub fn sweep(&self) -> Vec<StalledWaiter> {
        let now = Instant::now();
        self.waiters
            .lock()
            .iter()
            .filter(|(_, record)| record.deadline <= now)
            .map(|(&token, record)| StalledWaiter {
                lock: record.lock,
                token,
                overdue_ms: now.duration_since(record.deadline).as_millis() as u64,
            })
            .collect()
    }

    /// Number of currently registered waiters.
    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }
}

/// RAII registration handle returned by [`DeadlockDetector::watch`].
pub struct WaiterGuard<'a> {
    detector: &'a DeadlockDetector,
    token: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.detector.waiters.lock().remove(&self.token);
    }
}
