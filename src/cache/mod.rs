//! # Cache Layer
//!
//! In-process key/value cache bounded by entries and bytes, with the
//! eviction policy chosen at construction: LRU, LFU, FIFO, Random,
//! CLOCK, or ARC — all behind one contract.
//!
//! ## Data layout
//!
//! - A **striped hash index** (`key → slot`): a
//!   [`SegmentedLock`](crate::sync::SegmentedLock) bank whose shards
//!   each hold one slice of the map, so unrelated keys never contend.
//! - A **slot table** holding entry payloads plus intrusive
//!   doubly-linked-list links, guarded by one mutex. The list is
//!   recency-ordered for LRU, insertion-ordered for FIFO, and kept
//!   for integrity checking under the other policies.
//! - **Policy state** (CLOCK hand, ARC lists and target) behind its
//!   own mutex.
//!
//! Lock order is fixed: stripe → list → policy. Eviction selects
//! victims under list+policy only, releases, and removes each victim
//! through the normal delete path, so the order is never inverted.
//!
//! ## TTL
//!
//! Expiry is absolute from creation. Reads treat expired entries as
//! misses; a background sweeper thread scans periodically and removes
//! them, and is shut down through a crossbeam control channel.
//!
//! ## Bounds
//!
//! `set` on a full cache first evicts
//! `ceil(eviction_factor × max_entries)` entries, clamped to the
//! configured min/max batch. At every quiescent point
//! `entries ≤ max_entries` and `bytes ≤ max_bytes`.

#[cfg(test)]
mod tests;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::config::{CacheConfig, EvictionPolicy};
use crate::error::{ErrorKind, KindError};
use crate::sync::SegmentedLock;

/// LFU frequency counters halve after this much idle time.
const LFU_DECAY_IDLE: Duration = Duration::from_secs(3600);

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The key was empty.
    #[error("key must not be empty")]
    EmptyKey,

    /// The entry alone exceeds the cache byte budget.
    #[error("entry of {entry} bytes exceeds cache budget of {budget}")]
    EntryTooLarge {
        /// Key + value size.
        entry: usize,
        /// Configured `max_bytes`.
        budget: usize,
    },
}

impl KindError for CacheError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyKey | Self::EntryTooLarge { .. } => ErrorKind::InvalidParam,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Statistics
// ------------------------------------------------------------------------------------------------

/// Counters exported by [`Cache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that returned a value.
    pub hits: u64,
    /// Lookups that found nothing (or something expired).
    pub misses: u64,
    /// Entries removed by the eviction policy.
    pub evictions: u64,
    /// Entries removed because their TTL passed.
    pub expired: u64,
    /// Resident entries.
    pub current_entries: usize,
    /// Resident key + value bytes.
    pub current_bytes: usize,
}

impl CacheStats {
    /// Hit fraction in `[0, 1]`; 0 when nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Slot table
// ------------------------------------------------------------------------------------------------

#[derive(Debug)]
struct Slot {
    occupied: bool,
    key: Bytes,
    value: Bytes,
    created: Instant,
    last_access: Instant,
    ttl: Option<Duration>,

    prev: Option<usize>,
    next: Option<usize>,

    /// LFU access counter.
    frequency: u64,
    /// LFU decay clock.
    last_freq_at: Instant,
    /// CLOCK second-chance bit.
    ref_bit: bool,
}

impl Slot {
    fn vacant() -> Self {
        let now = Instant::now();
        Self {
            occupied: false,
            key: Bytes::new(),
            value: Bytes::new(),
            created: now,
            last_access: now,
            ttl: None,
            prev: None,
            next: None,
            frequency: 0,
            last_freq_at: now,
            ref_bit: false,
        }
    }

    fn expired_at(&self, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.duration_since(self.created) >= ttl)
    }
}

/// Slots plus the intrusive doubly linked list (head = most recent
/// insert/access, tail = oldest).
struct SlotTable {
    slots: Vec<Slot>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
    bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expired: u64,
}

impl SlotTable {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
            bytes: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            expired: 0,
        }
    }

    fn allocate(&mut self) -> usize {
        if let Some(idx) = self.free.pop() {
            idx
        } else {
            self.slots.push(Slot::vacant());
            self.slots.len() - 1
        }
    }

    fn link_front(&mut self, idx: usize) {
        self.slots[idx].prev = None;
        self.slots[idx].next = self.head;
        if let Some(old_head) = self.head {
            self.slots[old_head].prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
        self.slots[idx].prev = None;
        self.slots[idx].next = None;
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.link_front(idx);
    }

    /// Clears and frees a slot. The caller already unlinked it (or is
    /// about to reuse the links).
    fn release(&mut self, idx: usize) {
        let slot = &mut self.slots[idx];
        self.bytes -= slot.key.len() + slot.value.len();
        self.len -= 1;
        *slot = Slot::vacant();
        self.free.push(idx);
    }

    /// Walks the list forward counting nodes and checking link
    /// symmetry.
    fn check_links(&self) -> bool {
        let mut count = 0;
        let mut prev: Option<usize> = None;
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            if self.slots[idx].prev != prev {
                return false;
            }
            count += 1;
            if count > self.len {
                return false; // cycle
            }
            prev = cursor;
            cursor = self.slots[idx].next;
        }
        self.tail == prev && count == self.len
    }
}

// ------------------------------------------------------------------------------------------------
// Policy state
// ------------------------------------------------------------------------------------------------

/// Which ARC resident list a slot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArcList {
    T1,
    T2,
}

struct ArcState {
    /// Adaptive target size for T1.
    p: usize,
    /// Resident once-seen entries (front = MRU).
    t1: VecDeque<usize>,
    /// Resident frequently-seen entries (front = MRU).
    t2: VecDeque<usize>,
    /// Ghost keys recently evicted from T1.
    b1: VecDeque<Bytes>,
    /// Ghost keys recently evicted from T2.
    b2: VecDeque<Bytes>,
    /// Slot membership (parallel to the slot table).
    membership: HashMap<usize, ArcList>,
}

enum PolicyState {
    Lru,
    Lfu,
    Fifo,
    Random,
    Clock { hand: usize },
    Arc(ArcState),
}

/// Diagnostic view of the ARC lists, for tests and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArcSnapshot {
    /// Resident once-seen entries.
    pub t1: usize,
    /// Resident frequently-seen entries.
    pub t2: usize,
    /// Ghosts of T1.
    pub b1: usize,
    /// Ghosts of T2.
    pub b2: usize,
    /// Adaptive target for T1.
    pub p: usize,
}

// ------------------------------------------------------------------------------------------------
// Cache
// ------------------------------------------------------------------------------------------------

struct Sweeper {
    shutdown: Sender<()>,
    handle: std::thread::JoinHandle<()>,
}

/// Policy-pluggable bounded cache.
pub struct Cache {
    config: CacheConfig,
    index: SegmentedLock<HashMap<Bytes, usize>>,
    list: Mutex<SlotTable>,
    policy: Mutex<PolicyState>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl Cache {
    /// Creates a cache (and its TTL sweeper thread, when configured).
    pub fn new(config: CacheConfig) -> Arc<Self> {
        let index = SegmentedLock::new(config.stripe_count, HashMap::new);

        let policy = match config.policy {
            EvictionPolicy::Lru => PolicyState::Lru,
            EvictionPolicy::Lfu => PolicyState::Lfu,
            EvictionPolicy::Fifo => PolicyState::Fifo,
            EvictionPolicy::Random => PolicyState::Random,
            EvictionPolicy::Clock => PolicyState::Clock { hand: 0 },
            EvictionPolicy::Arc => PolicyState::Arc(ArcState {
                p: 0,
                t1: VecDeque::new(),
                t2: VecDeque::new(),
                b1: VecDeque::new(),
                b2: VecDeque::new(),
                membership: HashMap::new(),
            }),
        };

        let cache = Arc::new(Self {
            config: config.clone(),
            index,
            list: Mutex::new(SlotTable::new()),
            policy: Mutex::new(policy),
            sweeper: Mutex::new(None),
        });

        if let Some(interval) = config.sweep_interval {
            let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
            let weak = Arc::downgrade(&cache);
            let handle = std::thread::Builder::new()
                .name("concord-cache-sweep".into())
                .spawn(move || sweeper_loop(weak, shutdown_rx, interval))
                .expect("spawning cache sweeper");
            *cache.sweeper.lock() = Some(Sweeper {
                shutdown: shutdown_tx,
                handle,
            });
        }

        cache
    }

    // --------------------------------------------------------------------------------------------
    // Operations
    // --------------------------------------------------------------------------------------------

    /// Looks up a key. Expired entries count as misses.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let idx = self.index.read_key(key).get(key).copied();
        let Some(idx) = idx else {
            self.list.lock().misses += 1;
            return None;
        };

        let now = Instant::now();
        let value = {
            let mut list = self.list.lock();
            let (matches, is_expired, value) = {
                let slot = &list.slots[idx];
                (
                    slot.occupied && slot.key.as_ref() == key,
                    slot.expired_at(now),
                    slot.value.clone(),
                )
            };
            if !matches {
                list.misses += 1; // slot recycled under our feet
                return None;
            }
            if is_expired {
                list.misses += 1;
                None
            } else {
                list.slots[idx].last_access = now;
                list.hits += 1;
                self.touch_policy(&mut list, idx, now);
                Some(value)
            }
        };

        if value.is_none() {
            // Expired: remove through the normal path and account it.
            self.remove_entry(key, false);
            self.list.lock().expired += 1;
        }
        value
    }

    /// Inserts or replaces a key, evicting per policy when full.
    ///
    /// `ttl` overrides the configured default; `None` falls back to
    /// it.
    pub fn set(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }
        let entry_bytes = key.len() + value.len();
        if entry_bytes > self.config.max_bytes {
            return Err(CacheError::EntryTooLarge {
                entry: entry_bytes,
                budget: self.config.max_bytes,
            });
        }

        // Replace-in-place never needs eviction when the size shrinks;
        // simplest correct order is: remove any old entry, make room,
        // insert fresh.
        self.remove_entry(key, false);
        self.make_room(entry_bytes);

        let ttl = ttl.or(self.config.default_ttl);
        let now = Instant::now();
        let key = Bytes::copy_from_slice(key);
        let value = Bytes::copy_from_slice(value);

        let mut stripe = self.index.write_key(&key);
        let mut list = self.list.lock();

        let idx = list.allocate();
        {
            let slot = &mut list.slots[idx];
            slot.occupied = true;
            slot.key = key.clone();
            slot.value = value;
            slot.created = now;
            slot.last_access = now;
            slot.ttl = ttl;
            slot.frequency = 1;
            slot.last_freq_at = now;
            slot.ref_bit = true;
        }
        list.bytes += entry_bytes;
        list.len += 1;
        list.link_front(idx);
        stripe.insert(key.clone(), idx);

        self.admit_policy(&mut list, idx, &key);
        trace!(len = list.len, bytes = list.bytes, "cache set");
        Ok(())
    }

    /// Removes a key. Returns true when it was present.
    pub fn delete(&self, key: &[u8]) -> bool {
        self.remove_entry(key, false)
    }

    /// Non-promoting presence check (expired entries read as absent).
    pub fn exists(&self, key: &[u8]) -> bool {
        let Some(idx) = self.index.read_key(key).get(key).copied() else {
            return false;
        };
        let list = self.list.lock();
        let slot = &list.slots[idx];
        slot.occupied && slot.key.as_ref() == key && !slot.expired_at(Instant::now())
    }

    /// Drops every entry and resets policy state. Counters survive.
    pub fn clear(&self) {
        // Lock order: every index shard ascending, then list, then
        // policy.
        let mut stripe_guards = self.index.write_all();
        let mut list = self.list.lock();
        let mut policy = self.policy.lock();

        for stripe in &mut stripe_guards {
            stripe.clear();
        }
        let (hits, misses, evictions, expired) =
            (list.hits, list.misses, list.evictions, list.expired);
        *list = SlotTable::new();
        list.hits = hits;
        list.misses = misses;
        list.evictions = evictions;
        list.expired = expired;

        match &mut *policy {
            PolicyState::Clock { hand } => *hand = 0,
            PolicyState::Arc(arc) => {
                arc.p = 0;
                arc.t1.clear();
                arc.t2.clear();
                arc.b1.clear();
                arc.b2.clear();
                arc.membership.clear();
            }
            _ => {}
        }
        debug!("cache cleared");
    }

    /// Resident entry count.
    pub fn len(&self) -> usize {
        self.list.lock().len
    }

    /// True when nothing is resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStats {
        let list = self.list.lock();
        CacheStats {
            hits: list.hits,
            misses: list.misses,
            evictions: list.evictions,
            expired: list.expired,
            current_entries: list.len,
            current_bytes: list.bytes,
        }
    }

    /// ARC internals, when ARC is the active policy.
    pub fn arc_snapshot(&self) -> Option<ArcSnapshot> {
        match &*self.policy.lock() {
            PolicyState::Arc(arc) => Some(ArcSnapshot {
                t1: arc.t1.len(),
                t2: arc.t2.len(),
                b1: arc.b1.len(),
                b2: arc.b2.len(),
                p: arc.p,
            }),
            _ => None,
        }
    }

    /// Structural self-check: the hash index, the linked list, and
    /// the counters must agree.
    pub fn validate_integrity(&self) -> bool {
        let stripe_guards = self.index.read_all();
        let list = self.list.lock();

        let indexed: usize = stripe_guards.iter().map(|s| s.len()).sum();
        let occupied = list.slots.iter().filter(|s| s.occupied).count();

        indexed == list.len && occupied == list.len && list.check_links()
    }

    /// Removes every expired entry. Returns how many went.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let victims: Vec<Bytes> = {
            let list = self.list.lock();
            list.slots
                .iter()
                .filter(|s| s.occupied && s.expired_at(now))
                .map(|s| s.key.clone())
                .collect()
        };

        let mut removed = 0;
        for key in victims {
            if self.remove_entry(&key, false) {
                removed += 1;
            }
        }
        if removed > 0 {
            self.list.lock().expired += removed as u64;
            debug!(removed, "cache sweep removed expired entries");
        }

        // LFU decay rides along with the sweep.
        if self.config.policy == EvictionPolicy::Lfu {
            let mut list = self.list.lock();
            for slot in list.slots.iter_mut().filter(|s| s.occupied) {
                if now.duration_since(slot.last_freq_at) >= LFU_DECAY_IDLE {
                    slot.frequency = (slot.frequency / 2).max(1);
                    slot.last_freq_at = now;
                }
            }
        }
        removed
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    /// Policy reaction to a hit. Caller holds the list lock.
    fn touch_policy(&self, list: &mut SlotTable, idx: usize, now: Instant) {
        match &mut *self.policy.lock() {
            PolicyState::Lru => list.move_to_front(idx),
            PolicyState::Fifo | PolicyState::Random => {}
            PolicyState::Lfu => {
                let slot = &mut list.slots[idx];
                slot.frequency += 1;
                slot.last_freq_at = now;
            }
            PolicyState::Clock { .. } => list.slots[idx].ref_bit = true,
            PolicyState::Arc(arc) => match arc.membership.get(&idx) {
                Some(ArcList::T1) => {
                    // Second touch: promote to the frequent list.
                    arc.t1.retain(|&i| i != idx);
                    arc.t2.push_front(idx);
                    arc.membership.insert(idx, ArcList::T2);
                }
                Some(ArcList::T2) => {
                    arc.t2.retain(|&i| i != idx);
                    arc.t2.push_front(idx);
                }
                None => {}
            },
        }
    }

    /// Policy bookkeeping for a fresh insert. Caller holds the list
    /// lock (and, for ARC ghost hits, adapts the target).
    fn admit_policy(&self, _list: &mut SlotTable, idx: usize, key: &Bytes) {
        if let PolicyState::Arc(arc) = &mut *self.policy.lock() {
            let max = self.config.max_entries.max(1);
            if let Some(at) = arc.b1.iter().position(|k| k == key) {
                // Ghost hit in B1: recency is being undervalued.
                let delta = (arc.b2.len() / arc.b1.len().max(1)).max(1);
                arc.p = (arc.p + delta).min(max);
                arc.b1.remove(at);
                arc.t2.push_front(idx);
                arc.membership.insert(idx, ArcList::T2);
            } else if let Some(at) = arc.b2.iter().position(|k| k == key) {
                // Ghost hit in B2: frequency is being undervalued.
                let delta = (arc.b1.len() / arc.b2.len().max(1)).max(1);
                arc.p = arc.p.saturating_sub(delta);
                arc.b2.remove(at);
                arc.t2.push_front(idx);
                arc.membership.insert(idx, ArcList::T2);
            } else {
                arc.t1.push_front(idx);
                arc.membership.insert(idx, ArcList::T1);
            }
        }
    }

    /// Evicts until one more entry of `incoming_bytes` fits.
    fn make_room(&self, incoming_bytes: usize) {
        loop {
            let (len, bytes) = {
                let list = self.list.lock();
                (list.len, list.bytes)
            };
            let over_entries = len + 1 > self.config.max_entries;
            let over_bytes = bytes + incoming_bytes > self.config.max_bytes;
            if !over_entries && !over_bytes {
                return;
            }
            if len == 0 {
                return; // nothing left to evict; entry size was pre-validated
            }

            let lo = self.config.min_eviction_count.max(1);
            let hi = self.config.max_eviction_count.max(lo);
            let batch = ((self.config.eviction_factor * self.config.max_entries as f64).ceil()
                as usize)
                .clamp(lo, hi)
                .min(len);
            let victims = self.select_victims(batch);
            if victims.is_empty() {
                warn!("eviction selected no victims with a full cache");
                return;
            }
            let mut removed_any = false;
            for key in victims {
                if self.remove_entry(&key, true) {
                    self.list.lock().evictions += 1;
                    removed_any = true;
                }
            }
            if !removed_any {
                return; // a racing writer beat us to every victim
            }
        }
    }

    /// Picks up to `count` victim keys under the list+policy locks.
    fn select_victims(&self, count: usize) -> Vec<Bytes> {
        let mut list = self.list.lock();
        let mut policy = self.policy.lock();
        let mut victims = Vec::with_capacity(count);
        let now = Instant::now();

        for _ in 0..count {
            let idx = match &mut *policy {
                // Recency and insertion order both evict from the
                // tail; LRU reordered on access, FIFO did not.
                PolicyState::Lru | PolicyState::Fifo => {
                    let mut cursor = list.tail;
                    while let Some(i) = cursor {
                        if !victims.iter().any(|k| *k == list.slots[i].key) {
                            break;
                        }
                        cursor = list.slots[i].prev;
                    }
                    cursor
                }
                PolicyState::Lfu => {
                    // Scan for the minimum frequency, decaying stale
                    // counters on the way.
                    let mut best: Option<(usize, u64)> = None;
                    for (i, slot) in list.slots.iter_mut().enumerate() {
                        if !slot.occupied {
                            continue;
                        }
                        if now.duration_since(slot.last_freq_at) >= LFU_DECAY_IDLE {
                            slot.frequency = (slot.frequency / 2).max(1);
                            slot.last_freq_at = now;
                        }
                        if victims.iter().any(|k| *k == slot.key) {
                            continue;
                        }
                        if best.is_none_or(|(_, f)| slot.frequency < f) {
                            best = Some((i, slot.frequency));
                        }
                    }
                    best.map(|(i, _)| i)
                }
                PolicyState::Random => {
                    let candidates: Vec<usize> = list
                        .slots
                        .iter()
                        .enumerate()
                        .filter(|(_, s)| s.occupied && !victims.iter().any(|k| *k == s.key))
                        .map(|(i, _)| i)
                        .collect();
                    if candidates.is_empty() {
                        None
                    } else {
                        let pick = rand::rng().random_range(0..candidates.len());
                        Some(candidates[pick])
                    }
                }
                PolicyState::Clock { hand } => {
                    let capacity = list.slots.len();
                    let mut chosen = None;
                    // Two full revolutions bound the scan: the first
                    // may only clear reference bits.
                    for _ in 0..capacity * 2 {
                        let i = *hand;
                        *hand = (*hand + 1) % capacity.max(1);
                        let slot = &mut list.slots[i];
                        if !slot.occupied || victims.iter().any(|k| *k == slot.key) {
                            continue;
                        }
                        if slot.ref_bit {
                            slot.ref_bit = false;
                        } else {
                            chosen = Some(i);
                            break;
                        }
                    }
                    chosen
                }
                PolicyState::Arc(arc) => {
                    // Standard ARC split: prefer T1 while it exceeds
                    // the target p, T2 otherwise; ghost the key.
                    let from_t1 = !arc.t1.is_empty()
                        && (arc.t1.len() > arc.p || arc.t2.is_empty());
                    let max = self.config.max_entries.max(1);
                    if from_t1 {
                        arc.t1.pop_back().map(|i| {
                            arc.membership.remove(&i);
                            arc.b1.push_front(list.slots[i].key.clone());
                            arc.b1.truncate(max);
                            i
                        })
                    } else {
                        arc.t2.pop_back().map(|i| {
                            arc.membership.remove(&i);
                            arc.b2.push_front(list.slots[i].key.clone());
                            arc.b2.truncate(max);
                            i
                        })
                    }
                }
            };

            match idx {
                Some(i) => victims.push(list.slots[i].key.clone()),
                None => break,
            }
        }
        victims
    }

    /// Full removal through the stripe → list → policy order.
    ///
    /// `evicted_by_policy` is set on the eviction path, where ARC
    /// already moved the key into a ghost list during selection.
    fn remove_entry(&self, key: &[u8], evicted_by_policy: bool) -> bool {
        let mut stripe = self.index.write_key(key);
        let Some(idx) = stripe.remove(key) else {
            return false;
        };
        let mut list = self.list.lock();
        if !list.slots[idx].occupied || list.slots[idx].key.as_ref() != key {
            return false;
        }
        list.unlink(idx);
        list.release(idx);

        if !evicted_by_policy {
            if let PolicyState::Arc(arc) = &mut *self.policy.lock() {
                match arc.membership.remove(&idx) {
                    Some(ArcList::T1) => arc.t1.retain(|&i| i != idx),
                    Some(ArcList::T2) => arc.t2.retain(|&i| i != idx),
                    None => {}
                }
            }
        }
        true
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            let _ = sweeper.shutdown.send(());
            // The sweeper itself may hold the last reference; joining
            // our own thread would never return.
            if sweeper.handle.thread().id() != std::thread::current().id() {
                let _ = sweeper.handle.join();
            }
        }
    }
}

/// Background TTL sweeper: ticks on the interval, exits on the
/// shutdown channel or once the cache is gone.
fn sweeper_loop(cache: Weak<Cache>, shutdown: Receiver<()>, interval: Duration) {
    loop {
        match shutdown.recv_timeout(interval) {
            Ok(()) | Err(crossbeam::channel::RecvTimeoutError::Disconnected) => return,
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => {}
        }
        let Some(cache) = cache.upgrade() else { return };
        cache.sweep_expired();
    }
}
