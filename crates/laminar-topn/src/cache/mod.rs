//! LRU cache of per-partition ranking buffers.
//!
//! [`PartitionCache`] provides O(1) slab-based LRU eviction with an
//! optional expire-after-write TTL. It is a working-set mirror only: a
//! missing entry means "unknown", never "empty", and callers rebuild the
//! value from the state store on a miss.

use std::time::{Duration, Instant};

use fxhash::FxHashMap;

/// A slab node in the intrusive doubly-linked LRU list.
struct LruNode<V> {
    key: Vec<u8>,
    /// `None` only while the slot sits on the free list.
    value: Option<V>,
    written_at: Instant,
    prev: usize,
    next: usize,
}

/// Sentinel value for null pointers in the linked list.
const SENTINEL: usize = usize::MAX;

/// O(1) slab-based LRU cache keyed by partition key bytes.
///
/// Uses an `FxHashMap<Vec<u8>, usize>` for key→slot lookup and a
/// `Vec<LruNode>` slab with intrusive doubly-linked list pointers for LRU
/// ordering. Entries older than the TTL (measured from their last `put`)
/// are treated as absent and dropped on access.
pub struct PartitionCache<V> {
    /// Key → slab index lookup.
    index: FxHashMap<Vec<u8>, usize>,
    /// Slab of LRU nodes.
    slab: Vec<LruNode<V>>,
    /// Free list of recycled slab indices.
    free: Vec<usize>,
    /// Head of the LRU list (most recently used).
    head: usize,
    /// Tail of the LRU list (least recently used).
    tail: usize,
    /// Maximum number of entries.
    max_entries: usize,
    /// Expire-after-write duration.
    ttl: Option<Duration>,
    gets: u64,
    hits: u64,
    evictions: u64,
    expirations: u64,
}

impl<V> PartitionCache<V> {
    /// Create a new LRU cache with the given maximum capacity.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(max_entries: usize, ttl: Option<Duration>) -> Self {
        Self {
            index: FxHashMap::default(),
            slab: Vec::new(),
            free: Vec::new(),
            head: SENTINEL,
            tail: SENTINEL,
            max_entries: max_entries.max(1),
            ttl,
            gets: 0,
            hits: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    /// Look up a key, promoting it to most-recently-used on hit.
    pub fn get_if_present(&mut self, key: &[u8]) -> Option<&mut V> {
        self.get_if_present_at(key, Instant::now())
    }

    fn get_if_present_at(&mut self, key: &[u8], now: Instant) -> Option<&mut V> {
        self.gets += 1;
        let slot = self.live_slot(key, now)?;
        self.hits += 1;
        self.slab[slot].value.as_mut()
    }

    /// Look up a key without promoting it or counting a get.
    #[must_use]
    pub fn peek(&self, key: &[u8]) -> Option<&V> {
        let &slot = self.index.get(key)?;
        if self.is_expired(slot, Instant::now()) {
            return None;
        }
        self.slab[slot].value.as_ref()
    }

    /// Returns the cached value for `key`, or inserts the value produced
    /// by `init`.
    ///
    /// Nothing is inserted if `init` fails. The boolean is `true` on a hit.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `init`.
    pub fn get_or_try_insert_with<E, F>(
        &mut self,
        key: &[u8],
        init: F,
    ) -> Result<(&mut V, bool), E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let now = Instant::now();
        self.gets += 1;
        if let Some(slot) = self.live_slot(key, now) {
            if let Some(value) = self.slab[slot].value.take() {
                self.hits += 1;
                return Ok((self.slab[slot].value.insert(value), true));
            }
        }
        let value = init()?;
        Ok((self.insert_at(key.to_vec(), value, now), false))
    }

    /// Insert a key-value pair. Returns the evicted entry if the cache was full.
    pub fn put(&mut self, key: Vec<u8>, value: V) -> Option<(Vec<u8>, V)> {
        let mut evicted = None;
        if !self.index.contains_key(&key) && self.index.len() >= self.max_entries {
            evicted = self.evict_tail();
        }
        self.insert_at(key, value, Instant::now());
        evicted
    }

    /// Remove a key from the cache. Returns `true` if it was present.
    pub fn invalidate(&mut self, key: &[u8]) -> bool {
        if let Some(slot) = self.index.remove(key) {
            self.release(slot);
            true
        } else {
            false
        }
    }

    /// Clear all entries.
    pub fn clear(&mut self) {
        self.index.clear();
        self.slab.clear();
        self.free.clear();
        self.head = SENTINEL;
        self.tail = SENTINEL;
    }

    /// Number of entries currently in the cache (expired entries included
    /// until they are next accessed).
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Maximum capacity.
    #[must_use]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Configured expire-after-write duration.
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Cache hit rate as a fraction in `[0.0, 1.0]`. Returns 0.0 if no gets.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        if self.gets == 0 {
            0.0
        } else {
            self.hits as f64 / self.gets as f64
        }
    }

    /// Total number of lookups.
    #[must_use]
    pub fn total_gets(&self) -> u64 {
        self.gets
    }

    /// Total cache hits.
    #[must_use]
    pub fn total_hits(&self) -> u64 {
        self.hits
    }

    /// Total capacity evictions.
    #[must_use]
    pub fn total_evictions(&self) -> u64 {
        self.evictions
    }

    /// Total entries dropped because their TTL elapsed.
    #[must_use]
    pub fn total_expirations(&self) -> u64 {
        self.expirations
    }

    // ── Internal operations ──

    /// Resolves `key` to a live slot, dropping it if expired, and promotes
    /// it to the front.
    fn live_slot(&mut self, key: &[u8], now: Instant) -> Option<usize> {
        let &slot = self.index.get(key)?;
        if self.is_expired(slot, now) {
            self.index.remove(key);
            self.release(slot);
            self.expirations += 1;
            tracing::trace!(slot, "partition cache entry expired");
            return None;
        }
        self.detach(slot);
        self.push_front(slot);
        Some(slot)
    }

    fn is_expired(&self, slot: usize, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(self.slab[slot].written_at) >= ttl)
    }

    /// Inserts or overwrites `key`, evicting the tail if needed.
    fn insert_at(&mut self, key: Vec<u8>, value: V, now: Instant) -> &mut V {
        // If key already present, update in place and promote.
        if let Some(&slot) = self.index.get(&key) {
            self.slab[slot].written_at = now;
            self.detach(slot);
            self.push_front(slot);
            return self.slab[slot].value.insert(value);
        }

        if self.index.len() >= self.max_entries {
            self.evict_tail();
        }

        let node = LruNode {
            key: key.clone(),
            value: None,
            written_at: now,
            prev: SENTINEL,
            next: SENTINEL,
        };
        let slot = if let Some(free_slot) = self.free.pop() {
            self.slab[free_slot] = node;
            free_slot
        } else {
            self.slab.push(node);
            self.slab.len() - 1
        };

        self.index.insert(key, slot);
        self.push_front(slot);
        self.slab[slot].value.insert(value)
    }

    /// Unlinks a slot whose index entry is already gone and recycles it.
    fn release(&mut self, slot: usize) -> Option<V> {
        self.detach(slot);
        self.free.push(slot);
        self.slab[slot].key.clear();
        self.slab[slot].value.take()
    }

    /// Detach a node from the doubly-linked list.
    fn detach(&mut self, slot: usize) {
        let prev = self.slab[slot].prev;
        let next = self.slab[slot].next;

        if prev == SENTINEL {
            if self.head == slot {
                self.head = next;
            }
        } else {
            self.slab[prev].next = next;
        }

        if next == SENTINEL {
            if self.tail == slot {
                self.tail = prev;
            }
        } else {
            self.slab[next].prev = prev;
        }

        self.slab[slot].prev = SENTINEL;
        self.slab[slot].next = SENTINEL;
    }

    /// Push a node to the front (most recently used).
    fn push_front(&mut self, slot: usize) {
        self.slab[slot].prev = SENTINEL;
        self.slab[slot].next = self.head;

        if self.head != SENTINEL {
            self.slab[self.head].prev = slot;
        }
        self.head = slot;

        if self.tail == SENTINEL {
            self.tail = slot;
        }
    }

    /// Evict the tail (least recently used) entry.
    fn evict_tail(&mut self) -> Option<(Vec<u8>, V)> {
        if self.tail == SENTINEL {
            return None;
        }
        let slot = self.tail;
        let key = std::mem::take(&mut self.slab[slot].key);
        self.index.remove(&key);
        let value = self.release(slot)?;
        self.evictions += 1;
        tracing::trace!(slot, "partition cache evicted least recently used entry");
        Some((key, value))
    }
}
