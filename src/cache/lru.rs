//! Bounded least-recently-used map.
//!
//! Entries live in a `Vec` arena linked into a doubly-linked recency list by
//! index. A `HashMap` maps each key to its arena slot. The list runs from the
//! least-recently-used entry (`oldest`) to the most-recently-used entry
//! (`newest`), so eviction always takes the `oldest` node.
//!
//! This type does no locking of its own. Every method that can reorder the
//! recency list takes `&mut self`, including [`LruCache::lookup`]; share it
//! across tasks through [`SharedCache`](super::SharedCache).

use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;

const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Slot<K, V> {
    key: K,
    value: Option<V>,
    prev: usize,
    next: usize,
}

/// Counters describing how the cache has been used since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub updates: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of lookups that were hits, or `0.0` before the first lookup.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A fixed-capacity key/value store with least-recently-used eviction.
///
/// # Examples
///
/// ```
/// use std::num::NonZeroUsize;
/// use tunecache::cache::LruCache;
///
/// let mut cache = LruCache::new(NonZeroUsize::new(2).unwrap());
/// cache.insert_or_update("a", 1);
/// cache.insert_or_update("b", 2);
/// assert_eq!(cache.lookup(&"a"), Some(&1));
///
/// // "b" is now the least recently used entry.
/// let evicted = cache.insert_or_update("c", 3);
/// assert_eq!(evicted, Some(("b", 2)));
/// ```
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: NonZeroUsize,
    index: HashMap<K, usize>,
    slots: Vec<Slot<K, V>>,
    oldest: usize,
    newest: usize,
    free: usize,
    stats: CacheStats,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty cache that holds at most `capacity` entries.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            index: HashMap::with_capacity(capacity.get()),
            slots: Vec::with_capacity(capacity.get()),
            oldest: NIL,
            newest: NIL,
            free: NIL,
            stats: CacheStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Returns the value for `key` and marks it most recently used.
    ///
    /// A hit reorders the recency list, which is why this takes `&mut self`.
    pub fn lookup(&mut self, key: &K) -> Option<&V> {
        match self.index.get(key) {
            Some(&idx) => {
                self.stats.hits += 1;
                self.touch(idx);
                self.slots[idx].value.as_ref()
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Returns the value for `key` without changing its recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.index
            .get(key)
            .and_then(|&idx| self.slots[idx].value.as_ref())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Stores `value` under `key` as the most recently used entry.
    ///
    /// An existing key has its value replaced wholesale and the size is
    /// unchanged. A new key inserted into a full cache first evicts the least
    /// recently used entry, which is returned.
    pub fn insert_or_update(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.index.get(&key) {
            self.slots[idx].value = Some(value);
            self.touch(idx);
            self.stats.updates += 1;
            return None;
        }

        let evicted = if self.index.len() >= self.capacity.get() {
            self.evict_oldest()
        } else {
            None
        };

        let idx = self.allocate(key.clone(), value);
        self.push_newest(idx);
        self.index.insert(key, idx);
        self.stats.insertions += 1;

        evicted
    }

    /// Removes `key`, returning its value if it was present.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.index.remove(key)?;
        self.unlink(idx);
        self.release(idx)
    }

    /// Drops every entry. Statistics are kept.
    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.oldest = NIL;
        self.newest = NIL;
        self.free = NIL;
    }

    /// Keys from least recently used to most recently used.
    pub fn keys(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.index.len());
        let mut cursor = self.oldest;
        while cursor != NIL {
            keys.push(self.slots[cursor].key.clone());
            cursor = self.slots[cursor].next;
        }
        keys
    }

    /// Verifies that the key index and the recency list describe the same set
    /// of entries and that the size is within capacity.
    ///
    /// Returns a description of the first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.index.len() > self.capacity.get() {
            return Err(format!(
                "size {} exceeds capacity {}",
                self.index.len(),
                self.capacity
            ));
        }

        let mut walked = 0usize;
        let mut prev = NIL;
        let mut cursor = self.oldest;
        while cursor != NIL {
            walked += 1;
            if walked > self.index.len() {
                return Err("recency list is longer than the index".to_owned());
            }
            let slot = &self.slots[cursor];
            if slot.prev != prev {
                return Err(format!("broken back-link at slot {cursor}"));
            }
            if slot.value.is_none() {
                return Err(format!("linked slot {cursor} holds no value"));
            }
            match self.index.get(&slot.key) {
                Some(&idx) if idx == cursor => {}
                _ => return Err(format!("slot {cursor} is not indexed by its key")),
            }
            prev = cursor;
            cursor = slot.next;
        }

        if prev != self.newest {
            return Err("newest pointer does not match the list tail".to_owned());
        }
        if walked != self.index.len() {
            return Err(format!(
                "recency list holds {walked} entries but the index holds {}",
                self.index.len()
            ));
        }
        Ok(())
    }

    fn allocate(&mut self, key: K, value: V) -> usize {
        let slot = Slot {
            key,
            value: Some(value),
            prev: NIL,
            next: NIL,
        };
        if self.free != NIL {
            let idx = self.free;
            self.free = self.slots[idx].next;
            self.slots[idx] = slot;
            idx
        } else {
            self.slots.push(slot);
            self.slots.len() - 1
        }
    }

    // Returns the slot to the free list and hands back its value.
    fn release(&mut self, idx: usize) -> Option<V> {
        let value = self.slots[idx].value.take();
        self.slots[idx].next = self.free;
        self.free = idx;
        value
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);

        if prev != NIL {
            self.slots[prev].next = next;
        } else {
            self.oldest = next;
        }
        if next != NIL {
            self.slots[next].prev = prev;
        } else {
            self.newest = prev;
        }

        self.slots[idx].prev = NIL;
        self.slots[idx].next = NIL;
    }

    fn push_newest(&mut self, idx: usize) {
        self.slots[idx].prev = self.newest;
        self.slots[idx].next = NIL;
        if self.newest != NIL {
            self.slots[self.newest].next = idx;
        } else {
            self.oldest = idx;
        }
        self.newest = idx;
    }

    fn touch(&mut self, idx: usize) {
        if self.newest == idx {
            return;
        }
        self.unlink(idx);
        self.push_newest(idx);
    }

    fn evict_oldest(&mut self) -> Option<(K, V)> {
        if self.oldest == NIL {
            return None;
        }
        let idx = self.oldest;
        self.unlink(idx);
        let key = self.slots[idx].key.clone();
        self.index.remove(&key);
        self.stats.evictions += 1;
        self.release(idx).map(|value| (key, value))
    }
}
