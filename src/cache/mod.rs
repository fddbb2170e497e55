//! Response cache: a bounded LRU map behind one exclusive lock.
//!
//! [`LruCache`] is the plain data structure. [`SharedCache`] puts the whole of
//! it (key index and recency list together) behind a single
//! [`parking_lot::Mutex`], so a lookup that reorders recency is serialized with
//! every other lookup and insert. A hit writes to the recency list, so there
//! is no shared-read path.
//!
//! The guard is never held across an `.await`; `parking_lot` guards are not
//! `Send`, so the compiler rejects any attempt to do so from a spawned task.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

use parking_lot::Mutex;

mod lru;

pub use lru::{CacheStats, LruCache};

/// The cache used by the request pipeline: upstream URL → raw response body.
pub type ResponseCache = SharedCache<String, Arc<str>>;

/// Thread-safe wrapper around [`LruCache`].
///
/// Values are cloned out of the critical section, so `V` should be cheap to
/// clone (`Arc<str>` for response bodies).
#[derive(Debug)]
pub struct SharedCache<K, V> {
    inner: Mutex<LruCache<K, V>>,
}

impl<K, V> SharedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns a clone of the cached value and marks the key most recently used.
    pub fn lookup(&self, key: &K) -> Option<V> {
        self.inner.lock().lookup(key).cloned()
    }

    /// Stores `value` as the most recently used entry, returning the evicted
    /// entry if the cache was full.
    pub fn insert_or_update(&self, key: K, value: V) -> Option<(K, V)> {
        self.inner.lock().insert_or_update(key, value)
    }

    /// Returns a clone of the cached value without touching recency.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.inner.lock().peek(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().contains(key)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().remove(key)
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats()
    }

    /// Keys from least recently used to most recently used.
    pub fn keys(&self) -> Vec<K> {
        self.inner.lock().keys()
    }

    /// See [`LruCache::check_invariants`].
    pub fn check_invariants(&self) -> Result<(), String> {
        self.inner.lock().check_invariants()
    }
}
