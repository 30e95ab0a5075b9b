//! Bounded, thread-safe LRU cache
//!
//! A hash index over a doubly linked recency list. The list lives in a dense
//! `Vec` of nodes linked by index; removing a node swaps the last node into
//! its slot and re-links it, so `get` and `put` stay O(1) without per-entry
//! allocation.
//!
//! All bookkeeping happens under one short-held `parking_lot::Mutex`. The
//! optional eviction listener runs after the lock is released.

use parking_lot::Mutex;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use tracing::trace;

const NIL: usize = usize::MAX;

type EvictionListener<K, V> = Arc<dyn Fn(&K, &V) + Send + Sync>;

struct Node<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

struct LruState<K, V> {
    index: HashMap<K, usize>,
    nodes: Vec<Node<K, V>>,
    /// Most recently used
    head: usize,
    /// Least recently used
    tail: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K: Hash + Eq + Clone, V> LruState<K, V> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            index: HashMap::with_capacity(capacity),
            nodes: Vec::with_capacity(capacity),
            head: NIL,
            tail: NIL,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        if prev != NIL {
            self.nodes[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next].prev = prev;
        } else {
            self.tail = prev;
        }
    }

    fn push_front(&mut self, idx: usize) {
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = self.head;
        if self.head != NIL {
            self.nodes[self.head].prev = idx;
        } else {
            self.tail = idx;
        }
        self.head = idx;
    }

    fn touch(&mut self, idx: usize) {
        if self.head != idx {
            self.unlink(idx);
            self.push_front(idx);
        }
    }

    fn remove_at(&mut self, idx: usize) -> (K, V) {
        self.unlink(idx);
        let node = self.nodes.swap_remove(idx);
        self.index.remove(&node.key);

        // The former last node now sits at `idx`
        if idx < self.nodes.len() {
            let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
            if prev != NIL {
                self.nodes[prev].next = idx;
            } else {
                self.head = idx;
            }
            if next != NIL {
                self.nodes[next].prev = idx;
            } else {
                self.tail = idx;
            }
            if let Some(slot) = self.index.get_mut(&self.nodes[idx].key) {
                *slot = idx;
            }
        }

        debug_assert_eq!(self.index.len(), self.nodes.len());
        (node.key, node.value)
    }

    fn insert_front(&mut self, key: K, value: V) {
        let idx = self.nodes.len();
        self.nodes.push(Node {
            key: key.clone(),
            value,
            prev: NIL,
            next: NIL,
        });
        self.index.insert(key, idx);
        self.push_front(idx);
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub len: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Fraction of `get` calls that hit, 0.0 when there were none
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Fixed-capacity least-recently-used cache
///
/// Cloning is cheap and yields another handle to the same cache.
///
/// ```
/// use tether_core_resilience::LruCache;
///
/// let cache = LruCache::new(2);
/// cache.put("a", 1);
/// cache.put("b", 2);
/// assert_eq!(cache.get("a"), Some(1));
///
/// // "b" is now the least recently used entry
/// assert_eq!(cache.put("c", 3), Some(("b", 2)));
/// ```
pub struct LruCache<K, V> {
    state: Arc<Mutex<LruState<K, V>>>,
    capacity: usize,
    listener: Option<EvictionListener<K, V>>,
}

impl<K, V> Clone for LruCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            capacity: self.capacity,
            listener: self.listener.clone(),
        }
    }
}

impl<K, V> fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruCache")
            .field("capacity", &self.capacity)
            .field("len", &self.state.lock().nodes.len())
            .finish()
    }
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Arc::new(Mutex::new(LruState::with_capacity(capacity))),
            capacity,
            listener: None,
        }
    }

    /// Call `listener` with every entry evicted for capacity
    ///
    /// Explicit `remove`, `clear` and overwrites do not notify.
    pub fn with_eviction_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&K, &V) + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Look up `key`, marking it most recently used on a hit
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut state = self.state.lock();
        match state.index.get(key).copied() {
            Some(idx) => {
                state.hits += 1;
                state.touch(idx);
                Some(state.nodes[idx].value.clone())
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Insert or overwrite `key`, making it most recently used
    ///
    /// Returns the entry evicted to make room, if a brand-new key found the
    /// cache full.
    pub fn put(&self, key: K, value: V) -> Option<(K, V)> {
        let evicted = {
            let mut state = self.state.lock();

            if let Some(idx) = state.index.get(&key).copied() {
                state.nodes[idx].value = value;
                state.touch(idx);
                return None;
            }

            let evicted = if state.nodes.len() >= self.capacity {
                let tail = state.tail;
                state.evictions += 1;
                Some(state.remove_at(tail))
            } else {
                None
            };

            state.insert_front(key, value);
            debug_assert!(state.nodes.len() <= self.capacity);
            evicted
        };

        if let Some((key, value)) = &evicted {
            trace!("evicted least recently used cache entry");
            if let Some(listener) = &self.listener {
                listener(key, value);
            }
        }
        evicted
    }

    /// Look up `key` without touching recency or statistics
    pub fn peek<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let state = self.state.lock();
        state
            .index
            .get(key)
            .map(|&idx| state.nodes[idx].value.clone())
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.state.lock().index.contains_key(key)
    }

    /// Remove `key`, returning its value
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut state = self.state.lock();
        let idx = state.index.get(key).copied()?;
        Some(state.remove_at(idx).1)
    }

    pub fn len(&self) -> usize {
        self.state.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every entry; statistics are kept
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.index.clear();
        state.nodes.clear();
        state.head = NIL;
        state.tail = NIL;
    }

    /// Keys from most to least recently used
    pub fn keys_by_recency(&self) -> Vec<K> {
        let state = self.state.lock();
        let mut keys = Vec::with_capacity(state.nodes.len());
        let mut cursor = state.head;
        while cursor != NIL {
            let node = &state.nodes[cursor];
            keys.push(node.key.clone());
            cursor = node.next;
        }
        keys
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            len: state.nodes.len(),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_get_promotes_and_evicts_lru() {
        let cache = LruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.get("a"), Some(1));

        assert_eq!(cache.put("c", 3), Some(("b", 2)));
        assert!(cache.contains("a"));
        assert!(cache.contains("c"));
        assert!(!cache.contains("b"));
        assert_eq!(cache.keys_by_recency(), vec!["c", "a"]);
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = LruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);

        assert_eq!(cache.put("a", 10), None);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.peek("a"), Some(10));
        // Overwrite made "a" most recent, so "b" goes next
        assert_eq!(cache.put("c", 3), Some(("b", 2)));
    }

    #[test]
    fn test_peek_does_not_promote() {
        let cache = LruCache::new(2);
        cache.put(1, "one");
        cache.put(2, "two");

        assert_eq!(cache.peek(&1), Some("one"));
        assert_eq!(cache.put(3, "three"), Some((1, "one")));
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_remove_keeps_links_consistent() {
        let cache = LruCache::new(4);
        for key in 0..4 {
            cache.put(key, key * 10);
        }
        // Removing from the middle moves the last slot into the hole
        assert_eq!(cache.remove(&1), Some(10));
        assert_eq!(cache.remove(&1), None);
        assert_eq!(cache.keys_by_recency(), vec![3, 2, 0]);

        assert_eq!(cache.get(&0), Some(0));
        assert_eq!(cache.keys_by_recency(), vec![0, 3, 2]);

        cache.put(4, 40);
        assert_eq!(cache.put(5, 50), Some((2, 20)));
        assert_eq!(cache.keys_by_recency(), vec![5, 4, 0, 3]);
    }

    #[test]
    fn test_matches_reference_model() {
        let capacity = 5;
        let cache = LruCache::new(capacity);
        // Front is most recent
        let mut model: Vec<u32> = Vec::new();

        let mut seed: u32 = 7;
        for _ in 0..2_000 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let key = (seed >> 16) % 12;

            if seed % 3 == 0 {
                let hit = cache.get(&key).is_some();
                assert_eq!(hit, model.contains(&key));
                if hit {
                    model.retain(|k| *k != key);
                    model.insert(0, key);
                }
            } else {
                let evicted = cache.put(key, key);
                if let Some(pos) = model.iter().position(|k| *k == key) {
                    model.remove(pos);
                    assert_eq!(evicted, None);
                } else if model.len() == capacity {
                    let lru = model.pop();
                    assert_eq!(evicted.map(|(k, _)| k), lru);
                }
                model.insert(0, key);
            }

            assert!(cache.len() <= capacity);
            assert_eq!(cache.keys_by_recency(), model);
        }
    }

    #[test]
    fn test_eviction_listener() {
        let evicted = Arc::new(AtomicUsize::new(0));
        let counter = evicted.clone();
        let cache = LruCache::new(1).with_eviction_listener(move |_k: &&str, _v: &i32| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        cache.put("a", 1);
        cache.put("a", 2);
        assert_eq!(evicted.load(Ordering::SeqCst), 0);

        cache.put("b", 3);
        cache.remove("b");
        assert_eq!(evicted.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_stats_and_clear() {
        let cache = LruCache::new(3);
        cache.put("x", 1);
        assert_eq!(cache.get("x"), Some(1));
        assert_eq!(cache.get("y"), None);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.len), (1, 1, 1));
        assert_eq!(stats.hit_rate(), 0.5);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get("x"), None);
        assert_eq!(cache.capacity(), 3);
    }

    #[test]
    fn test_concurrent_access_respects_capacity() {
        let cache = LruCache::new(16);
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..1_000u64 {
                        let key = (t * 1_000 + i) % 64;
                        cache.put(key, i);
                        cache.get(&((key + 1) % 64));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert!(cache.len() <= 16);
        assert_eq!(cache.keys_by_recency().len(), cache.len());
    }
}
