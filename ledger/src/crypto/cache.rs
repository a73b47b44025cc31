//! # Bounded Memo Cache
//!
//! LRU cache for digest and Merkle-root computations, keyed by a
//! domain-separated digest of the canonical input. This replaces the
//! unbounded process-wide memoization the original deployment grew —
//! an implicit cache with no eviction is a slow memory leak wearing a
//! performance-optimization costume.
//!
//! ## Recency tracking
//!
//! Recency is a `VecDeque` of `(key, stamp)` pairs alongside the value map.
//! Every access pushes a fresh stamped pair to the back instead of splicing
//! the old one out of the middle (which would be O(n) per hit). Stale pairs
//! — "ghosts" whose stamp no longer matches the map entry — are discarded
//! when they surface at the front during eviction. The queue can therefore
//! transiently hold more pairs than the map holds entries; it is bounded at
//! a small multiple of capacity by a compaction pass.

use std::collections::HashMap;
use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::crypto::hash::Digest;

/// Ghost pairs tolerated per live entry before the recency queue is
/// compacted. 4x keeps compaction rare without letting the queue balloon.
const GHOST_FACTOR: usize = 4;

#[derive(Debug)]
struct CachedValue {
    value: String,
    stamp: u64,
}

#[derive(Debug)]
struct MemoInner {
    entries: HashMap<Digest, CachedValue>,
    recency: VecDeque<(Digest, u64)>,
    next_stamp: u64,
}

/// A thread-safe, size-bounded LRU cache from input digests to hex results.
#[derive(Debug)]
pub struct MemoCache {
    inner: Mutex<MemoInner>,
    capacity: usize,
}

impl MemoCache {
    /// Creates a cache holding at most `capacity` entries. A capacity of 0
    /// disables caching entirely (every lookup recomputes).
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(MemoInner {
                entries: HashMap::with_capacity(capacity.min(1024)),
                recency: VecDeque::with_capacity(capacity.min(1024)),
                next_stamp: 0,
            }),
            capacity,
        }
    }

    /// Returns the cached value for `key`, computing and inserting it via
    /// `compute` on a miss. The entry becomes most-recently-used either way.
    pub fn get_or_insert_with<F>(&self, key: Digest, compute: F) -> String
    where
        F: FnOnce() -> String,
    {
        if self.capacity == 0 {
            return compute();
        }

        let mut inner = self.inner.lock();

        let stamp = inner.next_stamp;
        inner.next_stamp += 1;

        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.stamp = stamp;
            let value = entry.value.clone();
            inner.recency.push_back((key, stamp));
            self.maintain(&mut inner);
            return value;
        }

        let value = compute();
        inner.entries.insert(
            key,
            CachedValue {
                value: value.clone(),
                stamp,
            },
        );
        inner.recency.push_back((key, stamp));
        self.maintain(&mut inner);
        value
    }

    /// Current number of live entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// True when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evicts past capacity and compacts the recency queue when ghosts
    /// dominate it.
    fn maintain(&self, inner: &mut MemoInner) {
        // Evict least-recently-used entries. Ghost pairs at the front are
        // discarded without touching the map.
        while inner.entries.len() > self.capacity {
            let Some((key, stamp)) = inner.recency.pop_front() else {
                break;
            };
            let is_live = inner
                .entries
                .get(&key)
                .map(|e| e.stamp == stamp)
                .unwrap_or(false);
            if is_live {
                inner.entries.remove(&key);
            }
        }

        // Compact when the queue is mostly ghosts.
        if inner.recency.len() > self.capacity.saturating_mul(GHOST_FACTOR).max(16) {
            let entries = &inner.entries;
            inner
                .recency
                .retain(|(key, stamp)| entries.get(key).map(|e| e.stamp == *stamp).unwrap_or(false));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(n: u8) -> Digest {
        let mut k = [0u8; 32];
        k[0] = n;
        k
    }

    #[test]
    fn hit_skips_recompute() {
        let cache = MemoCache::new(8);
        let computes = AtomicUsize::new(0);

        let compute = || {
            computes.fetch_add(1, Ordering::SeqCst);
            "value".to_string()
        };

        assert_eq!(cache.get_or_insert_with(key(1), compute), "value");
        assert_eq!(
            cache.get_or_insert_with(key(1), || unreachable!("must hit the cache")),
            "value"
        );
        assert_eq!(computes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn capacity_is_enforced() {
        let cache = MemoCache::new(4);
        for i in 0..32 {
            cache.get_or_insert_with(key(i), || format!("v{}", i));
        }
        assert!(cache.len() <= 4);
    }

    #[test]
    fn least_recently_used_is_evicted_first() {
        let cache = MemoCache::new(2);
        cache.get_or_insert_with(key(1), || "one".into());
        cache.get_or_insert_with(key(2), || "two".into());

        // Touch key 1 so key 2 becomes the LRU entry.
        cache.get_or_insert_with(key(1), || unreachable!());
        cache.get_or_insert_with(key(3), || "three".into());

        // Key 1 must have survived; key 2 must recompute.
        cache.get_or_insert_with(key(1), || unreachable!("key 1 was evicted"));
        let recomputed = cache.get_or_insert_with(key(2), || "two-again".into());
        assert_eq!(recomputed, "two-again");
    }

    #[test]
    fn zero_capacity_disables_caching() {
        let cache = MemoCache::new(0);
        let computes = AtomicUsize::new(0);
        for _ in 0..3 {
            cache.get_or_insert_with(key(7), || {
                computes.fetch_add(1, Ordering::SeqCst);
                "v".into()
            });
        }
        assert_eq!(computes.load(Ordering::SeqCst), 3);
        assert!(cache.is_empty());
    }

    #[test]
    fn ghost_pairs_do_not_break_eviction() {
        let cache = MemoCache::new(2);
        // Hammer the same key to pile up ghosts, then force evictions.
        for _ in 0..64 {
            cache.get_or_insert_with(key(1), || "one".into());
        }
        cache.get_or_insert_with(key(2), || "two".into());
        cache.get_or_insert_with(key(3), || "three".into());
        assert!(cache.len() <= 2);
        // Keys 2 and 3 were touched after key 1; both must be resident.
        cache.get_or_insert_with(key(2), || unreachable!("key 2 was evicted"));
        cache.get_or_insert_with(key(3), || unreachable!("key 3 was evicted"));
    }
}
