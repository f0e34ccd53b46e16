//! In-memory translation cache keyed by source text.
//! Capacity-bounded, evicts the oldest-inserted entry. Lookups never promote;
//! re-inserting a key moves it to the newest position.

use std::num::NonZeroUsize;

use lru::LruCache;

pub struct TranslationCache {
    inner: LruCache<String, String>,
}

impl TranslationCache {
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: LruCache::new(capacity),
        }
    }

    /// Cached translation for `key`. Does not affect eviction order.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.peek(key).map(String::as_str)
    }

    /// Insert or refresh. When full, the oldest-inserted entry is dropped first.
    pub fn put(&mut self, key: String, value: String) {
        // `put` alone would update in place and only promote; pop first so the
        // refreshed entry is indistinguishable from a fresh insertion.
        self.inner.pop(&key);
        self.inner.put(key, value);
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn size(&self) -> usize {
        self.inner.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.cap().get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize, count: usize) -> TranslationCache {
        let mut cache = TranslationCache::new(capacity);
        for i in 0..count {
            cache.put(format!("k{i}"), format!("v{i}"));
        }
        cache
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let mut cache = TranslationCache::new(4);
        for i in 0..50 {
            cache.put(format!("k{i}"), "v".into());
            assert!(cache.size() <= 4);
        }
        assert_eq!(cache.size(), 4);
    }

    #[test]
    fn oldest_k_entries_are_evicted() {
        let cache = filled(5, 8);
        for i in 0..3 {
            assert!(cache.get(&format!("k{i}")).is_none(), "k{i} should be evicted");
        }
        for i in 3..8 {
            assert_eq!(cache.get(&format!("k{i}")), Some(format!("v{i}").as_str()));
        }
    }

    #[test]
    fn hit_does_not_promote() {
        let mut cache = filled(3, 3);
        assert_eq!(cache.get("k0"), Some("v0"));
        cache.put("k3".into(), "v3".into());
        assert!(cache.get("k0").is_none());
        assert!(cache.get("k1").is_some());
    }

    #[test]
    fn reinsert_refreshes_to_newest() {
        let mut cache = filled(3, 3);
        cache.put("k0".into(), "v0b".into());
        cache.put("k3".into(), "v3".into());
        assert_eq!(cache.get("k0"), Some("v0b"));
        assert!(cache.get("k1").is_none());
        assert_eq!(cache.size(), 3);
    }

    #[test]
    fn clear_empties_everything() {
        let mut cache = filled(3, 2);
        cache.clear();
        assert_eq!(cache.size(), 0);
        assert!(cache.get("k0").is_none());
    }

    #[test]
    fn zero_capacity_is_bumped() {
        let mut cache = TranslationCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.put("a".into(), "b".into());
        assert_eq!(cache.size(), 1);
    }
}
