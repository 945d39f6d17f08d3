//! A [LruMemoryCache] is an Lru cache of decoded images which uses the cost of the items in the cache to decide when
//! to evict.
use std::sync::{Arc, Mutex};

use ahash::RandomState;
use lru::LruCache;

use crate::*;

#[derive(Debug, Clone, derive_builder::Builder)]
pub struct MemoryCacheConfig {
    /// Maximum total cost, usually bytes of pixel data.
    pub max_cost: u64,
    /// Items costlier than this are never kept.
    #[builder(default = "u64::MAX")]
    pub max_single_object_cost: u64,
}

struct Entry<V> {
    value: Arc<V>,
    cost: u64,
}

struct State<V> {
    entries: LruCache<String, Entry<V>, RandomState>,
    current_cost: u64,
}

pub struct LruMemoryCache<V> {
    config: MemoryCacheConfig,
    state: Mutex<State<V>>,
}

impl<V: EstimateCost> LruMemoryCache<V> {
    pub fn new(config: MemoryCacheConfig) -> LruMemoryCache<V> {
        LruMemoryCache {
            config,
            state: Mutex::new(State {
                entries: LruCache::unbounded_with_hasher(RandomState::new()),
                current_cost: 0,
            }),
        }
    }

    /// Total cost of everything currently cached.
    pub fn current_cost(&self) -> u64 {
        self.state.lock().unwrap().current_cost
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&self, key: &str) -> Option<Arc<V>> {
        let mut guard = self.state.lock().unwrap();
        let old = guard.entries.pop(key)?;
        guard.current_cost -= old.cost;
        Some(old.value)
    }
}

impl<V> State<V> {
    fn evict_to(&mut self, max_cost: u64) {
        while self.current_cost > max_cost {
            match self.entries.pop_lru() {
                Some((_, e)) => self.current_cost -= e.cost,
                None => panic!("Not enough entries to explain cost"),
            }
        }
    }
}

impl<V: EstimateCost + Send + Sync> MemoryCache<V> for LruMemoryCache<V> {
    fn get(&self, key: &str) -> Option<Arc<V>> {
        self.state
            .lock()
            .unwrap()
            .entries
            .get(key)
            .map(|e| e.value.clone())
    }

    fn set(&self, key: String, value: Arc<V>) {
        let cost = value.estimate_cost();
        let mut guard = self.state.lock().unwrap();
        if let Some(old) = guard.entries.pop(&key) {
            guard.current_cost -= old.cost;
        }
        if cost > self.config.max_single_object_cost {
            return;
        }

        guard.entries.put(key, Entry { value, cost });
        guard.current_cost += cost;
        guard.evict_to(self.config.max_cost);
    }

    fn clear(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.entries.clear();
        guard.current_cost = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    impl EstimateCost for u64 {
        fn estimate_cost(&self) -> u64 {
            *self
        }
    }

    fn build_cache(max_cost: u64) -> LruMemoryCache<u64> {
        LruMemoryCache::new(
            MemoryCacheConfigBuilder::default()
                .max_cost(max_cost)
                .max_single_object_cost(6)
                .build()
                .expect("Should build"),
        )
    }

    #[test]
    fn test_eviction() {
        let cache = build_cache(10);
        for i in 1..=5u64 {
            cache.set(i.to_string(), Arc::new(i));
        }

        // 5 + 4 fit, 3 would push us to 12.
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.current_cost(), 9);
        assert_eq!(cache.get("5").as_deref(), Some(&5));
        assert_eq!(cache.get("4").as_deref(), Some(&4));
        assert!(cache.get("3").is_none());
    }

    #[test]
    fn test_get_refreshes_recency() {
        let cache = build_cache(10);
        cache.set("a".into(), Arc::new(4));
        cache.set("b".into(), Arc::new(4));
        cache.get("a");
        cache.set("c".into(), Arc::new(4));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn test_single_object_limit() {
        let cache = build_cache(100);
        cache.set("big".into(), Arc::new(7));
        assert!(cache.get("big").is_none());
        assert_eq!(cache.current_cost(), 0);

        // Replacing with something too big drops the old entry too.
        cache.set("k".into(), Arc::new(3));
        cache.set("k".into(), Arc::new(9));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_and_remove() {
        let cache = build_cache(100);
        cache.set("a".into(), Arc::new(1));
        cache.set("b".into(), Arc::new(2));
        assert_eq!(cache.remove("a").as_deref(), Some(&1));
        assert_eq!(cache.current_cost(), 2);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.current_cost(), 0);
    }

    proptest! {
        #[test]
        fn test_cost_is_bounded_and_tracked(
            ops in prop::collection::vec((0..20u64, 0..7u64), 0..500)
        ) {
            let cache = build_cache(25);
            for (k, v) in ops {
                cache.set(k.to_string(), Arc::new(v));
                prop_assert!(cache.current_cost() <= 25);
            }
            let state = cache.state.lock().unwrap();
            let sum: u64 = state.entries.iter().map(|(_, e)| e.cost).sum();
            prop_assert_eq!(sum, state.current_cost);
        }
    }
}
