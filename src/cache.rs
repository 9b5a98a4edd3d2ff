//! Bounded TTL cache with lazy, on-read expiry
//!
//! There is no background sweep. Expired entries are dropped when they are
//! read or when `purge_expired` is called; when the cache is full the oldest
//! entry is evicted before inserting.

use std::hash::Hash;
use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Clone, Debug)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    hit_count: usize,
}

pub struct TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    entries: DashMap<K, CacheEntry<V>>,
    ttl: Duration,
    max_entries: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut entry = self.entries.get_mut(key)?;

        if entry.created_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(key);
            return None;
        }

        entry.hit_count += 1;
        Some(entry.value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.purge_expired();
            if self.entries.len() >= self.max_entries {
                self.evict_oldest();
            }
        }

        self.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: Instant::now(),
                hit_count: 0,
            },
        );
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.created_at.elapsed() <= ttl);
        before - self.entries.len()
    }

    /// Total hits across live entries
    pub fn total_hits(&self) -> usize {
        self.entries.iter().map(|e| e.value().hit_count).sum()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().created_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_and_hits() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(60), 10);
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"missing".to_string()), None);
        assert_eq!(cache.total_hits(), 2);
    }

    #[test]
    fn test_expired_entries_are_dropped_on_read() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::ZERO, 10);
        cache.insert(1, 10);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(cache.get(&1), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_secs(60), 2);
        cache.insert(1, 10);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(2, 20);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(3, 30);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&3), Some(30));
    }

    #[test]
    fn test_reinserting_existing_key_does_not_evict() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_secs(60), 2);
        cache.insert(1, 10);
        cache.insert(2, 20);
        cache.insert(2, 21);
        assert_eq!(cache.get(&1), Some(10));
        assert_eq!(cache.get(&2), Some(21));
    }
}
