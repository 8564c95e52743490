//! In-memory TTL cache with least-recently-used eviction.

use quant_core::signals::{EnsembleModel, ModelKey, ModelStore};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

struct Entry<V> {
    value: V,
    expires_at: Instant,
    last_used: u64,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    clock: u64,
}

/// Fixed-TTL, bounded-capacity cache shared between request handlers.
///
/// Expiry uses `tokio::time::Instant`, so it follows a paused test clock.
pub struct TtlStore<K, V> {
    ttl: Duration,
    capacity: usize,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> std::fmt::Debug for TtlStore<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlStore")
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> TtlStore<K, V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                clock: 0,
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        // Entries stay consistent even if a holder panicked.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clone of a live entry; refreshes its recency.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.clock += 1;
        let tick = inner.clock;

        let expired = inner.entries.get(key).is_some_and(|e| e.expires_at <= now);
        if expired {
            inner.entries.remove(key);
            return None;
        }
        inner.entries.get_mut(key).map(|entry| {
            entry.last_used = tick;
            entry.value.clone()
        })
    }

    pub fn insert(&self, key: K, value: V) {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.clock += 1;
        let tick = inner.clock;

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.capacity {
            inner.entries.retain(|_, e| e.expires_at > now);
            if inner.entries.len() >= self.capacity {
                let oldest = inner
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.last_used)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    inner.entries.remove(&oldest);
                }
            }
        }

        inner.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + self.ttl,
                last_used: tick,
            },
        );
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().entries.remove(key).map(|e| e.value)
    }

    /// Entries currently held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ModelStore for TtlStore<ModelKey, Arc<EnsembleModel>> {
    fn get(&self, key: &ModelKey) -> Option<Arc<EnsembleModel>> {
        TtlStore::get(self, key)
    }

    fn put(&self, key: ModelKey, model: Arc<EnsembleModel>) {
        self.insert(key, model);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let store: TtlStore<String, u32> = TtlStore::new(Duration::from_secs(60), 8);
        store.insert("AAPL".into(), 1);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(store.get(&"AAPL".into()), Some(1));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get(&"AAPL".into()), None);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicts_least_recently_used() {
        let store: TtlStore<&str, u32> = TtlStore::new(Duration::from_secs(60), 2);
        store.insert("a", 1);
        store.insert("b", 2);
        assert_eq!(store.get(&"a"), Some(1));

        store.insert("c", 3);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&"b"), None);
        assert_eq!(store.get(&"a"), Some(1));
        assert_eq!(store.get(&"c"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purges_expired_before_evicting() {
        let store: TtlStore<&str, u32> = TtlStore::new(Duration::from_secs(10), 2);
        store.insert("old", 1);
        tokio::time::advance(Duration::from_secs(5)).await;
        store.insert("fresh", 2);
        assert_eq!(store.get(&"old"), Some(1));

        tokio::time::advance(Duration::from_secs(6)).await;
        store.insert("new", 3);
        // "old" was used last but has expired, so it goes instead of "fresh"
        assert_eq!(store.get(&"fresh"), Some(2));
        assert_eq!(store.get(&"new"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reinsert_refreshes_ttl() {
        let store: TtlStore<&str, u32> = TtlStore::new(Duration::from_secs(10), 4);
        store.insert("k", 1);
        tokio::time::advance(Duration::from_secs(8)).await;
        store.insert("k", 2);
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(store.get(&"k"), Some(2));
        assert_eq!(store.remove(&"k"), Some(2));
        assert!(store.is_empty());
    }
}
