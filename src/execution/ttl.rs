//! Time-to-live caches.
//!
//! Entries carry their insertion instant and are checked at read time;
//! nothing is evicted in the background. Uses the tokio clock so paused
//! test time applies.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// A single cached value.
#[derive(Debug)]
pub struct TtlCell<T> {
    ttl: Duration,
    slot: Mutex<Option<(Instant, T)>>,
}

impl<T: Clone> TtlCell<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// The cached value, if still fresh.
    pub fn get(&self) -> Option<T> {
        let slot = self.slot.lock().ok()?;
        match slot.as_ref() {
            Some((at, value)) if at.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    pub fn set(&self, value: T) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some((Instant::now(), value));
        }
    }
}

/// Keyed cache with a shared lifetime.
#[derive(Debug)]
pub struct TtlMap<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K: Eq + Hash, V: Clone> TtlMap<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.lock().ok()?;
        match entries.get(key) {
            Some((at, value)) if at.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, (Instant::now(), value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_cell_expires() {
        let cell = TtlCell::new(Duration::from_secs(60));
        assert_eq!(cell.get(), None);

        cell.set(true);
        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cell.get(), Some(true));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cell.get(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_map_entries_expire_independently() {
        let map = TtlMap::new(Duration::from_secs(10));
        map.insert("A", 1);
        tokio::time::advance(Duration::from_secs(6)).await;
        map.insert("B", 2);
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(map.get(&"A"), None);
        assert_eq!(map.get(&"B"), Some(2));
    }
}
