use std::hash::Hash;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// Time-boxed read cache. Entries are only ever invalidated by expiry.
///
/// The clock is `tokio::time::Instant`, so tests can drive expiry with
/// `tokio::time::pause()` and `advance()`.
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: DashMap<K, (Instant, V)>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Live value for `key`. An expired entry is dropped on the way out.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            let (expires_at, value) = entry.value();
            if now < *expires_at {
                return Some(value.clone());
            }
        }
        self.entries.remove_if(key, |_, (expires_at, _)| now >= *expires_at);
        None
    }

    /// Store `value` for one TTL. Expired entries under other keys are
    /// swept first, so keys that are never read again do not pile up.
    pub fn insert(&self, key: K, value: V) {
        self.purge_expired();
        self.entries.insert(key, (Instant::now() + self.ttl, value));
    }

    /// Drop every expired entry. Returns how many were removed.
    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (expires_at, _)| now < *expires_at);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
