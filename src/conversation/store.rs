//! In-memory key/value store whose entries expire after inactivity.
//!
//! Each entry records when it was last touched and its own TTL. Expired
//! entries are invisible to readers even before a sweep removes them.
//! Individual operations are atomic; sequences of them are not.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

struct Entry<V> {
    value: V,
    touched_at: Instant,
    ttl: Duration,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.touched_at) >= self.ttl
    }

    fn remaining(&self, now: Instant) -> Duration {
        self.ttl
            .saturating_sub(now.saturating_duration_since(self.touched_at))
    }
}

/// Time-bounded map.
pub struct StateStore<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
    ttl: Duration,
    extend_on_read: bool,
}

impl<K, V> StateStore<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Store with the given default TTL. Reads refresh expiry.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            extend_on_read: true,
        }
    }

    /// Whether a successful read resets the entry's expiry.
    pub fn with_extend_on_read(mut self, extend: bool) -> Self {
        self.extend_on_read = extend;
        self
    }

    /// Default TTL for new entries.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live value for `key`. Drops the entry if it has expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut map = self.entries.lock().ok()?;
        let now = Instant::now();
        let entry = map.get_mut(key)?;
        if entry.is_expired(now) {
            map.remove(key);
            return None;
        }
        if self.extend_on_read {
            entry.touched_at = now;
        }
        Some(entry.value.clone())
    }

    /// True if a live entry exists. Counts as a read.
    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Insert or overwrite with the default TTL.
    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.ttl);
    }

    /// Insert or overwrite with a specific TTL.
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        if let Ok(mut map) = self.entries.lock() {
            map.insert(
                key,
                Entry {
                    value,
                    touched_at: Instant::now(),
                    ttl,
                },
            );
        }
    }

    /// Remove an entry, returning its value if it was still live.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut map = self.entries.lock().ok()?;
        let entry = map.remove(key)?;
        (!entry.is_expired(Instant::now())).then_some(entry.value)
    }

    /// Time left before `key` expires, if it is live. Does not refresh it.
    pub fn expires_in(&self, key: &K) -> Option<Duration> {
        let map = self.entries.lock().ok()?;
        let now = Instant::now();
        map.get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.remaining(now))
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let Ok(mut map) = self.entries.lock() else {
            return 0;
        };
        let now = Instant::now();
        let before = map.len();
        map.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(map.len())
    }

    /// Stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(map) => map.len(),
            Err(_) => 0,
        }
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove everything.
    pub fn clear(&self) {
        if let Ok(mut map) = self.entries.lock() {
            map.clear();
        }
    }
}
