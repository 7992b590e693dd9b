//! Shared key-value store for ephemeral gateway state.
//!
//! Rate-limit counters and the access-token blacklist go through the
//! [`KvStore`] trait so the backing store can be swapped for a networked one
//! when gateway replicas need to share state. The in-memory implementation
//! keeps entries in a [`DashMap`] with lazy TTL expiry.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Minimal contract for counters and TTL'd flags.
pub trait KvStore: Send + Sync {
    /// Atomically increment `key`, creating it with the given TTL on first
    /// use. Returns the post-increment count.
    fn incr(&self, key: &str, ttl: Duration) -> u64;

    /// Current count for `key`, 0 if absent or expired.
    fn get_count(&self, key: &str) -> u64;

    /// Set a flag that disappears after `ttl`.
    fn put_with_ttl(&self, key: &str, ttl: Duration);

    /// Whether a live (non-expired) entry exists for `key`.
    fn exists(&self, key: &str) -> bool;
}

struct Entry {
    count: u64,
    expires_at: Instant,
}

/// In-memory TTL store. Suitable for a single gateway process; replicas
/// should point this trait at a shared store instead.
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<DashMap<String, Entry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_entry(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        // Read guard must drop before the remove below.
        let (live, count) = match self.entries.get(key) {
            Some(entry) => (entry.expires_at > now, entry.count),
            None => return None,
        };
        if live {
            Some(count)
        } else {
            self.entries.remove(key);
            None
        }
    }
}

impl KvStore for MemoryKvStore {
    fn incr(&self, key: &str, ttl: Duration) -> u64 {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            count: 0,
            expires_at: now + ttl,
        });
        if entry.expires_at <= now {
            entry.count = 0;
            entry.expires_at = now + ttl;
        }
        entry.count += 1;
        entry.count
    }

    fn get_count(&self, key: &str) -> u64 {
        self.live_entry(key).unwrap_or(0)
    }

    fn put_with_ttl(&self, key: &str, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            Entry {
                count: 1,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    fn exists(&self, key: &str) -> bool {
        self.live_entry(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incr_counts_up() {
        let kv = MemoryKvStore::new();
        assert_eq!(kv.incr("a", Duration::from_secs(60)), 1);
        assert_eq!(kv.incr("a", Duration::from_secs(60)), 2);
        assert_eq!(kv.get_count("a"), 2);
        assert_eq!(kv.get_count("b"), 0);
    }

    #[test]
    fn expired_entries_reset() {
        let kv = MemoryKvStore::new();
        kv.incr("a", Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(kv.get_count("a"), 0);
        assert_eq!(kv.incr("a", Duration::from_secs(60)), 1);
    }

    #[test]
    fn ttl_flags() {
        let kv = MemoryKvStore::new();
        kv.put_with_ttl("token:abc", Duration::from_secs(60));
        assert!(kv.exists("token:abc"));
        assert!(!kv.exists("token:def"));

        kv.put_with_ttl("token:gone", Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(!kv.exists("token:gone"));
    }
}
