//! Bounded TTL cache for inbound message-id deduplication.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Bounded, TTL-expiring dedup store. Keys are marked *before* dispatch to
/// close the race window; a failed dispatch unmarks so the gateway's retry
/// can land.
pub struct DedupCache {
    capacity: usize,
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl DedupCache {
    /// Create a cache holding at most `capacity` keys for `ttl`.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Mark `key` as seen. Returns `false` when the key is already present
    /// (a duplicate), `true` when this call marked it.
    pub fn check_and_mark(&self, key: &str) -> bool {
        let now = Instant::now();
        let Ok(mut entries) = self.entries.lock() else {
            return true;
        };

        if let Some(seen_at) = entries.get(key) {
            if now.duration_since(*seen_at) < self.ttl {
                return false;
            }
        }

        entries.insert(key.to_owned(), now);
        if entries.len() > self.capacity {
            Self::evict(&mut entries, self.capacity, self.ttl, now);
        }
        true
    }

    /// Remove a key so the message can be retried.
    pub fn unmark(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict(entries: &mut HashMap<String, Instant>, capacity: usize, ttl: Duration, now: Instant) {
        entries.retain(|_, seen_at| now.duration_since(*seen_at) < ttl);
        if entries.len() <= capacity {
            return;
        }
        // Still over: drop oldest entries until back under the bound.
        let mut by_age: Vec<(String, Instant)> =
            entries.iter().map(|(k, v)| (k.clone(), *v)).collect();
        by_age.sort_by_key(|(_, at)| *at);
        let excess = entries.len().saturating_sub(capacity);
        for (key, _) in by_age.into_iter().take(excess) {
            entries.remove(&key);
        }
        debug!(excess, "dedup cache evicted oldest entries");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_mark_succeeds_second_is_duplicate() {
        let cache = DedupCache::new(10, DEFAULT_TTL);
        assert!(cache.check_and_mark("10"));
        assert!(!cache.check_and_mark("10"));
    }

    #[test]
    fn unmark_allows_retry() {
        let cache = DedupCache::new(10, DEFAULT_TTL);
        assert!(cache.check_and_mark("10"));
        cache.unmark("10");
        assert!(cache.check_and_mark("10"));
    }

    #[test]
    fn expired_entries_rearm() {
        let cache = DedupCache::new(10, Duration::from_millis(0));
        assert!(cache.check_and_mark("10"));
        // Zero TTL: the entry is expired on the very next check.
        assert!(cache.check_and_mark("10"));
    }

    #[test]
    fn capacity_bound_holds() {
        let cache = DedupCache::new(100, DEFAULT_TTL);
        for i in 0..250 {
            assert!(cache.check_and_mark(&i.to_string()));
        }
        assert!(cache.len() <= 100);
        // Recent keys survive eviction.
        assert!(!cache.check_and_mark("249"));
    }
}
