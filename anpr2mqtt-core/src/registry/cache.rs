use lru::LruCache;
use parking_lot::RwLock;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
struct CacheEntry {
    response: Value,
    timestamp: u64,
    ttl: u64,
}

/// Successful registry responses, bounded by count and age
pub struct LookupCache {
    cache: RwLock<LruCache<String, CacheEntry>>,
}

impl LookupCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: RwLock::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let mut cache = self.cache.write();
        let entry = cache.get(key)?;

        let now = now_secs();
        // Clock went backwards
        if entry.timestamp > now {
            cache.pop(key);
            return None;
        }
        if now.saturating_sub(entry.timestamp) < entry.ttl {
            Some(entry.response.clone())
        } else {
            cache.pop(key);
            None
        }
    }

    pub fn set(&self, key: &str, response: Value, ttl: u64) {
        if ttl == 0 {
            return;
        }
        let entry = CacheEntry {
            response,
            timestamp: now_secs(),
            ttl,
        };
        self.cache.write().put(key.to_string(), entry);
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    pub fn clear(&self) {
        self.cache.write().clear();
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_set() {
        let cache = LookupCache::new(10);
        assert!(cache.get("AB12CDE").is_none());
        cache.set("AB12CDE", json!({"make": "FORD"}), 60);
        assert_eq!(cache.get("AB12CDE"), Some(json!({"make": "FORD"})));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_ttl_not_cached() {
        let cache = LookupCache::new(10);
        cache.set("AB12CDE", json!({}), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_least_recently_used_evicted() {
        let cache = LookupCache::new(2);
        cache.set("A1", json!(1), 60);
        cache.set("B2", json!(2), 60);
        assert!(cache.get("A1").is_some());
        cache.set("C3", json!(3), 60);
        assert!(cache.get("B2").is_none());
        assert!(cache.get("A1").is_some());
        assert!(cache.get("C3").is_some());
    }

    #[test]
    fn test_clear() {
        let cache = LookupCache::new(4);
        cache.set("A1", json!(1), 60);
        cache.clear();
        assert!(cache.get("A1").is_none());
    }
}
