// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Best-effort key/value cache used for conversation history and
//! finished execution contexts.
//!
//! Callers must treat every read as optional: a miss falls back to the
//! catalog and a failed write is ignored.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use crate::config::ResolvedCacheConfig;

/// A cache backend.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Option<Value>;

    /// Store a value. `None` uses the backend's default TTL.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>);

    async fn delete(&self, key: &str) -> bool;
}

struct CacheEntry {
    value: Value,
    expires_at: Instant,
    last_access: Instant,
}

/// In-process cache with per-entry TTL and LRU eviction.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    capacity: usize,
    default_ttl: Duration,
}

impl MemoryCache {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            default_ttl,
        }
    }

    pub fn from_config(config: &ResolvedCacheConfig) -> Self {
        Self::new(config.capacity, Duration::from_secs(config.ttl_secs))
    }

    /// Live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.lock();
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.last_access = now;
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let mut entries = self.lock();
        let now = Instant::now();

        if !entries.contains_key(key) && entries.len() >= self.capacity {
            entries.retain(|_, e| e.expires_at > now);
            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.last_access)
                    .map(|(k, _)| k.clone());
                if let Some(k) = oldest {
                    entries.remove(&k);
                }
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl.unwrap_or(self.default_ttl),
                last_access: now,
            },
        );
    }

    async fn delete(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }
}

/// Cache key for a conversation's recent history.
pub fn history_key(conversation_id: &str) -> String {
    format!("history:{conversation_id}")
}

/// Cache key for a finished execution context.
pub fn context_key(execution_id: &str) -> String {
    format!("context:{execution_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_set_delete() {
        let cache = MemoryCache::new(10, Duration::from_secs(60));
        assert!(cache.get("k").await.is_none());

        cache.set("k", json!({"a": 1}), None).await;
        assert_eq!(cache.get("k").await, Some(json!({"a": 1})));
        assert_eq!(cache.len(), 1);

        assert!(cache.delete("k").await);
        assert!(!cache.delete("k").await);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_expired_entries_miss() {
        let cache = MemoryCache::new(10, Duration::from_secs(60));
        cache.set("k", json!(1), Some(Duration::from_millis(10))).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_evicts_least_recently_used() {
        let cache = MemoryCache::new(2, Duration::from_secs(60));
        cache.set("a", json!(1), None).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.set("b", json!(2), None).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.get("a").await;
        cache.set("c", json!(3), None).await;

        assert!(cache.get("a").await.is_some());
        assert!(cache.get("b").await.is_none());
        assert!(cache.get("c").await.is_some());
    }

    #[test]
    fn test_keys() {
        assert_eq!(history_key("c1"), "history:c1");
        assert_eq!(context_key("e1"), "context:e1");
    }
}
