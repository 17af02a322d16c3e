// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! LRU cache of agent configurations in front of the catalog.

use std::collections::HashMap;
use std::sync::Mutex;

#[cfg(feature = "telemetry")]
use tracing::debug;

use crate::catalog::{AgentConfig, SharedCatalog};
use crate::error::ExecutionError;

struct CachedAgent {
    config: AgentConfig,
    last_used: u64,
}

struct Inner {
    entries: HashMap<String, CachedAgent>,
    tick: u64,
}

pub struct AgentConfigCache {
    catalog: SharedCatalog,
    inner: Mutex<Inner>,
    capacity: usize,
}

impl AgentConfigCache {
    pub fn new(catalog: SharedCatalog, capacity: usize) -> Self {
        Self {
            catalog,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                tick: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Agent configuration, loaded from the catalog on a miss.
    pub async fn get(&self, agent_id: &str) -> Result<AgentConfig, ExecutionError> {
        {
            let mut inner = self.lock();
            inner.tick += 1;
            let tick = inner.tick;
            if let Some(cached) = inner.entries.get_mut(agent_id) {
                cached.last_used = tick;
                return Ok(cached.config.clone());
            }
        }

        let config = {
            let store = self.catalog.lock().await;
            store
                .get_agent(agent_id)?
                .ok_or_else(|| ExecutionError::AgentNotFound(agent_id.to_string()))?
        };

        let mut inner = self.lock();
        if inner.entries.len() >= self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, c)| c.last_used)
                .map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                inner.entries.remove(&key);
                #[cfg(feature = "telemetry")]
                debug!(agent_id = %key, "Evicted cached agent config");
            }
        }
        inner.tick += 1;
        let tick = inner.tick;
        inner.entries.insert(
            agent_id.to_string(),
            CachedAgent {
                config: config.clone(),
                last_used: tick,
            },
        );

        Ok(config)
    }

    /// Forget a cached agent, e.g. after its configuration changed.
    pub fn invalidate(&self, agent_id: &str) -> bool {
        self.lock().entries.remove(agent_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogStore, ModelBinding};
    use crate::types::GenerationParams;

    fn agent(id: &str) -> AgentConfig {
        AgentConfig {
            agent_id: id.to_string(),
            name: id.to_string(),
            description: None,
            system_prompt: "You help.".to_string(),
            model: ModelBinding::Fixed { model_id: 1 },
            skills: None,
            capabilities: None,
            params: GenerationParams::new(),
        }
    }

    #[tokio::test]
    async fn test_loads_caches_and_evicts() {
        let store = CatalogStore::open_in_memory().unwrap();
        for id in ["a", "b", "c"] {
            store.save_agent(&agent(id)).unwrap();
        }
        let catalog = store.into_shared();
        let cache = AgentConfigCache::new(catalog.clone(), 2);

        cache.get("a").await.unwrap();
        cache.get("b").await.unwrap();
        cache.get("a").await.unwrap();
        cache.get("c").await.unwrap();
        assert_eq!(cache.len(), 2);

        // "b" was least recently used
        assert!(!cache.invalidate("b"));
        assert!(cache.invalidate("a"));
    }

    #[tokio::test]
    async fn test_cached_copy_served_until_invalidated() {
        let store = CatalogStore::open_in_memory().unwrap();
        store.save_agent(&agent("a")).unwrap();
        let catalog = store.into_shared();
        let cache = AgentConfigCache::new(catalog.clone(), 4);
        cache.get("a").await.unwrap();

        let mut changed = agent("a");
        changed.system_prompt = "Changed.".to_string();
        catalog.lock().await.save_agent(&changed).unwrap();

        assert_eq!(cache.get("a").await.unwrap().system_prompt, "You help.");
        cache.invalidate("a");
        assert_eq!(cache.get("a").await.unwrap().system_prompt, "Changed.");
    }

    #[tokio::test]
    async fn test_missing_agent() {
        let catalog = CatalogStore::open_in_memory().unwrap().into_shared();
        let cache = AgentConfigCache::new(catalog, 4);
        let err = cache.get("ghost").await.unwrap_err();
        assert!(matches!(err, ExecutionError::AgentNotFound(_)));
        assert!(cache.is_empty());
    }
}
