// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Lazily populated provider pool with LRU eviction and idle cleanup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::ProviderError;
use crate::types::{BoxedProvider, SharedProvider};

/// Default maximum pool size
pub const DEFAULT_MAX_POOL_SIZE: usize = 5;

/// Default idle timeout (5 minutes)
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

struct PooledProvider {
    provider: SharedProvider,
    label: String,
    last_used: Instant,
    use_count: u64,
}

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub max_pool_size: usize,
    pub idle_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Usage of one pooled provider.
#[derive(Debug, Clone, Serialize)]
pub struct PooledProviderStats {
    pub model_id: i64,
    pub label: String,
    pub use_count: u64,
    pub idle_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub size: usize,
    pub max_size: usize,
    pub providers: Vec<PooledProviderStats>,
}

/// Providers keyed by catalog model id.
pub struct ProviderPool {
    pool: RwLock<HashMap<i64, PooledProvider>>,
    options: PoolOptions,
}

impl Default for ProviderPool {
    fn default() -> Self {
        Self::new(PoolOptions::default())
    }
}

impl ProviderPool {
    pub fn new(options: PoolOptions) -> Self {
        Self {
            pool: RwLock::new(HashMap::new()),
            options,
        }
    }

    /// Pooled provider for a model, created with `create` on a miss.
    pub async fn get_or_create<F>(
        &self,
        model_id: i64,
        label: &str,
        create: F,
    ) -> Result<SharedProvider, ProviderError>
    where
        F: FnOnce() -> Result<BoxedProvider, ProviderError>,
    {
        let mut pool = self.pool.write().await;

        if let Some(pooled) = pool.get_mut(&model_id) {
            pooled.last_used = Instant::now();
            pooled.use_count += 1;
            return Ok(pooled.provider.clone());
        }

        let provider: SharedProvider = Arc::from(create()?);

        if pool.len() >= self.options.max_pool_size {
            Self::evict_oldest(&mut pool);
        }

        pool.insert(
            model_id,
            PooledProvider {
                provider: provider.clone(),
                label: label.to_string(),
                last_used: Instant::now(),
                use_count: 1,
            },
        );
        debug!(model_id, label, "Created pooled provider");

        Ok(provider)
    }

    fn evict_oldest(pool: &mut HashMap<i64, PooledProvider>) {
        let oldest = pool
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(id, _)| *id);
        if let Some(id) = oldest {
            pool.remove(&id);
            debug!(model_id = id, "Evicted pooled provider");
        }
    }

    /// Drop providers idle longer than the timeout. Returns how many.
    pub async fn cleanup_idle(&self) -> usize {
        let mut pool = self.pool.write().await;
        let timeout = self.options.idle_timeout;
        let before = pool.len();
        pool.retain(|_, entry| entry.last_used.elapsed() < timeout);
        before - pool.len()
    }

    pub async fn invalidate(&self, model_id: i64) -> bool {
        self.pool.write().await.remove(&model_id).is_some()
    }

    pub async fn clear(&self) {
        self.pool.write().await.clear();
    }

    pub async fn stats(&self) -> PoolStats {
        let pool = self.pool.read().await;
        let mut providers: Vec<PooledProviderStats> = pool
            .iter()
            .map(|(id, p)| PooledProviderStats {
                model_id: *id,
                label: p.label.clone(),
                use_count: p.use_count,
                idle_ms: p.last_used.elapsed().as_millis() as u64,
            })
            .collect();
        providers.sort_by_key(|p| p.model_id);

        PoolStats {
            size: pool.len(),
            max_size: self.options.max_pool_size,
            providers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ScriptedProvider;

    fn scripted() -> Result<BoxedProvider, ProviderError> {
        Ok(Box::new(ScriptedProvider::new("m")))
    }

    #[tokio::test]
    async fn test_reuses_and_counts() {
        let pool = ProviderPool::default();
        pool.get_or_create(1, "m", scripted).await.unwrap();
        pool.get_or_create(1, "m", || -> Result<BoxedProvider, ProviderError> {
            panic!("should be pooled")
        })
            .await
            .unwrap();

        let stats = pool.stats().await;
        assert_eq!(stats.size, 1);
        assert_eq!(stats.providers[0].use_count, 2);
    }

    #[tokio::test]
    async fn test_evicts_least_recently_used() {
        let pool = ProviderPool::new(PoolOptions {
            max_pool_size: 2,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        });
        pool.get_or_create(1, "a", scripted).await.unwrap();
        pool.get_or_create(2, "b", scripted).await.unwrap();
        pool.get_or_create(1, "a", scripted).await.unwrap();
        pool.get_or_create(3, "c", scripted).await.unwrap();

        let ids: Vec<i64> = pool.stats().await.providers.iter().map(|p| p.model_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_creation_error_not_pooled() {
        let pool = ProviderPool::default();
        let result = pool
            .get_or_create(1, "x", || Err(ProviderError::NotConfigured("no key".to_string())))
            .await;
        assert!(result.is_err());
        assert_eq!(pool.stats().await.size, 0);

        pool.get_or_create(1, "x", scripted).await.unwrap();
        assert_eq!(pool.cleanup_idle().await, 0);
        assert!(pool.invalidate(1).await);
    }
}
