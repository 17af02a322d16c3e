// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Application context: builds every component once and tears them down in
//! order. Components receive their collaborators from here; nothing is a
//! process-wide global.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::json;
use tracing::{info, warn};

use crate::capabilities::CapabilityDiscoveryService;
use crate::catalog::{CatalogStore, SharedCatalog};
use crate::config::ResolvedConfig;
use crate::engine::{AgentExecutionEngine, CacheBackend, EngineOptions, MemoryCache};
use crate::error::Result;
use crate::knowledge::KnowledgeBase;
use crate::llm::LlmService;
use crate::params::ParameterNormalizer;
use crate::scheduler::AgentModelScheduler;
use crate::services::{MessageQueue, ServiceRegistry};
use crate::skills::SkillExecutor;
use crate::telemetry::{ApiMonitor, MonitorSnapshot};

/// Topic for lifecycle events.
pub const LIFECYCLE_TOPIC: &str = "system.lifecycle";

/// Address under which in-process components are registered.
const IN_PROCESS: &str = "in-process";

/// Every long-lived component of the backend.
pub struct AppContext {
    pub config: Arc<ResolvedConfig>,
    pub catalog: SharedCatalog,
    pub monitor: Arc<ApiMonitor>,
    pub registry: Arc<ServiceRegistry>,
    pub queue: Arc<MessageQueue>,
    pub normalizer: Arc<ParameterNormalizer>,
    pub llm: Arc<LlmService>,
    pub scheduler: AgentModelScheduler,
    pub discovery: CapabilityDiscoveryService,
    pub skills: Arc<SkillExecutor>,
    pub knowledge: Arc<KnowledgeBase>,
    pub cache: Arc<dyn CacheBackend>,
    pub engine: AgentExecutionEngine,
}

impl AppContext {
    /// Open the configured catalog and build all components.
    pub async fn init(config: ResolvedConfig) -> Result<Self> {
        let store = CatalogStore::open_at(&config.database_path).with_context(|| {
            format!("opening catalog at {}", config.database_path.display())
        })?;
        Self::with_catalog(config, store).await
    }

    /// Build all components around an already opened catalog.
    pub async fn with_catalog(config: ResolvedConfig, store: CatalogStore) -> Result<Self> {
        let config = Arc::new(config);
        let catalog = store.into_shared();
        let monitor = Arc::new(ApiMonitor::new());
        let registry = Arc::new(ServiceRegistry::new());
        let queue = Arc::new(MessageQueue::default());
        let normalizer = Arc::new(ParameterNormalizer::new());

        let llm = Arc::new(LlmService::new(
            catalog.clone(),
            config.clone(),
            normalizer.clone(),
            monitor.clone(),
        ));
        let scheduler = AgentModelScheduler::new(catalog.clone());
        let discovery = CapabilityDiscoveryService::new(catalog.clone());
        let skills = Arc::new(SkillExecutor::new(
            catalog.clone(),
            llm.clone(),
            monitor.clone(),
            SkillExecutor::limits_from_config(&config.engine),
        ));
        let knowledge = Arc::new(KnowledgeBase::new(catalog.clone(), monitor.clone()));
        let cache: Arc<dyn CacheBackend> = Arc::new(MemoryCache::from_config(&config.cache));

        let engine = AgentExecutionEngine::new(EngineOptions {
            catalog: catalog.clone(),
            llm: llm.clone(),
            scheduler: scheduler.clone(),
            skills: skills.clone(),
            knowledge: knowledge.clone(),
            cache: cache.clone(),
            config: config.engine.clone(),
            use_defaults: config.scheduler.use_defaults,
            events: Some(queue.clone()),
        });

        discovery
            .ensure_taxonomy()
            .await
            .context("seeding capability taxonomy")?;

        for service in ["llm", "scheduler", "engine", "skills", "knowledge"] {
            let metadata = HashMap::from([("version".to_string(), crate::VERSION.to_string())]);
            registry.register(service, IN_PROCESS, metadata).await;
        }

        let app = Self {
            config,
            catalog,
            monitor,
            registry,
            queue,
            normalizer,
            llm,
            scheduler,
            discovery,
            skills,
            knowledge,
            cache,
            engine,
        };

        app.publish_lifecycle("started").await;
        info!(cache = app.cache.name(), "Application context initialized");
        Ok(app)
    }

    async fn publish_lifecycle(&self, event: &str) {
        if let Err(e) = self
            .queue
            .publish_message(LIFECYCLE_TOPIC, json!({ "event": event }))
            .await
        {
            warn!(event, error = %e, "Lifecycle event not published");
        }
    }

    /// Drop idle pooled providers and stale registry entries.
    pub async fn maintenance(&self, stale_after: Duration) -> (usize, usize) {
        let providers = self.llm.cleanup_idle().await;
        let instances = self.registry.prune_stale(stale_after).await;
        (providers, instances)
    }

    /// Tear everything down and return the final metrics.
    pub async fn shutdown(self) -> MonitorSnapshot {
        self.publish_lifecycle("stopping").await;
        self.queue.close().await;
        self.registry.clear().await;
        self.llm.shutdown().await;

        let snapshot = self.monitor.snapshot();
        info!(
            input_tokens = snapshot.input_tokens,
            output_tokens = snapshot.output_tokens,
            uptime_ms = snapshot.uptime_ms,
            "Application context shut down"
        );
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_registers_components_and_shuts_down() {
        let store = CatalogStore::open_in_memory().unwrap();
        let app = AppContext::with_catalog(ResolvedConfig::default(), store)
            .await
            .unwrap();

        assert!(app.registry.discover_service("engine").await.is_ok());
        assert!(!app.catalog.lock().await.list_capabilities().unwrap().is_empty());

        let registry = app.registry.clone();
        let queue = app.queue.clone();
        app.shutdown().await;
        assert!(registry.service_names().await.is_empty());
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_init_opens_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ResolvedConfig {
            database_path: dir.path().join("nested").join("copilot.db"),
            ..Default::default()
        };
        let app = AppContext::init(config).await.unwrap();
        assert!(dir.path().join("nested").join("copilot.db").exists());
        app.shutdown().await;
    }
}
