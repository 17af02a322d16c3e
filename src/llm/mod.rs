// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Catalog-aware LLM access.
//!
//! Resolves a catalog model to a pooled provider, translates canonical
//! parameters into the supplier's key names, guards each supplier with a
//! circuit breaker and records call metrics.

pub mod pool;

pub use pool::{PoolOptions, PoolStats, ProviderPool};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::catalog::{ModelRecord, SharedCatalog, Supplier};
use crate::config::ResolvedConfig;
use crate::error::{ProviderError, StoreError};
use crate::params::ParameterNormalizer;
use crate::providers::{create_provider, normalize_ollama_base_url, ProviderType};
use crate::services::{BreakerSettings, CircuitBreaker};
use crate::telemetry::ApiMonitor;
use crate::types::{
    BoxedProvider, GeneratedImage, GenerationParams, Message, ProviderConfig, ProviderResponse,
    SharedProvider, TokenUsage,
};

/// Text returned in place of a completion when the provider call fails.
pub const APOLOGY_TEXT: &str =
    "Sorry, I couldn't generate a response right now. Please try again later.";

/// Result of a completion that never fails.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionOutcome {
    pub generated_text: String,
    pub model_id: i64,
    /// The call failed and `generated_text` is an apology
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// A model resolved for one call.
struct ResolvedModel {
    model: ModelRecord,
    supplier: Supplier,
    provider: SharedProvider,
}

pub struct LlmService {
    catalog: SharedCatalog,
    config: Arc<ResolvedConfig>,
    normalizer: Arc<ParameterNormalizer>,
    monitor: Arc<ApiMonitor>,
    pool: ProviderPool,
    injected: RwLock<HashMap<i64, SharedProvider>>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl LlmService {
    pub fn new(
        catalog: SharedCatalog,
        config: Arc<ResolvedConfig>,
        normalizer: Arc<ParameterNormalizer>,
        monitor: Arc<ApiMonitor>,
    ) -> Self {
        Self {
            catalog,
            config,
            normalizer,
            monitor,
            pool: ProviderPool::default(),
            injected: RwLock::new(HashMap::new()),
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Route a model's calls to a given provider instead of building one
    /// from the supplier settings.
    pub async fn register_provider(&self, model_id: i64, provider: SharedProvider) {
        self.injected.write().await.insert(model_id, provider);
    }

    pub fn monitor(&self) -> &Arc<ApiMonitor> {
        &self.monitor
    }

    pub async fn pool_stats(&self) -> PoolStats {
        self.pool.stats().await
    }

    /// Drop idle pooled providers.
    pub async fn cleanup_idle(&self) -> usize {
        self.pool.cleanup_idle().await
    }

    /// Breaker for a supplier, created on first use.
    pub fn breaker(&self, supplier: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        breakers
            .entry(supplier.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    supplier,
                    BreakerSettings::from(&self.config.breaker),
                ))
            })
            .clone()
    }

    async fn resolve(&self, model_id: i64) -> Result<ResolvedModel, ProviderError> {
        let (model, supplier) = {
            let store = self.catalog.lock().await;
            let model = store.get_model(model_id).map_err(store_to_provider)?;
            let supplier = store
                .get_supplier(model.supplier_id)
                .map_err(store_to_provider)?;
            (model, supplier)
        };

        if !model.is_active {
            return Err(ProviderError::ModelNotFound(format!(
                "{} is deactivated",
                model.model_id
            )));
        }

        let injected = self.injected.read().await.get(&model_id).cloned();
        let provider = match injected {
            Some(provider) => provider,
            None => {
                let label = format!("{}/{}", supplier.name, model.model_id);
                self.pool
                    .get_or_create(model_id, &label, || {
                        build_provider(&supplier, &model, &self.config)
                    })
                    .await?
            }
        };

        Ok(ResolvedModel {
            model,
            supplier,
            provider,
        })
    }

    /// Chat with a catalog model. Parameters are canonical.
    pub async fn chat(
        &self,
        model_id: i64,
        messages: &[Message],
        system_prompt: Option<&str>,
        params: &GenerationParams,
    ) -> Result<ProviderResponse, ProviderError> {
        let resolved = self.resolve(model_id).await?;
        let supplier_params = self.normalizer.denormalize_parameters(
            &resolved.supplier.provider_type,
            resolved.model.model_type,
            params,
        );

        let breaker = self.breaker(&resolved.supplier.name);
        breaker
            .try_acquire()
            .map_err(|_| ProviderError::CircuitOpen(resolved.supplier.name.clone()))?;

        let start = Instant::now();
        let result = resolved
            .provider
            .chat(messages, system_prompt, &supplier_params)
            .await;
        let elapsed = start.elapsed();

        self.monitor.record_api_call(
            &resolved.supplier.name,
            &resolved.model.model_id,
            elapsed,
            result.is_ok(),
        );

        match &result {
            Ok(response) => {
                breaker.record_success();
                if let Some(usage) = &response.usage {
                    self.monitor
                        .record_tokens(usage.input_tokens as u64, usage.output_tokens as u64);
                }
                debug!(
                    model_id,
                    model = %resolved.model.model_id,
                    duration_ms = elapsed.as_millis() as u64,
                    "Chat completed"
                );
            }
            Err(e) => {
                breaker.record_failure();
                warn!(
                    model_id,
                    supplier = %resolved.supplier.name,
                    error = %e,
                    "Chat failed"
                );
            }
        }

        result
    }

    /// Chat that degrades to an apology instead of failing.
    pub async fn chat_completion(
        &self,
        model_id: i64,
        messages: &[Message],
        system_prompt: Option<&str>,
        params: &GenerationParams,
    ) -> CompletionOutcome {
        match self.chat(model_id, messages, system_prompt, params).await {
            Ok(response) => CompletionOutcome {
                generated_text: response.content,
                model_id,
                degraded: false,
                error: None,
                usage: response.usage,
            },
            Err(e) => CompletionOutcome {
                generated_text: APOLOGY_TEXT.to_string(),
                model_id,
                degraded: true,
                error: Some(e.to_string()),
                usage: None,
            },
        }
    }

    /// Single-prompt completion; degrades like [`Self::chat_completion`].
    pub async fn text_completion(
        &self,
        model_id: i64,
        prompt: &str,
        params: &GenerationParams,
    ) -> CompletionOutcome {
        self.chat_completion(model_id, &[Message::user(prompt)], None, params)
            .await
    }

    pub async fn generate_image(
        &self,
        model_id: i64,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<GeneratedImage, ProviderError> {
        let resolved = self.resolve(model_id).await?;
        let supplier_params = self.normalizer.denormalize_parameters(
            &resolved.supplier.provider_type,
            resolved.model.model_type,
            params,
        );

        let breaker = self.breaker(&resolved.supplier.name);
        breaker
            .try_acquire()
            .map_err(|_| ProviderError::CircuitOpen(resolved.supplier.name.clone()))?;

        let start = Instant::now();
        let result = resolved.provider.generate_image(prompt, &supplier_params).await;
        self.monitor.record_api_call(
            &resolved.supplier.name,
            &resolved.model.model_id,
            start.elapsed(),
            result.is_ok(),
        );
        match result {
            Ok(_) => breaker.record_success(),
            // Unsupported operations say nothing about supplier health
            Err(ProviderError::UnsupportedOperation(_)) => {}
            Err(_) => breaker.record_failure(),
        }
        result
    }

    /// Models advertised by a supplier's endpoint.
    pub async fn list_remote_models(
        &self,
        model_id: i64,
    ) -> Result<Vec<crate::types::ModelInfo>, ProviderError> {
        let resolved = self.resolve(model_id).await?;
        resolved.provider.list_models().await
    }

    pub async fn shutdown(&self) {
        self.pool.clear().await;
        self.injected.write().await.clear();
    }
}

fn store_to_provider(err: StoreError) -> ProviderError {
    match err {
        StoreError::NotFound { entity, id } => {
            ProviderError::ModelNotFound(format!("{entity} {id}"))
        }
        other => ProviderError::NotConfigured(other.to_string()),
    }
}

/// Build a provider from supplier settings.
///
/// API key order: configured key, configured key variable, the supplier's
/// key variable, then the provider type's standard variable. Ollama hosts
/// fall back to `OLLAMA_HOST`.
fn build_provider(
    supplier: &Supplier,
    model: &ModelRecord,
    config: &ResolvedConfig,
) -> Result<BoxedProvider, ProviderError> {
    let provider_type: ProviderType = supplier.provider_type.parse().map_err(|_| {
        ProviderError::NotConfigured(format!(
            "unknown provider type '{}' for supplier {}",
            supplier.provider_type, supplier.name
        ))
    })?;
    let settings = config.provider_settings(&supplier.name);

    let env = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
    let api_key = settings
        .and_then(|s| s.api_key.clone())
        .or_else(|| settings.and_then(|s| s.api_key_env.as_deref()).and_then(env))
        .or_else(|| supplier.api_key_env.as_deref().and_then(env))
        .or_else(|| provider_type.api_key_env().and_then(env));

    let mut base_url = settings
        .and_then(|s| s.base_url.clone())
        .or_else(|| supplier.base_url.clone());
    if provider_type == ProviderType::Ollama {
        base_url = Some(normalize_ollama_base_url(
            base_url.or_else(|| env("OLLAMA_HOST")).as_deref(),
        ));
    }

    let provider_config = ProviderConfig {
        api_key,
        base_url,
        model: Some(model.model_id.clone()),
        timeout_ms: settings.and_then(|s| s.timeout_ms),
        ..Default::default()
    };

    create_provider(provider_type, provider_config)
}
