// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use std::path::PathBuf;

use super::types::{ResolvedConfig, WorkspaceConfig};

/// CLI options that can override configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub database: Option<PathBuf>,
    pub log_level: Option<String>,
    pub strategy: Option<String>,
    pub use_defaults: Option<bool>,
    pub trust_undeclared_calls: Option<bool>,
}

/// Default configuration values.
pub fn default_config() -> ResolvedConfig {
    ResolvedConfig::default()
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options
/// 2. Local config (.copilot.local.json)
/// 3. Workspace config (.copilot.json)
/// 4. Global config (~/.copilot/config.json)
/// 5. Default values
pub fn merge_config(
    global: Option<WorkspaceConfig>,
    workspace: Option<WorkspaceConfig>,
    local: Option<WorkspaceConfig>,
    cli: CliOptions,
) -> ResolvedConfig {
    let mut result = default_config();

    for config in [global, workspace, local].into_iter().flatten() {
        apply_workspace_config(&mut result, &config);
    }

    // Apply CLI options (highest precedence)
    apply_cli_options(&mut result, &cli);

    result
}

fn apply_workspace_config(result: &mut ResolvedConfig, config: &WorkspaceConfig) {
    if let Some(path) = config.database.as_ref().and_then(|d| d.path.as_ref()) {
        result.database_path = PathBuf::from(path);
    }

    if let Some(ref providers) = config.providers {
        // Later sources override field by field
        for (name, settings) in providers {
            let entry = result.providers.entry(name.clone()).or_default();
            if settings.base_url.is_some() {
                entry.base_url = settings.base_url.clone();
            }
            if settings.api_key.is_some() {
                entry.api_key = settings.api_key.clone();
            }
            if settings.api_key_env.is_some() {
                entry.api_key_env = settings.api_key_env.clone();
            }
            if settings.timeout_ms.is_some() {
                entry.timeout_ms = settings.timeout_ms;
            }
        }
    }

    if let Some(ref scheduler) = config.scheduler {
        if let Some(ref strategy) = scheduler.default_strategy {
            result.scheduler.default_strategy = strategy.clone();
        }
        if let Some(use_defaults) = scheduler.use_defaults {
            result.scheduler.use_defaults = use_defaults;
        }
    }

    if let Some(ref engine) = config.engine {
        if let Some(limit) = engine.history_limit {
            result.engine.history_limit = limit;
        }
        if let Some(size) = engine.agent_cache_size {
            result.engine.agent_cache_size = size;
        }
        if let Some(timeout) = engine.skill_timeout_ms {
            result.engine.skill_timeout_ms = timeout;
        }
        if let Some(max) = engine.max_skill_output_bytes {
            result.engine.max_skill_output_bytes = max;
        }
        if let Some(trust) = engine.trust_undeclared_calls {
            result.engine.trust_undeclared_calls = trust;
        }
        if let Some(ref prompt) = engine.final_answer_prompt {
            result.engine.final_answer_prompt = prompt.clone();
        }
    }

    if let Some(ref cache) = config.cache {
        if let Some(ttl) = cache.ttl_secs {
            result.cache.ttl_secs = ttl;
        }
        if let Some(capacity) = cache.capacity {
            result.cache.capacity = capacity;
        }
    }

    if let Some(ref breaker) = config.breaker {
        if let Some(threshold) = breaker.failure_threshold {
            result.breaker.failure_threshold = threshold;
        }
        if let Some(timeout) = breaker.reset_timeout_ms {
            result.breaker.reset_timeout_ms = timeout;
        }
        if let Some(threshold) = breaker.success_threshold {
            result.breaker.success_threshold = threshold;
        }
    }

    if config.log_level.is_some() {
        result.log_level = config.log_level.clone();
    }
}

fn apply_cli_options(result: &mut ResolvedConfig, cli: &CliOptions) {
    if let Some(ref database) = cli.database {
        result.database_path = database.clone();
    }

    if cli.log_level.is_some() {
        result.log_level = cli.log_level.clone();
    }

    if let Some(ref strategy) = cli.strategy {
        result.scheduler.default_strategy = strategy.clone();
    }

    if let Some(use_defaults) = cli.use_defaults {
        result.scheduler.use_defaults = use_defaults;
    }

    if let Some(trust) = cli.trust_undeclared_calls {
        result.engine.trust_undeclared_calls = trust;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{EngineConfig, ProviderSettings, SchedulerConfig};
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = default_config();
        assert_eq!(config.engine.history_limit, 10);
        assert!(config.providers.is_empty());
    }

    #[test]
    fn test_merge_config_precedence() {
        let global = WorkspaceConfig {
            scheduler: Some(SchedulerConfig {
                default_strategy: Some("cost_effective".to_string()),
                use_defaults: Some(false),
            }),
            log_level: Some("warn".to_string()),
            ..Default::default()
        };

        let workspace = WorkspaceConfig {
            scheduler: Some(SchedulerConfig {
                default_strategy: Some("balanced".to_string()),
                use_defaults: None,
            }),
            ..Default::default()
        };

        let local = WorkspaceConfig {
            log_level: Some("debug".to_string()),
            ..Default::default()
        };

        let cli = CliOptions {
            strategy: Some("performance_optimized".to_string()),
            ..Default::default()
        };

        let result = merge_config(Some(global), Some(workspace), Some(local), cli);

        // CLI strategy takes precedence
        assert_eq!(result.scheduler.default_strategy, "performance_optimized");
        // Untouched by later layers, so the global value survives
        assert!(!result.scheduler.use_defaults);
        // Local wins over global
        assert_eq!(result.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_merge_provider_settings_field_by_field() {
        let global = WorkspaceConfig {
            providers: Some(HashMap::from([(
                "openai".to_string(),
                ProviderSettings {
                    api_key_env: Some("MY_OPENAI_KEY".to_string()),
                    timeout_ms: Some(10_000),
                    ..Default::default()
                },
            )])),
            ..Default::default()
        };

        let workspace = WorkspaceConfig {
            providers: Some(HashMap::from([(
                "openai".to_string(),
                ProviderSettings {
                    base_url: Some("https://proxy.internal/v1".to_string()),
                    ..Default::default()
                },
            )])),
            ..Default::default()
        };

        let result = merge_config(Some(global), Some(workspace), None, CliOptions::default());
        let openai = &result.providers["openai"];
        assert_eq!(openai.api_key_env.as_deref(), Some("MY_OPENAI_KEY"));
        assert_eq!(openai.base_url.as_deref(), Some("https://proxy.internal/v1"));
        assert_eq!(openai.timeout_ms, Some(10_000));
    }

    #[test]
    fn test_cli_options_override() {
        let workspace = WorkspaceConfig {
            engine: Some(EngineConfig {
                trust_undeclared_calls: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        let cli = CliOptions {
            trust_undeclared_calls: Some(false),
            database: Some(PathBuf::from("/tmp/catalog.db")),
            ..Default::default()
        };

        let result = merge_config(None, Some(workspace), None, cli);

        assert!(!result.engine.trust_undeclared_calls);
        assert_eq!(result.database_path, PathBuf::from("/tmp/catalog.db"));
    }
}
