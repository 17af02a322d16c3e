// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! Defines the structure of workspace and resolved configuration,
//! supporting JSON and YAML formats.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Workspace configuration for the copilot backend.
/// Can be defined in .copilot.json or .copilot/config.json in the project root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    /// Catalog database settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,

    /// Per-supplier connection settings, keyed by supplier name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub providers: Option<HashMap<String, ProviderSettings>>,

    /// Model scheduling defaults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerConfig>,

    /// Agent execution engine settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineConfig>,

    /// Execution cache settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheConfig>,

    /// Circuit breaker settings applied per supplier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breaker: Option<BreakerConfig>,

    /// Log filter directive (e.g. "info", "copilot=debug")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// Catalog database settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// Path to the SQLite file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Connection settings for one supplier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSettings {
    /// Custom base URL for the API
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Literal API key (prefer apiKeyEnv)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Request timeout in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Model scheduling defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    /// capability_first, cost_effective, performance_optimized or balanced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_strategy: Option<String>,

    /// Consult the default-model table before ranking
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_defaults: Option<bool>,
}

/// Agent execution engine settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Number of past conversation messages loaded per turn
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<usize>,

    /// Capacity of the agent configuration cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_cache_size: Option<usize>,

    /// Wall-clock limit for script skills in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill_timeout_ms: Option<u64>,

    /// Maximum bytes of script output kept
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_skill_output_bytes: Option<usize>,

    /// Execute calls from agents that declare no skills/capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_undeclared_calls: Option<bool>,

    /// Instruction appended when asking for the final answer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_answer_prompt: Option<String>,
}

/// Execution cache settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Entry time-to-live in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,

    /// Maximum number of entries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerConfig {
    /// Consecutive failures before opening
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,

    /// Time spent open before a trial call, in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_timeout_ms: Option<u64>,

    /// Successful trial calls needed to close again
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_threshold: Option<u32>,
}

/// Resolved configuration with all values set.
/// This is the merged result of global, workspace, local, and CLI configs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    pub database_path: PathBuf,
    pub providers: HashMap<String, ProviderSettings>,
    pub scheduler: ResolvedSchedulerConfig,
    pub engine: ResolvedEngineConfig,
    pub cache: ResolvedCacheConfig,
    pub breaker: ResolvedBreakerConfig,
    pub log_level: Option<String>,
}

/// Resolved scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSchedulerConfig {
    pub default_strategy: String,
    pub use_defaults: bool,
}

/// Resolved engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedEngineConfig {
    pub history_limit: usize,
    pub agent_cache_size: usize,
    pub skill_timeout_ms: u64,
    pub max_skill_output_bytes: usize,
    pub trust_undeclared_calls: bool,
    pub final_answer_prompt: String,
}

/// Resolved cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedCacheConfig {
    pub ttl_secs: u64,
    pub capacity: usize,
}

/// Resolved circuit breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub success_threshold: u32,
}

/// Instruction used when asking the model to compose the final answer.
pub const DEFAULT_FINAL_ANSWER_PROMPT: &str =
    "Using the tool results above, write the final answer for the user.";

/// Default catalog location: `~/.copilot/copilot.db`.
pub fn default_database_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".copilot"))
        .unwrap_or_else(|| PathBuf::from(".copilot"))
        .join("copilot.db")
}

impl Default for ResolvedSchedulerConfig {
    fn default() -> Self {
        Self {
            default_strategy: "capability_first".to_string(),
            use_defaults: true,
        }
    }
}

impl Default for ResolvedEngineConfig {
    fn default() -> Self {
        Self {
            history_limit: 10,
            agent_cache_size: 100,
            skill_timeout_ms: 30_000,
            max_skill_output_bytes: 64 * 1024,
            trust_undeclared_calls: true,
            final_answer_prompt: DEFAULT_FINAL_ANSWER_PROMPT.to_string(),
        }
    }
}

impl Default for ResolvedCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            capacity: 1000,
        }
    }
}

impl Default for ResolvedBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            success_threshold: 1,
        }
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            providers: HashMap::new(),
            scheduler: ResolvedSchedulerConfig::default(),
            engine: ResolvedEngineConfig::default(),
            cache: ResolvedCacheConfig::default(),
            breaker: ResolvedBreakerConfig::default(),
            log_level: None,
        }
    }
}

impl ResolvedConfig {
    /// Settings for a supplier, matched case-insensitively.
    pub fn provider_settings(&self, supplier: &str) -> Option<&ProviderSettings> {
        self.providers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(supplier))
            .map(|(_, settings)| settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_config_default() {
        let config = WorkspaceConfig::default();
        assert!(config.database.is_none());
        assert!(config.providers.is_none());
    }

    #[test]
    fn test_workspace_config_json_serialization() {
        let config = WorkspaceConfig {
            engine: Some(EngineConfig {
                history_limit: Some(20),
                trust_undeclared_calls: Some(false),
                ..Default::default()
            }),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };

        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("\"historyLimit\": 20"));
        assert!(json.contains("\"trustUndeclaredCalls\": false"));
        assert!(json.contains("\"logLevel\""));

        let parsed: WorkspaceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.engine.unwrap().history_limit, Some(20));
    }

    #[test]
    fn test_workspace_config_yaml_serialization() {
        let yaml = r#"
providers:
  ollama:
    baseUrl: http://gpu-box:11434
scheduler:
  defaultStrategy: balanced
"#;
        let parsed: WorkspaceConfig = serde_yaml::from_str(yaml).unwrap();
        let providers = parsed.providers.unwrap();
        assert_eq!(
            providers["ollama"].base_url.as_deref(),
            Some("http://gpu-box:11434")
        );
        assert_eq!(
            parsed.scheduler.unwrap().default_strategy.as_deref(),
            Some("balanced")
        );
    }

    #[test]
    fn test_resolved_config_default() {
        let config = ResolvedConfig::default();
        assert_eq!(config.scheduler.default_strategy, "capability_first");
        assert!(config.scheduler.use_defaults);
        assert!(config.engine.trust_undeclared_calls);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert!(config.database_path.ends_with("copilot.db"));
    }

    #[test]
    fn test_provider_settings_case_insensitive() {
        let mut config = ResolvedConfig::default();
        config.providers.insert(
            "DeepSeek".to_string(),
            ProviderSettings {
                timeout_ms: Some(5000),
                ..Default::default()
            },
        );
        assert_eq!(
            config.provider_settings("deepseek").and_then(|s| s.timeout_ms),
            Some(5000)
        );
        assert!(config.provider_settings("openai").is_none());
    }
}
