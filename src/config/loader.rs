// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading configuration from JSON and YAML files in various locations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::types::{
    BreakerConfig, CacheConfig, DatabaseConfig, EngineConfig, ProviderSettings, SchedulerConfig,
    WorkspaceConfig,
};

/// Config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &[
    ".copilot.json",
    ".copilot/config.json",
    "copilot.config.json",
    "copilot.config.yaml",
];

/// Local config file name (for per-directory overrides).
pub const LOCAL_CONFIG_FILE: &str = ".copilot.local.json";

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".copilot";

/// Global config file name.
pub const GLOBAL_CONFIG_FILE: &str = "config.json";

/// Get the global config directory path.
pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

/// Get the global config file path.
pub fn get_global_config_path() -> Option<PathBuf> {
    get_global_config_dir().map(|dir| dir.join(GLOBAL_CONFIG_FILE))
}

/// Load global configuration from ~/.copilot/config.json.
pub fn load_global_config() -> Result<Option<WorkspaceConfig>, ConfigError> {
    let path = match get_global_config_path() {
        Some(p) => p,
        None => return Ok(None),
    };

    if !path.exists() {
        return Ok(None);
    }

    load_config_file(&path).map(Some)
}

/// Load workspace configuration from the workspace root.
///
/// Searches [`CONFIG_FILES`] in order and loads the first one found.
pub fn load_workspace_config(workspace_root: &Path) -> Result<Option<WorkspaceConfig>, ConfigError> {
    for filename in CONFIG_FILES {
        let path = workspace_root.join(filename);
        if path.exists() {
            return load_config_file(&path).map(Some);
        }
    }
    Ok(None)
}

/// Load local configuration from .copilot.local.json.
pub fn load_local_config(workspace_root: &Path) -> Result<Option<WorkspaceConfig>, ConfigError> {
    let path = workspace_root.join(LOCAL_CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }
    load_config_file(&path).map(Some)
}

/// Load a configuration file (JSON or YAML).
pub fn load_config_file(path: &Path) -> Result<WorkspaceConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    match extension.to_lowercase().as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        _ => serde_json::from_str(&content).map_err(ConfigError::from),
    }
}

/// Save workspace configuration to a file.
pub fn save_workspace_config(
    workspace_root: &Path,
    config: &WorkspaceConfig,
    filename: Option<&str>,
) -> Result<PathBuf, ConfigError> {
    let filename = filename.unwrap_or(CONFIG_FILES[0]);
    let path = workspace_root.join(filename);

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, content)?;

    Ok(path)
}

/// Initialize a new config file, using the example configuration when none
/// is provided.
pub fn init_config(
    workspace_root: &Path,
    config: Option<WorkspaceConfig>,
) -> Result<PathBuf, ConfigError> {
    let config = config.unwrap_or_else(get_example_config);
    save_workspace_config(workspace_root, &config, None)
}

/// Find the workspace root by searching for config files.
///
/// Walks up the directory tree from `start` until it finds a directory
/// containing a config file or reaches the filesystem root.
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        if CONFIG_FILES.iter().any(|f| current.join(f).exists()) {
            return Some(current);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return None,
        }
    }
}

/// Get an example configuration.
pub fn get_example_config() -> WorkspaceConfig {
    WorkspaceConfig {
        database: Some(DatabaseConfig {
            path: Some(".copilot/copilot.db".to_string()),
        }),
        providers: Some(HashMap::from([
            (
                "openai".to_string(),
                ProviderSettings {
                    api_key_env: Some("OPENAI_API_KEY".to_string()),
                    timeout_ms: Some(60_000),
                    ..Default::default()
                },
            ),
            (
                "deepseek".to_string(),
                ProviderSettings {
                    api_key_env: Some("DEEPSEEK_API_KEY".to_string()),
                    ..Default::default()
                },
            ),
            (
                "ollama".to_string(),
                ProviderSettings {
                    base_url: Some("http://localhost:11434".to_string()),
                    ..Default::default()
                },
            ),
        ])),
        scheduler: Some(SchedulerConfig {
            default_strategy: Some("capability_first".to_string()),
            use_defaults: Some(true),
        }),
        engine: Some(EngineConfig {
            history_limit: Some(10),
            skill_timeout_ms: Some(30_000),
            trust_undeclared_calls: Some(true),
            ..Default::default()
        }),
        cache: Some(CacheConfig {
            ttl_secs: Some(3600),
            capacity: Some(1000),
        }),
        breaker: Some(BreakerConfig {
            failure_threshold: Some(5),
            reset_timeout_ms: Some(30_000),
            success_threshold: Some(1),
        }),
        log_level: Some("info".to_string()),
    }
}
