// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module.
//!
//! Handles loading, merging, and validation of configuration from multiple sources:
//! - Global config: ~/.copilot/config.json
//! - Workspace config: .copilot.json, .copilot/config.json, copilot.config.json
//!   or copilot.config.yaml
//! - Local config: .copilot.local.json (gitignored, for personal overrides)
//! - CLI options: command-line arguments
//!
//! Configuration is merged with precedence (CLI > local > workspace > global > defaults).

mod loader;
mod merger;
mod types;

// Re-export public types
pub use loader::{
    find_workspace_root, get_example_config, get_global_config_dir, get_global_config_path,
    init_config, load_config_file, load_global_config, load_local_config, load_workspace_config,
    save_workspace_config, CONFIG_FILES, GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILE, LOCAL_CONFIG_FILE,
};

pub use merger::{default_config, merge_config, CliOptions};

pub use types::{
    default_database_path, BreakerConfig, CacheConfig, DatabaseConfig, EngineConfig,
    ProviderSettings, ResolvedBreakerConfig, ResolvedCacheConfig, ResolvedConfig,
    ResolvedEngineConfig, ResolvedSchedulerConfig, SchedulerConfig, WorkspaceConfig,
    DEFAULT_FINAL_ANSWER_PROMPT,
};

use crate::error::ConfigError;
use std::path::Path;

/// Load and merge all configuration sources for a workspace.
///
/// A relative database path from a file is resolved against the workspace
/// root; one given on the command line is used as-is.
pub fn load_config(
    workspace_root: &Path,
    cli_options: CliOptions,
) -> Result<ResolvedConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = load_workspace_config(workspace_root)?;
    let local = load_local_config(workspace_root)?;

    let cli_database = cli_options.database.is_some();
    let mut config = merge_config(global, workspace, local, cli_options);
    if !cli_database && config.database_path.is_relative() {
        config.database_path = workspace_root.join(&config.database_path);
    }

    validate_config(&config)?;
    Ok(config)
}

/// Reject values the runtime cannot work with.
pub fn validate_config(config: &ResolvedConfig) -> Result<(), ConfigError> {
    const STRATEGIES: &[&str] = &[
        "capability_first",
        "cost_effective",
        "performance_optimized",
        "balanced",
    ];

    if !STRATEGIES.contains(&config.scheduler.default_strategy.as_str()) {
        return Err(ConfigError::InvalidValue {
            field: "scheduler.defaultStrategy".to_string(),
            message: format!(
                "'{}' is not one of {}",
                config.scheduler.default_strategy,
                STRATEGIES.join(", ")
            ),
        });
    }

    if config.breaker.failure_threshold == 0 {
        return Err(ConfigError::InvalidValue {
            field: "breaker.failureThreshold".to_string(),
            message: "must be at least 1".to_string(),
        });
    }

    if config.cache.capacity == 0 {
        return Err(ConfigError::InvalidValue {
            field: "cache.capacity".to_string(),
            message: "must be at least 1".to_string(),
        });
    }

    Ok(())
}
