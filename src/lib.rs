// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Copilot - backend core for an AI copilot.
//!
//! Model scheduling with fallback and load balancing, a one-round agent
//! execution engine, skills, knowledge retrieval and the provider plumbing
//! around them.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`types`] - Core type definitions (Message, ProviderResponse, Provider trait)
//! - [`error`] - Error types and result aliases
//! - [`config`] - Configuration loading and merging
//! - [`providers`] - OpenAI-compatible providers (OpenAI, DeepSeek, Ollama)
//! - [`telemetry`] - Tracing setup and the API monitor
//! - [`catalog`] - SQLite catalog of suppliers, models, agents, skills and logs
//! - [`capabilities`] - Capability taxonomy and automatic model tagging
//! - [`params`] - Canonical/supplier parameter translation
//! - [`scheduler`] - Model selection, fallback and load balancing
//! - [`llm`] - Catalog-aware model access with pooling and circuit breakers
//! - [`knowledge`] - Keyword retrieval over knowledge documents
//! - [`skills`] - Prompt and sandboxed script skills
//! - [`engine`] - Agent execution engine
//! - [`services`] - Service registry, message queue and circuit breaker
//! - [`app`] - Application context wiring everything together
//!
//! # Example
//!
//! ```rust,ignore
//! use copilot::app::AppContext;
//! use copilot::config::{load_config, CliOptions};
//! use copilot::engine::ExecutionRequest;
//!
//! let config = load_config(".".as_ref(), CliOptions::default())?;
//! let app = AppContext::init(config).await?;
//! let outcome = app.engine.execute(ExecutionRequest::new("helper", "Hello!")).await;
//! app.shutdown().await;
//! ```

pub mod app;
pub mod capabilities;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod params;
pub mod providers;
pub mod scheduler;
pub mod services;
pub mod skills;
pub mod telemetry;
pub mod types;

// Re-export commonly used types at crate root
pub use app::AppContext;
pub use engine::{AgentExecutionEngine, ExecutionOutcome, ExecutionRequest};
pub use error::{
    ConfigError, ExecutionError, ProviderError, Result, SchedulerError, ServiceError, SkillError,
    StoreError,
};
pub use providers::{create_provider, OpenAIProvider, ProviderType};
pub use scheduler::{AgentModelScheduler, ModelSelectionCriteria, SchedulingResult, SchedulingStrategy};
pub use types::{
    BoxedProvider, GenerationParams, Message, ModelInfo, Provider, ProviderConfig,
    ProviderResponse, Role, SharedProvider, StopReason, TokenUsage, ToolCall,
};

/// Copilot version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
