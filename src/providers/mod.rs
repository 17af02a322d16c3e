// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! AI provider implementations.
//!
//! Every supplier the copilot talks to speaks the OpenAI Chat Completions
//! dialect, so a single [`openai::OpenAIProvider`] covers:
//!
//! - OpenAI (`https://api.openai.com/v1`)
//! - DeepSeek (`https://api.deepseek.com/v1`)
//! - Ollama (`http://localhost:11434/v1`, no API key)
//! - any other OpenAI-compatible endpoint
//!
//! [`scripted::ScriptedProvider`] is an in-process provider that replays
//! canned responses; the engine and LLM service tests are built on it.
//!
//! # Example
//!
//! ```rust,ignore
//! use copilot::providers::{create_provider, ProviderType};
//! use copilot::types::ProviderConfig;
//!
//! let config = ProviderConfig::new("your-api-key", "deepseek-chat");
//! let provider = create_provider(ProviderType::DeepSeek, config)?;
//! ```

pub mod openai;
pub mod scripted;

pub use openai::OpenAIProvider;
pub use scripted::{ScriptedProvider, ScriptedReply};

use crate::error::ProviderError;
use crate::types::{BoxedProvider, ProviderConfig};

/// Supported provider types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderType {
    /// OpenAI GPT models
    OpenAI,
    /// DeepSeek models
    DeepSeek,
    /// Ollama local models
    Ollama,
    /// Any OpenAI-compatible API
    OpenAICompatible,
}

impl ProviderType {
    /// Get the default model for this provider.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o",
            Self::DeepSeek => "deepseek-chat",
            Self::Ollama => "llama3.2",
            Self::OpenAICompatible => "gpt-4o",
        }
    }

    /// Get the default base URL for this provider.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAI => openai::OPENAI_BASE_URL,
            Self::DeepSeek => openai::DEEPSEEK_BASE_URL,
            Self::Ollama => openai::OLLAMA_BASE_URL,
            Self::OpenAICompatible => openai::OPENAI_BASE_URL,
        }
    }

    /// Check if this provider requires an API key.
    pub fn requires_api_key(&self) -> bool {
        match self {
            Self::OpenAI | Self::DeepSeek => true,
            Self::Ollama | Self::OpenAICompatible => false,
        }
    }

    /// Environment variable holding this provider's API key, if any.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Self::OpenAI | Self::OpenAICompatible => Some("OPENAI_API_KEY"),
            Self::DeepSeek => Some("DEEPSEEK_API_KEY"),
            Self::Ollama => None,
        }
    }

    /// Lowercase key used for supplier lookups and parameter rules.
    pub fn key(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::DeepSeek => "deepseek",
            Self::Ollama => "ollama",
            Self::OpenAICompatible => "openai-compatible",
        }
    }
}

/// Error type for parsing a provider type from a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseProviderTypeError;

impl std::fmt::Display for ParseProviderTypeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid provider type")
    }
}

impl std::error::Error for ParseProviderTypeError {}

impl std::str::FromStr for ProviderType {
    type Err = ParseProviderTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "gpt" => Ok(Self::OpenAI),
            "deepseek" => Ok(Self::DeepSeek),
            "ollama" => Ok(Self::Ollama),
            "openai-compatible" | "openai_compatible" | "compatible" => Ok(Self::OpenAICompatible),
            _ => Err(ParseProviderTypeError),
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAI => write!(f, "OpenAI"),
            Self::DeepSeek => write!(f, "DeepSeek"),
            Self::Ollama => write!(f, "Ollama"),
            Self::OpenAICompatible => write!(f, "OpenAI-Compatible"),
        }
    }
}

/// Normalize an Ollama base URL to its OpenAI-compatible `/v1` root.
///
/// Trailing slashes are stripped, native API paths (`/api`, `/api/chat`,
/// `/api/generate`) are rewritten to `/v1`, and `/v1` is appended when
/// missing. An empty input yields the local default.
pub fn normalize_ollama_base_url(url: Option<&str>) -> String {
    let trimmed = url.map(str::trim).unwrap_or_default().trim_end_matches('/');
    if trimmed.is_empty() {
        return openai::OLLAMA_BASE_URL.to_string();
    }

    let mut base = trimmed.to_string();
    if !base.starts_with("http://") && !base.starts_with("https://") {
        base = format!("http://{base}");
    }

    for native in ["/api/chat", "/api/generate", "/api"] {
        if let Some(stripped) = base.strip_suffix(native) {
            base = stripped.to_string();
            break;
        }
    }

    if base.ends_with("/v1") {
        base
    } else {
        format!("{base}/v1")
    }
}

/// Create a provider instance from type and configuration.
///
/// # Errors
///
/// Returns an error if required configuration is missing (e.g., API key for
/// OpenAI/DeepSeek, base URL for a generic compatible endpoint).
pub fn create_provider(
    provider_type: ProviderType,
    config: ProviderConfig,
) -> Result<BoxedProvider, ProviderError> {
    let model = config
        .model
        .clone()
        .unwrap_or_else(|| provider_type.default_model().to_string());

    match provider_type {
        ProviderType::OpenAI | ProviderType::DeepSeek => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                ProviderError::NotConfigured(format!("API key required for {provider_type}"))
            })?;

            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| provider_type.default_base_url().to_string());

            Ok(Box::new(OpenAIProvider::new(Some(api_key), model, base_url, config)?))
        }
        ProviderType::Ollama => {
            let base_url = normalize_ollama_base_url(config.base_url.as_deref());
            Ok(Box::new(OpenAIProvider::new(None, model, base_url, config)?))
        }
        ProviderType::OpenAICompatible => {
            let base_url = config.base_url.clone().ok_or_else(|| {
                ProviderError::NotConfigured("base_url required for OpenAI-Compatible".to_string())
            })?;

            Ok(Box::new(OpenAIProvider::new(config.api_key.clone(), model, base_url, config)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_type_parsing() {
        assert_eq!("openai".parse::<ProviderType>().unwrap(), ProviderType::OpenAI);
        assert_eq!("DeepSeek".parse::<ProviderType>().unwrap(), ProviderType::DeepSeek);
        assert_eq!("ollama".parse::<ProviderType>().unwrap(), ProviderType::Ollama);
        assert_eq!(
            "openai-compatible".parse::<ProviderType>().unwrap(),
            ProviderType::OpenAICompatible
        );
        assert!("invalid".parse::<ProviderType>().is_err());
    }

    #[test]
    fn test_provider_type_defaults() {
        assert!(ProviderType::OpenAI.requires_api_key());
        assert!(ProviderType::DeepSeek.requires_api_key());
        assert!(!ProviderType::Ollama.requires_api_key());
        assert_eq!(ProviderType::DeepSeek.api_key_env(), Some("DEEPSEEK_API_KEY"));
        assert_eq!(ProviderType::Ollama.default_base_url(), "http://localhost:11434/v1");
    }

    #[test]
    fn test_normalize_ollama_base_url() {
        assert_eq!(normalize_ollama_base_url(None), "http://localhost:11434/v1");
        assert_eq!(normalize_ollama_base_url(Some("")), "http://localhost:11434/v1");
        assert_eq!(
            normalize_ollama_base_url(Some("http://gpu-box:11434/")),
            "http://gpu-box:11434/v1"
        );
        assert_eq!(
            normalize_ollama_base_url(Some("http://gpu-box:11434/api/chat")),
            "http://gpu-box:11434/v1"
        );
        assert_eq!(
            normalize_ollama_base_url(Some("http://gpu-box:11434/api")),
            "http://gpu-box:11434/v1"
        );
        assert_eq!(
            normalize_ollama_base_url(Some("http://gpu-box:11434/v1//")),
            "http://gpu-box:11434/v1"
        );
        assert_eq!(normalize_ollama_base_url(Some("gpu-box:11434")), "http://gpu-box:11434/v1");
    }

    #[test]
    fn test_create_provider_requires_key() {
        let result = create_provider(ProviderType::OpenAI, ProviderConfig::default());
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));

        let result = create_provider(ProviderType::OpenAICompatible, ProviderConfig::default());
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
    }

    #[test]
    fn test_create_ollama_provider() {
        let config = ProviderConfig::default()
            .with_model("qwen2.5")
            .with_base_url("http://localhost:11434/api/generate");
        let provider = create_provider(ProviderType::Ollama, config).unwrap();
        assert_eq!(provider.name(), "Ollama");
        assert_eq!(provider.model(), "qwen2.5");
    }
}
