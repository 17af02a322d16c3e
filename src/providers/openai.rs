// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! OpenAI-compatible provider implementation.
//!
//! This module provides a [`Provider`] implementation for OpenAI and any
//! OpenAI-compatible API (DeepSeek, Ollama, Together, Groq, etc.).
//!
//! # Supported Endpoints
//!
//! - **OpenAI** - `https://api.openai.com/v1` (default)
//! - **DeepSeek** - `https://api.deepseek.com/v1`
//! - **Ollama** - `http://localhost:11434/v1` (no API key needed)
//! - **Any OpenAI-compatible** - Just set base_url
//!
//! # API Reference
//!
//! See [OpenAI Chat Completions API](https://platform.openai.com/docs/api-reference/chat)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(feature = "telemetry")]
use tracing::debug;

use crate::error::ProviderError;
use crate::types::{
    GeneratedImage, GenerationParams, Message, ModelInfo, Provider, ProviderConfig,
    ProviderResponse, StopReason, TokenUsage, ToolCall,
};

/// Default OpenAI API base URL.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default DeepSeek API base URL.
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";

/// Default Ollama API base URL.
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// Default max tokens if not specified.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// OpenAI-compatible provider.
pub struct OpenAIProvider {
    client: Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: Option<f32>,
    provider_name: String,
}

impl OpenAIProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        api_key: Option<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        config: ProviderConfig,
    ) -> Result<Self, ProviderError> {
        let timeout = config
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        let provider_name = Self::detect_provider_name(&base_url);

        Ok(Self {
            client,
            api_key,
            model: model.into(),
            base_url,
            max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: config.temperature,
            provider_name,
        })
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Detect provider name from base URL.
    fn detect_provider_name(base_url: &str) -> String {
        if base_url.contains("openai.com") {
            "OpenAI".to_string()
        } else if base_url.contains("deepseek") {
            "DeepSeek".to_string()
        } else if base_url.contains(":11434") || base_url.contains("ollama") {
            "Ollama".to_string()
        } else if base_url.contains("together") {
            "Together".to_string()
        } else if base_url.contains("groq") {
            "Groq".to_string()
        } else {
            "OpenAI-Compatible".to_string()
        }
    }

    /// Build the request body for the Chat Completions API.
    fn build_request(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
        params: &GenerationParams,
    ) -> ChatRequest {
        let mut api_messages: Vec<ChatMessage> = Vec::with_capacity(messages.len() + 1);

        if let Some(system) = system_prompt {
            api_messages.push(ChatMessage {
                role: "system".to_string(),
                content: Some(system.to_string()),
                tool_calls: None,
                tool_call_id: None,
            });
        }

        api_messages.extend(messages.iter().map(ChatMessage::from));

        let mut extra = params.clone();
        extra
            .entry("max_tokens")
            .or_insert_with(|| serde_json::json!(self.max_tokens));
        if let Some(temperature) = self.temperature {
            extra
                .entry("temperature")
                .or_insert_with(|| serde_json::json!(temperature));
        }
        // Request-level fields are owned by the provider.
        extra.remove("model");
        extra.remove("messages");
        extra.remove("stream");

        ChatRequest {
            model: self.model.clone(),
            messages: api_messages,
            stream: false,
            params: extra,
        }
    }

    /// Get context window size for a model.
    fn get_context_window(model: &str) -> u32 {
        if model.contains("gpt-4o") || model.contains("gpt-4-turbo") {
            128_000
        } else if model.contains("gpt-4-32k") {
            32_768
        } else if model.contains("gpt-4") {
            8_192
        } else if model.contains("gpt-3.5-turbo-16k") {
            16_384
        } else if model.contains("gpt-3.5") {
            4_096
        } else if model.contains("deepseek") {
            64_000
        } else if model.contains("o1") || model.contains("o3") {
            200_000
        } else {
            8_192
        }
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key {
            Some(ref api_key) => req.header("authorization", format!("Bearer {}", api_key)),
            None => req,
        }
    }

    /// Handle an error response from the API.
    fn handle_error_response(&self, status_code: u16, body: &str) -> ProviderError {
        if let Ok(error) = serde_json::from_str::<ApiError>(body) {
            let message = error.error.message;
            match error.error.error_type.as_deref() {
                Some("authentication_error") | Some("invalid_api_key") => {
                    ProviderError::AuthError(message)
                }
                Some("rate_limit_error") | Some("rate_limit_exceeded") => {
                    ProviderError::RateLimited(message)
                }
                Some("model_not_found") => ProviderError::ModelNotFound(message),
                Some("context_length_exceeded") => ProviderError::ContextWindowExceeded {
                    used: 0,
                    limit: self.context_window(),
                },
                _ => match status_code {
                    401 | 403 => ProviderError::AuthError(message),
                    429 => ProviderError::RateLimited(message),
                    _ => ProviderError::api(message, status_code),
                },
            }
        } else {
            match status_code {
                401 | 403 => ProviderError::AuthError(body.to_string()),
                429 => ProviderError::RateLimited(body.to_string()),
                _ => ProviderError::api(body.to_string(), status_code),
            }
        }
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    async fn chat(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
        params: &GenerationParams,
    ) -> Result<ProviderResponse, ProviderError> {
        let request = self.build_request(messages, system_prompt, params);

        #[cfg(feature = "telemetry")]
        debug!(provider = %self.provider_name, model = %self.model, messages = messages.len(), "Sending chat request");

        let req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("content-type", "application/json");

        let response = self
            .authorized(req)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(DEFAULT_TIMEOUT_SECS * 1000)
                } else {
                    ProviderError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(self.handle_error_response(status.as_u16(), &error_text));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        parse_chat_response(body)
    }

    async fn generate_image(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<GeneratedImage, ProviderError> {
        let mut body = params.clone();
        body.insert("model".to_string(), serde_json::json!(self.model));
        body.insert("prompt".to_string(), serde_json::json!(prompt));
        body.entry("n").or_insert_with(|| serde_json::json!(1));

        let req = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .header("content-type", "application/json");

        let response = self
            .authorized(req)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(self.handle_error_response(status.as_u16(), &error_text));
        }

        let images: ImagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        images
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ParseError("image response contained no data".to_string()))
    }

    fn name(&self) -> &str {
        &self.provider_name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> u32 {
        Self::get_context_window(&self.model)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let req = self.client.get(format!("{}/models", self.base_url));
        let response = self
            .authorized(req)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(self.handle_error_response(status.as_u16(), &error_text));
        }

        let models: ModelsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        Ok(models
            .data
            .into_iter()
            .map(|m| ModelInfo {
                context_window: Some(Self::get_context_window(&m.id)),
                id: m.id,
                provider: self.provider_name.clone(),
            })
            .collect())
    }
}

/// Convert a Chat Completions response body into a [`ProviderResponse`].
///
/// The first choice's message is kept verbatim in `raw_message` so callers
/// can read non-standard fields.
pub(crate) fn parse_chat_response(body: serde_json::Value) -> Result<ProviderResponse, ProviderError> {
    let raw_message = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .cloned();

    let api_response: ChatResponse =
        serde_json::from_value(body).map_err(|e| ProviderError::ParseError(e.to_string()))?;

    let mut response: ProviderResponse = api_response.into();
    response.raw_message = raw_message;
    Ok(response)
}

// ============================================================================
// API Types
// ============================================================================

/// Request body for Chat Completions API.
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(flatten)]
    params: GenerationParams,
}

/// Chat message format.
#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

/// Tool call in a message.
#[derive(Debug, Serialize, Deserialize)]
struct ChatToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    call_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function: Option<ChatFunction>,
}

/// Function details in a tool call.
#[derive(Debug, Serialize, Deserialize)]
struct ChatFunction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<String>,
}

/// Chat completion response.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

/// A choice in the response.
#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

/// Token usage.
#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Models list response.
#[derive(Debug, Deserialize)]
struct ModelsResponse {
    data: Vec<ModelData>,
}

/// Model data from list.
#[derive(Debug, Deserialize)]
struct ModelData {
    id: String,
}

/// Image generation response.
#[derive(Debug, Deserialize)]
struct ImagesResponse {
    data: Vec<GeneratedImage>,
}

/// API error response.
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

// ============================================================================
// Type Conversions
// ============================================================================

impl From<&Message> for ChatMessage {
    fn from(msg: &Message) -> Self {
        let tool_calls = if msg.tool_calls.is_empty() {
            None
        } else {
            Some(
                msg.tool_calls
                    .iter()
                    .map(|tc| ChatToolCall {
                        id: Some(tc.id.clone()),
                        call_type: Some("function".to_string()),
                        function: Some(ChatFunction {
                            name: Some(tc.name.clone()),
                            arguments: Some(tc.input.to_string()),
                        }),
                    })
                    .collect(),
            )
        };

        Self {
            role: msg.role.as_str().to_string(),
            content: Some(msg.content.clone()),
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
        }
    }
}

impl From<ChatResponse> for ProviderResponse {
    fn from(response: ChatResponse) -> Self {
        let choice = response.choices.into_iter().next();

        let (content, tool_calls, stop_reason) = if let Some(choice) = choice {
            let content = choice.message.content.unwrap_or_default();

            let tool_calls: Vec<ToolCall> = choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .enumerate()
                .filter_map(|(index, tc)| {
                    let func = tc.function?;
                    let name = func.name?;
                    let id = tc.id.unwrap_or_else(|| format!("call_{index}"));
                    let input: serde_json::Value = func
                        .arguments
                        .and_then(|s| serde_json::from_str(&s).ok())
                        .unwrap_or_else(|| serde_json::json!({}));
                    Some(ToolCall { id, name, input })
                })
                .collect();

            let stop_reason = match choice.finish_reason.as_deref() {
                Some("tool_calls") => StopReason::ToolUse,
                Some("length") => StopReason::MaxTokens,
                _ if !tool_calls.is_empty() => StopReason::ToolUse,
                _ => StopReason::EndTurn,
            };

            (content, tool_calls, stop_reason)
        } else {
            (String::new(), Vec::new(), StopReason::EndTurn)
        };

        Self {
            content,
            tool_calls,
            stop_reason,
            model: response.model,
            usage: response.usage.map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            }),
            raw_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider(base_url: &str) -> OpenAIProvider {
        OpenAIProvider::new(
            Some("test-key".to_string()),
            "gpt-4o",
            base_url,
            ProviderConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_provider_name_detection() {
        assert_eq!(OpenAIProvider::detect_provider_name("https://api.openai.com/v1"), "OpenAI");
        assert_eq!(OpenAIProvider::detect_provider_name("https://api.deepseek.com/v1"), "DeepSeek");
        assert_eq!(OpenAIProvider::detect_provider_name("http://localhost:11434/v1"), "Ollama");
        assert_eq!(OpenAIProvider::detect_provider_name("https://custom.example.com"), "OpenAI-Compatible");
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let p = provider("https://api.openai.com/v1/");
        assert_eq!(p.base_url(), "https://api.openai.com/v1");
    }

    #[test]
    fn test_context_window() {
        assert_eq!(OpenAIProvider::get_context_window("gpt-4o"), 128_000);
        assert_eq!(OpenAIProvider::get_context_window("gpt-4"), 8_192);
        assert_eq!(OpenAIProvider::get_context_window("deepseek-chat"), 64_000);
    }

    #[test]
    fn test_build_request_merges_params() {
        let p = provider(OPENAI_BASE_URL);
        let mut params = GenerationParams::new();
        params.insert("temperature".to_string(), json!(0.2));
        params.insert("model".to_string(), json!("should-be-ignored"));

        let request = p.build_request(&[Message::user("hi")], Some("be brief"), &params);
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["model"], "gpt-4o");
        assert_eq!(value["temperature"], 0.2);
        assert_eq!(value["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_ollama_request_keeps_caller_limits() {
        let p = provider(&crate::providers::normalize_ollama_base_url(Some("localhost:11434")));
        let canonical: GenerationParams = json!({"max_tokens": 256, "frequency_penalty": 0.5})
            .as_object()
            .cloned()
            .unwrap();
        let params = crate::params::ParameterNormalizer::new().denormalize_parameters(
            "ollama",
            crate::catalog::ModelType::Chat,
            &canonical,
        );

        let request = p.build_request(&[Message::user("hi")], None, &params);
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["max_tokens"], 256);
        assert_eq!(value["frequency_penalty"], 0.5);
        assert!(value.get("num_predict").is_none());
        assert!(value.get("repeat_penalty").is_none());
    }

    #[test]
    fn test_parse_chat_response_with_tool_calls() {
        let body = json!({
            "model": "gpt-4o",
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "web_search", "arguments": "{\"query\":\"rust\"}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });

        let response = parse_chat_response(body).unwrap();
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "web_search");
        assert_eq!(response.tool_calls[0].input["query"], "rust");
        assert_eq!(response.usage.unwrap().total(), 15);
        assert!(response.raw_message.is_some());
    }

    #[test]
    fn test_parse_chat_response_keeps_custom_fields() {
        let body = json!({
            "choices": [{
                "finish_reason": "stop",
                "message": {
                    "role": "assistant",
                    "content": "ok",
                    "skill_calls": [{"name": "summarize", "arguments": {}}]
                }
            }]
        });

        let response = parse_chat_response(body).unwrap();
        assert_eq!(response.content, "ok");
        let raw = response.raw_message.unwrap();
        assert_eq!(raw["skill_calls"][0]["name"], "summarize");
    }

    #[test]
    fn test_error_mapping() {
        let p = provider(OPENAI_BASE_URL);
        let body = r#"{"error":{"message":"slow down","type":"rate_limit_exceeded"}}"#;
        assert!(p.handle_error_response(429, body).is_rate_limited());

        let err = p.handle_error_response(401, "unauthorized");
        assert!(matches!(err, ProviderError::AuthError(_)));

        let err = p.handle_error_response(500, "boom");
        assert!(matches!(err, ProviderError::ApiError { status_code: Some(500), .. }));
    }
}
