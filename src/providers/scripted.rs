// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process provider that replays queued responses.
//!
//! Used by tests and offline demos: every call pops the next scripted reply
//! and records what was sent, so assertions can inspect the exact messages,
//! system prompt and parameters a component produced.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::ProviderError;
use crate::types::{GeneratedImage, GenerationParams, Message, Provider, ProviderResponse};

/// A single scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Response(ProviderResponse),
    /// Fails the call with an API error carrying this message.
    Error(String),
}

/// A request observed by the scripted provider.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub system_prompt: Option<String>,
    pub params: GenerationParams,
}

/// Provider returning canned responses in order.
///
/// Once the queue is drained every call answers with the fallback text.
pub struct ScriptedProvider {
    name: String,
    model: String,
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<RecordedRequest>>,
    fallback_text: String,
}

impl ScriptedProvider {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            name: "Scripted".to_string(),
            model: model.into(),
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            fallback_text: String::new(),
        }
    }

    /// Queue a text response.
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_response(ProviderResponse::text(text))
    }

    /// Queue a full response.
    pub fn with_response(self, response: ProviderResponse) -> Self {
        self.push(ScriptedReply::Response(response));
        self
    }

    /// Queue a failure.
    pub fn with_error(self, message: impl Into<String>) -> Self {
        self.push(ScriptedReply::Error(message.into()));
        self
    }

    /// Text returned after the queue is exhausted.
    pub fn with_fallback_text(mut self, text: impl Into<String>) -> Self {
        self.fallback_text = text.into();
        self
    }

    pub fn push(&self, reply: ScriptedReply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    fn next_reply(&self) -> ScriptedReply {
        self.replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front())
            .unwrap_or_else(|| ScriptedReply::Response(ProviderResponse::text(self.fallback_text.clone())))
    }

    fn record(&self, messages: &[Message], system_prompt: Option<&str>, params: &GenerationParams) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                messages: messages.to_vec(),
                system_prompt: system_prompt.map(str::to_string),
                params: params.clone(),
            });
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn chat(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
        params: &GenerationParams,
    ) -> Result<ProviderResponse, ProviderError> {
        self.record(messages, system_prompt, params);
        match self.next_reply() {
            ScriptedReply::Response(mut response) => {
                response.model.get_or_insert_with(|| self.model.clone());
                Ok(response)
            }
            ScriptedReply::Error(message) => Err(ProviderError::api(message, 500)),
        }
    }

    async fn generate_image(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<GeneratedImage, ProviderError> {
        self.record(&[Message::user(prompt)], None, params);
        match self.next_reply() {
            ScriptedReply::Response(response) => Ok(GeneratedImage {
                url: Some(response.content),
                b64_json: None,
                revised_prompt: None,
            }),
            ScriptedReply::Error(message) => Err(ProviderError::api(message, 500)),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order_then_falls_back() {
        let provider = ScriptedProvider::new("test-model")
            .with_text("first")
            .with_error("boom")
            .with_fallback_text("done");

        let params = GenerationParams::new();
        let first = provider.chat(&[Message::user("a")], None, &params).await.unwrap();
        assert_eq!(first.content, "first");
        assert_eq!(first.model.as_deref(), Some("test-model"));

        let second = provider.chat(&[Message::user("b")], Some("sys"), &params).await;
        assert!(second.is_err());

        let third = provider.chat(&[], None, &params).await.unwrap();
        assert_eq!(third.content, "done");

        let requests = provider.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].system_prompt.as_deref(), Some("sys"));
        assert_eq!(requests[1].messages[0].content, "b");
    }
}
