// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end turns through the execution engine with scripted models.

use std::sync::Arc;

use copilot::app::AppContext;
use copilot::catalog::{
    AgentConfig, CapabilityLink, CatalogStore, ModelBinding, NewModel, NewSupplier, SkillKind,
};
use copilot::config::ResolvedConfig;
use copilot::engine::ExecutionRequest;
use copilot::providers::ScriptedProvider;
use copilot::types::{GenerationParams, ProviderResponse, Role, ToolCall};
use serde_json::json;

struct Fixture {
    app: AppContext,
    model_id: i64,
}

async fn fixture(skills: Option<Vec<&str>>) -> Fixture {
    let store = CatalogStore::open_in_memory().unwrap();
    let app = AppContext::with_catalog(ResolvedConfig::default(), store)
        .await
        .unwrap();

    let model_id = {
        let store = app.catalog.lock().await;
        let supplier = store
            .create_supplier(&NewSupplier {
                name: "scripted".to_string(),
                provider_type: "openai-compatible".to_string(),
                base_url: Some("http://localhost:9".to_string()),
                ..Default::default()
            })
            .unwrap();
        let model = store
            .create_model(&NewModel::chat(supplier.id, "scripted-chat"))
            .unwrap();
        store
            .save_agent(&AgentConfig {
                agent_id: "helper".to_string(),
                name: "Helper".to_string(),
                description: None,
                system_prompt: "You are a helpful assistant.".to_string(),
                model: ModelBinding::Fixed { model_id: model.id },
                skills: skills.map(|s| s.into_iter().map(String::from).collect()),
                capabilities: None,
                params: GenerationParams::new(),
            })
            .unwrap();
        model.id
    };

    Fixture { app, model_id }
}

async fn script(fixture: &Fixture, provider: ScriptedProvider) -> Arc<ScriptedProvider> {
    let provider = Arc::new(provider);
    fixture
        .app
        .llm
        .register_provider(fixture.model_id, provider.clone())
        .await;
    provider
}

/// Tag the fixture model with code_generation at `strength` and add an agent
/// that picks its model through the scheduler.
async fn scheduled_agent(fixture: &Fixture, agent_id: &str, strength: i32, min_strength: i32) {
    let store = fixture.app.catalog.lock().await;
    store
        .link_capability(&CapabilityLink {
            model_id: fixture.model_id,
            capability: "code_generation".to_string(),
            strength,
            confidence: 4,
            auto_tagged: false,
        })
        .unwrap();
    store
        .save_agent(&AgentConfig {
            agent_id: agent_id.to_string(),
            name: "Coder".to_string(),
            description: None,
            system_prompt: "You write code.".to_string(),
            model: ModelBinding::Scheduled {
                required_capabilities: vec!["code_generation".to_string()],
                strategy: "capability_first".to_string(),
                min_strength,
            },
            skills: None,
            capabilities: None,
            params: GenerationParams::new(),
        })
        .unwrap();
}

async fn success_rate(fixture: &Fixture) -> f64 {
    fixture
        .app
        .catalog
        .lock()
        .await
        .get_model(fixture.model_id)
        .unwrap()
        .success_rate
}

// ============================================================================
// Plain answers
// ============================================================================

#[tokio::test]
async fn test_plain_response_is_returned_verbatim() {
    let fixture = fixture(None).await;
    let provider = script(
        &fixture,
        ScriptedProvider::new("scripted-chat").with_text("Hello! How can I help?"),
    )
    .await;

    let outcome = fixture
        .app
        .engine
        .execute(ExecutionRequest::new("helper", "Hi"))
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.response.as_deref(), Some("Hello! How can I help?"));
    assert_eq!(outcome.skill_results.as_ref().unwrap().len(), 0);
    assert_eq!(outcome.capability_results.as_ref().unwrap().len(), 0);
    assert_eq!(outcome.model_responses.as_ref().unwrap().len(), 1);
    assert_eq!(provider.call_count(), 1);

    let request = &provider.requests()[0];
    assert_eq!(request.system_prompt.as_deref(), Some("You are a helpful assistant."));
    assert_eq!(request.messages.last().unwrap().content, "Hi");

    let body = outcome.to_json();
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["skill_results"], json!({}));
    assert_eq!(body["capability_results"], json!({}));
}

#[tokio::test]
async fn test_conversation_history_is_persisted_and_replayed() {
    let fixture = fixture(None).await;
    let provider = script(
        &fixture,
        ScriptedProvider::new("scripted-chat")
            .with_text("Nice to meet you, Ada.")
            .with_text("Your name is Ada."),
    )
    .await;

    let first = fixture
        .app
        .engine
        .execute(ExecutionRequest::new("helper", "I am Ada").with_conversation("conv-1"))
        .await;
    assert!(first.success);

    let second = fixture
        .app
        .engine
        .execute(ExecutionRequest::new("helper", "Who am I?").with_conversation("conv-1"))
        .await;
    assert!(second.success);
    assert_eq!(second.context.history.len(), 2);

    let replayed = &provider.requests()[1].messages;
    assert_eq!(replayed.len(), 3);
    assert_eq!(replayed[0].content, "I am Ada");
    assert_eq!(replayed[1].role, Role::Assistant);

    let stored = fixture
        .app
        .catalog
        .lock()
        .await
        .recent_messages("conv-1", 10)
        .unwrap();
    assert_eq!(stored.len(), 4);
}

// ============================================================================
// Tool rounds
// ============================================================================

#[tokio::test]
async fn test_skill_call_runs_second_round() {
    let fixture = fixture(Some(vec!["shout"])).await;
    let skill = fixture
        .app
        .catalog
        .lock()
        .await
        .create_skill(
            "shout",
            Some("Upper-case a phrase"),
            &SkillKind::Prompt {
                template: "Shout this: {{text}}".to_string(),
            },
        )
        .unwrap();

    let provider = script(
        &fixture,
        ScriptedProvider::new("scripted-chat")
            .with_text(r#"Let me do that. {"type": "skill_call", "name": "shout", "arguments": {"text": "hello"}}"#)
            .with_text("HELLO")
            .with_text("Here it is: HELLO"),
    )
    .await;

    let outcome = fixture
        .app
        .engine
        .execute(ExecutionRequest::new("helper", "Shout hello"))
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.response.as_deref(), Some("Here it is: HELLO"));
    let skills = outcome.skill_results.unwrap();
    assert_eq!(skills["shout"]["success"], json!(true));
    assert_eq!(skills["shout"]["output"], json!("HELLO"));
    assert_eq!(outcome.model_responses.unwrap().len(), 2);

    let requests = provider.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[1].messages[0].content, "Shout this: hello");
    let last = requests[2].messages.last().unwrap();
    assert_eq!(last.role, Role::System);
    assert!(last.content.starts_with("Tool results:"));
    assert!(last.content.contains("HELLO"));

    let logs = fixture.app.catalog.lock().await.list_skill_logs(skill.id, 10).unwrap();
    assert_eq!(logs.len(), 1);
}

#[tokio::test]
async fn test_undeclared_skill_is_dropped() {
    let fixture = fixture(Some(vec![])).await;
    let provider = script(
        &fixture,
        ScriptedProvider::new("scripted-chat")
            .with_text(r#"{"type": "skill_call", "name": "rm_rf", "arguments": {}}"#),
    )
    .await;

    let outcome = fixture
        .app
        .engine
        .execute(ExecutionRequest::new("helper", "clean up"))
        .await;

    assert!(outcome.success);
    assert!(outcome.skill_results.unwrap().is_empty());
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn test_missing_skill_is_recorded_as_failure() {
    let fixture = fixture(None).await;
    script(
        &fixture,
        ScriptedProvider::new("scripted-chat")
            .with_text(r#"{"type": "skill_call", "name": "missing", "arguments": {}}"#)
            .with_text("Sorry, that skill is unavailable."),
    )
    .await;

    let outcome = fixture
        .app
        .engine
        .execute(ExecutionRequest::new("helper", "use missing"))
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.response.as_deref(), Some("Sorry, that skill is unavailable."));
    assert_eq!(outcome.skill_results.unwrap()["missing"]["success"], json!(false));
}

#[tokio::test]
async fn test_knowledge_capability_via_tool_call() {
    let fixture = fixture(None).await;
    fixture
        .app
        .knowledge
        .add_document("docs", "Tokio", "Tokio is an asynchronous runtime for Rust.")
        .await
        .unwrap();

    let provider = script(
        &fixture,
        ScriptedProvider::new("scripted-chat")
            .with_response(ProviderResponse::text("").with_tool_calls(vec![ToolCall {
                id: "call_1".to_string(),
                name: "capability_call".to_string(),
                input: json!({"name": "knowledge_retrieval", "arguments": {"query": "tokio runtime"}}),
            }]))
            .with_text("Tokio is Rust's async runtime."),
    )
    .await;

    let outcome = fixture
        .app
        .engine
        .execute(ExecutionRequest::new("helper", "What is tokio?"))
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
    let capabilities = outcome.capability_results.unwrap();
    let retrieval = &capabilities["knowledge_retrieval"];
    assert_eq!(retrieval["success"], json!(true));
    assert!(retrieval["output"]["context"].as_str().unwrap().contains("Tokio"));
    assert_eq!(provider.call_count(), 2);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_unknown_agent_fails_with_error_shape() {
    let fixture = fixture(None).await;

    let outcome = fixture
        .app
        .engine
        .execute(ExecutionRequest::new("nobody", "Hi"))
        .await;

    assert!(!outcome.success);
    assert!(outcome.error.as_deref().unwrap().contains("nobody"));
    let body = outcome.to_json();
    assert_eq!(body["success"], json!(false));
    assert!(body.get("response").is_none());
    assert!(body.get("skill_results").is_none());
    assert!(body["context"]["execution_id"].is_string());
}

#[tokio::test]
async fn test_model_error_fails_turn() {
    let fixture = fixture(None).await;
    script(
        &fixture,
        ScriptedProvider::new("scripted-chat").with_error("upstream exploded"),
    )
    .await;

    let outcome = fixture
        .app
        .engine
        .execute(ExecutionRequest::new("helper", "Hi").with_conversation("conv-err"))
        .await;

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("upstream exploded"));
    let stored = fixture
        .app
        .catalog
        .lock()
        .await
        .recent_messages("conv-err", 10)
        .unwrap();
    assert!(stored.is_empty());
}

// ============================================================================
// Scheduled models
// ============================================================================

#[tokio::test]
async fn test_scheduled_agent_success_raises_rate() {
    let fixture = fixture(None).await;
    scheduled_agent(&fixture, "coder", 4, 1).await;
    fixture
        .app
        .catalog
        .lock()
        .await
        .update_model_performance(fixture.model_id, false)
        .unwrap();
    let provider = script(
        &fixture,
        ScriptedProvider::new("scripted-chat").with_text("fn main() {}"),
    )
    .await;

    let outcome = fixture
        .app
        .engine
        .execute(ExecutionRequest::new("coder", "Write an empty program"))
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.response.as_deref(), Some("fn main() {}"));
    assert_eq!(provider.call_count(), 1);
    assert_eq!(
        provider.requests()[0].system_prompt.as_deref(),
        Some("You write code.")
    );
    assert!((success_rate(&fixture).await - 99.1).abs() < 1e-9);
}

#[tokio::test]
async fn test_scheduled_agent_failure_lowers_rate() {
    let fixture = fixture(None).await;
    scheduled_agent(&fixture, "coder", 4, 1).await;
    script(
        &fixture,
        ScriptedProvider::new("scripted-chat").with_error("model overloaded"),
    )
    .await;

    let outcome = fixture
        .app
        .engine
        .execute(ExecutionRequest::new("coder", "Write an empty program"))
        .await;

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("model overloaded"));
    assert!((success_rate(&fixture).await - 99.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_scheduled_agent_without_matching_model_fails() {
    let fixture = fixture(None).await;
    scheduled_agent(&fixture, "coder", 2, 5).await;
    let provider = script(&fixture, ScriptedProvider::new("scripted-chat")).await;

    let outcome = fixture
        .app
        .engine
        .execute(ExecutionRequest::new("coder", "Write an empty program"))
        .await;

    assert!(!outcome.success);
    assert!(outcome.error.as_deref().unwrap().contains("No model satisfies"));
    assert_eq!(provider.call_count(), 0);
    let body = outcome.to_json();
    assert_eq!(body["success"], json!(false));
    assert!(body.get("response").is_none());
    assert!((success_rate(&fixture).await - 100.0).abs() < 1e-9);
}
