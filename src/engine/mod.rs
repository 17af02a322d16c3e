// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent execution engine.
//!
//! [`AgentExecutionEngine::execute`] runs one conversational turn for one
//! agent: a first model call, at most one round of skill and capability
//! calls, and a final model call when that round produced results. Nothing
//! is retried. Any failure ends the turn with an error outcome that carries
//! the context built so far.
//!
//! # Example
//!
//! ```rust,ignore
//! use copilot::engine::ExecutionRequest;
//!
//! let outcome = app.engine.execute(
//!     ExecutionRequest::new("support-bot", "How do I reset my password?")
//!         .with_conversation("conv-42"),
//! ).await;
//! println!("{}", outcome.to_json());
//! ```

pub mod agents;
pub mod cache;
pub mod context;
pub mod intents;

pub use agents::AgentConfigCache;
pub use cache::{context_key, history_key, CacheBackend, MemoryCache};
pub use context::{CapabilityOutcome, ExecutionContext, ExecutionStep, ModelResponseRecord};
pub use intents::{parse_intents, validate_calls, CallKind, IntentSource, ParsedCall};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::capabilities::{taxonomy, BuiltinCapability};
use crate::catalog::{AgentConfig, ConversationMessage, ModelBinding, SharedCatalog};
use crate::config::ResolvedEngineConfig;
use crate::error::{ExecutionError, SkillError};
use crate::knowledge::{format_results, KnowledgeBase, DEFAULT_TOP_K};
use crate::llm::LlmService;
use crate::scheduler::{
    AgentModelScheduler, ModelSelectionCriteria, SchedulingResult, SchedulingStrategy,
};
use crate::services::MessageQueue;
use crate::skills::{SkillExecutor, SkillInvocation};
use crate::types::{Message, ProviderResponse, Role};

// ============================================================================
// Requests and outcomes
// ============================================================================

/// Input for one turn.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub agent_id: String,
    pub user_input: String,
    pub conversation_id: Option<String>,
    pub user_id: Option<String>,
    /// Canonical parameters; override the agent's own
    pub params: crate::types::GenerationParams,
}

impl ExecutionRequest {
    pub fn new(agent_id: impl Into<String>, user_input: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            user_input: user_input.into(),
            conversation_id: None,
            user_id: None,
            params: Default::default(),
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_params(mut self, params: crate::types::GenerationParams) -> Self {
        self.params = params;
        self
    }
}

/// Result of a turn. Serializes to the success or the error shape.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub context: ExecutionContext,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_responses: Option<Vec<ModelResponseRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill_results: Option<BTreeMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability_results: Option<BTreeMap<String, Value>>,
}

impl ExecutionOutcome {
    fn completed(response: String, context: ExecutionContext, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            response: Some(response),
            error: None,
            model_responses: Some(context.model_responses.clone()),
            skill_results: Some(context.skill_results.clone()),
            capability_results: Some(context.capability_results.clone()),
            context,
            execution_time_ms,
        }
    }

    fn failed(error: String, context: ExecutionContext, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            response: None,
            error: Some(error),
            context,
            execution_time_ms,
            model_responses: None,
            skill_results: None,
            capability_results: None,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| json!({ "success": false, "error": e.to_string() }))
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Everything the engine needs, built by the application context.
pub struct EngineOptions {
    pub catalog: SharedCatalog,
    pub llm: Arc<LlmService>,
    pub scheduler: AgentModelScheduler,
    pub skills: Arc<SkillExecutor>,
    pub knowledge: Arc<KnowledgeBase>,
    pub cache: Arc<dyn CacheBackend>,
    pub config: ResolvedEngineConfig,
    /// Let the scheduler consult configured default models
    pub use_defaults: bool,
    /// Receives `execution.completed` / `execution.failed` events
    pub events: Option<Arc<MessageQueue>>,
}

/// The model serving a turn.
struct ModelChoice {
    model_id: i64,
    /// Present for scheduled bindings
    schedule: Option<SchedulingResult>,
}

pub struct AgentExecutionEngine {
    catalog: SharedCatalog,
    llm: Arc<LlmService>,
    scheduler: AgentModelScheduler,
    skills: Arc<SkillExecutor>,
    knowledge: Arc<KnowledgeBase>,
    cache: Arc<dyn CacheBackend>,
    agents: AgentConfigCache,
    config: ResolvedEngineConfig,
    use_defaults: bool,
    events: Option<Arc<MessageQueue>>,
}

/// Topic for finished turns.
pub const EXECUTION_COMPLETED_TOPIC: &str = "execution.completed";
/// Topic for failed turns.
pub const EXECUTION_FAILED_TOPIC: &str = "execution.failed";

impl AgentExecutionEngine {
    pub fn new(options: EngineOptions) -> Self {
        let agents = AgentConfigCache::new(options.catalog.clone(), options.config.agent_cache_size);
        Self {
            catalog: options.catalog,
            llm: options.llm,
            scheduler: options.scheduler,
            skills: options.skills,
            knowledge: options.knowledge,
            cache: options.cache,
            agents,
            config: options.config,
            use_defaults: options.use_defaults,
            events: options.events,
        }
    }

    pub fn agent_cache(&self) -> &AgentConfigCache {
        &self.agents
    }

    /// Run one turn. Never fails; errors are reported in the outcome.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome {
        let start = Instant::now();
        let mut ctx = ExecutionContext::new(
            request.agent_id.clone(),
            request.conversation_id.clone(),
            request.user_id.clone(),
            request.params.clone(),
        );

        let result = self.run_turn(&mut ctx, &request).await;
        let elapsed = start.elapsed();
        let execution_time_ms = elapsed.as_millis() as u64;
        self.llm
            .monitor()
            .record_operation("engine.execute", elapsed, result.is_ok());

        let outcome = match result {
            Ok(response) => {
                ctx.advance(ExecutionStep::Completed);
                info!(
                    execution_id = %ctx.execution_id,
                    agent_id = %ctx.agent_id,
                    model_calls = ctx.model_responses.len(),
                    skills = ctx.skill_results.len(),
                    capabilities = ctx.capability_results.len(),
                    duration_ms = execution_time_ms,
                    "Execution completed"
                );
                ExecutionOutcome::completed(response, ctx, execution_time_ms)
            }
            Err(e) => {
                error!(
                    execution_id = %ctx.execution_id,
                    agent_id = %ctx.agent_id,
                    step = %ctx.current_step,
                    error = %e,
                    "Execution failed"
                );
                ctx.advance(ExecutionStep::Failed);
                ExecutionOutcome::failed(e.to_string(), ctx, execution_time_ms)
            }
        };

        match serde_json::to_value(&outcome.context) {
            Ok(value) => {
                self.cache
                    .set(&context_key(&outcome.context.execution_id), value, None)
                    .await
            }
            Err(e) => warn!(error = %e, "Failed to serialize execution context"),
        }
        self.publish_event(&outcome).await;

        outcome
    }

    async fn publish_event(&self, outcome: &ExecutionOutcome) {
        let Some(queue) = &self.events else {
            return;
        };
        let topic = if outcome.success {
            EXECUTION_COMPLETED_TOPIC
        } else {
            EXECUTION_FAILED_TOPIC
        };
        let payload = json!({
            "execution_id": outcome.context.execution_id,
            "agent_id": outcome.context.agent_id,
            "conversation_id": outcome.context.conversation_id,
            "success": outcome.success,
            "error": outcome.error,
            "execution_time_ms": outcome.execution_time_ms,
        });
        if let Err(e) = queue.publish_message(topic, payload).await {
            debug!(topic, error = %e, "Execution event not published");
        }
    }

    async fn run_turn(
        &self,
        ctx: &mut ExecutionContext,
        request: &ExecutionRequest,
    ) -> Result<String, ExecutionError> {
        if let Some(conversation_id) = ctx.conversation_id.clone() {
            ctx.history = self.load_history(&conversation_id).await?;
        }
        ctx.advance(ExecutionStep::HistoryLoaded);

        let agent = self.agents.get(&request.agent_id).await?;
        let mut params = agent.params.clone();
        params.extend(request.params.clone());
        ctx.params = params;
        ctx.advance(ExecutionStep::AgentLoaded);

        let choice = self.choose_model(&agent, &ctx.execution_id).await?;
        let mut messages = ctx.history.clone();
        messages.push(Message::user(&request.user_input));
        let first = self
            .call_model(ctx, &choice, &messages, &agent.system_prompt)
            .await?;
        ctx.advance(ExecutionStep::ModelCalled);

        let (parsed, source) = parse_intents(&first);
        let found = parsed.len();
        let calls = validate_calls(parsed, &agent, self.config.trust_undeclared_calls);
        ctx.advance(ExecutionStep::IntentsParsed);
        debug!(
            execution_id = %ctx.execution_id,
            source = ?source,
            found,
            accepted = calls.len(),
            "Parsed call intents"
        );

        if !calls.is_empty() {
            self.run_calls(ctx, &agent, choice.model_id, &calls, &request.user_input)
                .await?;
            ctx.advance(ExecutionStep::ToolsExecuted);
        }

        let response = if ctx.has_tool_results() {
            let results = json!({
                "skill_results": ctx.skill_results,
                "capability_results": ctx.capability_results,
            });
            let results = serde_json::to_string_pretty(&results).unwrap_or_default();
            messages.push(Message::assistant(first.content.clone()));
            messages.push(Message::system(format!(
                "Tool results:\n{results}\n\n{}",
                self.config.final_answer_prompt
            )));

            let last = self
                .call_model(ctx, &choice, &messages, &agent.system_prompt)
                .await?;
            ctx.advance(ExecutionStep::FinalAnswer);
            last.content
        } else {
            first.content
        };

        self.persist_turn(ctx, &request.user_input, &response).await?;
        Ok(response)
    }

    // ========================================================================
    // Steps
    // ========================================================================

    /// Recent history from the cache, else from the catalog (refilling the
    /// cache).
    async fn load_history(&self, conversation_id: &str) -> Result<Vec<Message>, ExecutionError> {
        let key = history_key(conversation_id);
        if let Some(cached) = self.cache.get(&key).await {
            match serde_json::from_value::<Vec<Message>>(cached) {
                Ok(history) => return Ok(history),
                Err(e) => warn!(conversation_id, error = %e, "Discarding unreadable cached history"),
            }
        }

        let stored = {
            let store = self.catalog.lock().await;
            store.recent_messages(conversation_id, self.config.history_limit)?
        };
        let history: Vec<Message> = stored.into_iter().map(to_message).collect();
        self.cache_history(conversation_id, &history).await;
        Ok(history)
    }

    async fn cache_history(&self, conversation_id: &str, history: &[Message]) {
        match serde_json::to_value(history) {
            Ok(value) => self.cache.set(&history_key(conversation_id), value, None).await,
            Err(e) => warn!(conversation_id, error = %e, "Failed to serialize history"),
        }
    }

    async fn choose_model(
        &self,
        agent: &AgentConfig,
        execution_id: &str,
    ) -> Result<ModelChoice, ExecutionError> {
        match &agent.model {
            ModelBinding::Fixed { model_id } => Ok(ModelChoice {
                model_id: *model_id,
                schedule: None,
            }),
            ModelBinding::Scheduled {
                required_capabilities,
                strategy,
                min_strength,
            } => {
                let strategy: SchedulingStrategy = strategy.parse()?;
                let criteria = ModelSelectionCriteria {
                    required_capabilities: required_capabilities.clone(),
                    min_strength: *min_strength,
                    ..Default::default()
                };
                let result = self
                    .scheduler
                    .schedule_models(execution_id, &criteria, strategy, self.use_defaults)
                    .await?;
                Ok(ModelChoice {
                    model_id: result.primary_model.model_id,
                    schedule: Some(result),
                })
            }
        }
    }

    async fn call_model(
        &self,
        ctx: &mut ExecutionContext,
        choice: &ModelChoice,
        messages: &[Message],
        system_prompt: &str,
    ) -> Result<ProviderResponse, ExecutionError> {
        let start = Instant::now();
        let result = self
            .llm
            .chat(choice.model_id, messages, Some(system_prompt), &ctx.params)
            .await;

        match result {
            Ok(response) => {
                if choice.schedule.is_some() {
                    self.scheduler.record_success(choice.model_id).await;
                }
                ctx.model_responses.push(ModelResponseRecord {
                    model_id: choice.model_id,
                    content: response.content.clone(),
                    usage: response.usage.clone(),
                    duration_ms: start.elapsed().as_millis() as u64,
                });
                Ok(response)
            }
            Err(e) => {
                if let Some(schedule) = &choice.schedule {
                    let next = self.scheduler.perform_fallback(schedule, choice.model_id).await;
                    debug!(
                        execution_id = %ctx.execution_id,
                        next_primary = next.primary_model.model_id,
                        "Recorded model failure"
                    );
                }
                Err(e.into())
            }
        }
    }

    async fn run_calls(
        &self,
        ctx: &mut ExecutionContext,
        agent: &AgentConfig,
        model_id: i64,
        calls: &[ParsedCall],
        user_input: &str,
    ) -> Result<(), ExecutionError> {
        for call in calls.iter().filter(|c| c.kind == CallKind::Skill) {
            let invocation = SkillInvocation {
                execution_id: Some(ctx.execution_id.clone()),
                agent_id: Some(agent.agent_id.clone()),
                model_id: Some(model_id),
                params: ctx.params.clone(),
            };
            let value = match self.skills.execute(&call.name, &call.arguments, &invocation).await {
                Ok(outcome) => serde_json::to_value(&outcome)
                    .unwrap_or_else(|e| json!({ "skill": call.name, "success": false, "error": e.to_string() })),
                Err(SkillError::Store(e)) => return Err(ExecutionError::Store(e)),
                Err(e) => json!({ "skill": call.name, "success": false, "error": e.to_string() }),
            };
            ctx.record_skill_result(&call.name, value);
        }

        for call in calls.iter().filter(|c| c.kind == CallKind::Capability) {
            let outcome = self
                .run_capability(ctx, agent, model_id, call, user_input)
                .await?;
            let value = serde_json::to_value(&outcome)
                .unwrap_or_else(|e| json!({ "capability": call.name, "success": false, "error": e.to_string() }));
            ctx.record_capability_result(&call.name, value);
        }

        Ok(())
    }

    /// Catalog failures abort the turn; handler failures become a failed
    /// outcome.
    async fn run_capability(
        &self,
        ctx: &ExecutionContext,
        agent: &AgentConfig,
        model_id: i64,
        call: &ParsedCall,
        user_input: &str,
    ) -> Result<CapabilityOutcome, ExecutionError> {
        let result = match BuiltinCapability::from_name(&call.name) {
            Some(builtin) => {
                self.run_builtin(builtin, ctx, agent, model_id, &call.arguments, user_input)
                    .await
            }
            None => {
                self.run_custom(&call.name, ctx, model_id, &call.arguments, user_input)
                    .await
            }
        };

        match result {
            Ok(output) => Ok(CapabilityOutcome {
                capability: call.name.clone(),
                success: true,
                output,
                error: None,
            }),
            Err(ExecutionError::Store(e)) => Err(ExecutionError::Store(e)),
            Err(e) => {
                warn!(capability = %call.name, error = %e, "Capability failed");
                Ok(CapabilityOutcome {
                    capability: call.name.clone(),
                    success: false,
                    output: Value::Null,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    async fn run_builtin(
        &self,
        capability: BuiltinCapability,
        ctx: &ExecutionContext,
        agent: &AgentConfig,
        model_id: i64,
        args: &Value,
        user_input: &str,
    ) -> Result<Value, ExecutionError> {
        match capability {
            BuiltinCapability::TextGeneration => {
                let prompt = arg_str(args, &["prompt", "text", "input"]).unwrap_or(user_input);
                let response = self
                    .llm
                    .chat(model_id, &[Message::user(prompt)], Some(&agent.system_prompt), &ctx.params)
                    .await?;
                Ok(json!({ "text": response.content }))
            }
            BuiltinCapability::CodeGeneration => {
                let task = arg_str(args, &["task", "prompt", "description", "input"])
                    .unwrap_or(user_input);
                let language = arg_str(args, &["language", "lang"]);
                let system = format!(
                    "You are an expert software engineer. Write correct, idiomatic {} code for the request. Reply with the code in a single fenced block followed by a short explanation.",
                    language.unwrap_or("source")
                );
                let response = self
                    .llm
                    .chat(model_id, &[Message::user(task)], Some(&system), &ctx.params)
                    .await?;
                Ok(json!({ "code": response.content, "language": language }))
            }
            BuiltinCapability::ImageGeneration => {
                let prompt = arg_str(args, &["prompt", "description", "input"]).unwrap_or(user_input);
                let image_model = self.image_model(&ctx.execution_id).await.unwrap_or(model_id);
                let image = self
                    .llm
                    .generate_image(image_model, prompt, &ctx.params)
                    .await?;
                Ok(json!({ "model_id": image_model, "image": image }))
            }
            BuiltinCapability::KnowledgeRetrieval => {
                let query = arg_str(args, &["query", "question", "input"]).unwrap_or(user_input);
                let knowledge_base = arg_str(args, &["knowledge_base", "kb"]);
                let top_k = args
                    .get("top_k")
                    .and_then(Value::as_u64)
                    .map(|k| k as usize)
                    .unwrap_or(DEFAULT_TOP_K);
                let hits = self.knowledge.search(knowledge_base, query, top_k).await?;
                Ok(json!({ "context": format_results(&hits), "results": hits }))
            }
        }
    }

    /// Capabilities without a handler: ask the model with a system prompt
    /// naming the capability.
    async fn run_custom(
        &self,
        name: &str,
        ctx: &ExecutionContext,
        model_id: i64,
        args: &Value,
        user_input: &str,
    ) -> Result<Value, ExecutionError> {
        let system = match taxonomy::find(name) {
            Some(spec) => format!(
                "You are a specialist in {} ({}). Complete the request precisely.",
                spec.display_name, spec.description
            ),
            None => format!("You are a specialist in the '{name}' capability. Complete the request precisely."),
        };

        let prompt = match arg_str(args, &["prompt", "input", "text"]) {
            Some(prompt) => prompt.to_string(),
            None if args.as_object().is_some_and(|m| !m.is_empty()) => {
                format!("{user_input}\n\nArguments: {args}")
            }
            None => user_input.to_string(),
        };

        let response = self
            .llm
            .chat(model_id, &[Message::user(prompt)], Some(&system), &ctx.params)
            .await?;
        Ok(json!({ "text": response.content }))
    }

    /// Best model for image generation, if the catalog has one.
    async fn image_model(&self, execution_id: &str) -> Option<i64> {
        let criteria = ModelSelectionCriteria::requiring(&[BuiltinCapability::ImageGeneration.as_str()], 1);
        match self
            .scheduler
            .schedule_models(execution_id, &criteria, SchedulingStrategy::CapabilityFirst, self.use_defaults)
            .await
        {
            Ok(result) => Some(result.primary_model.model_id),
            Err(e) => {
                debug!(error = %e, "No image model scheduled; using the agent's model");
                None
            }
        }
    }

    /// Store the exchange and refresh the cached history.
    async fn persist_turn(
        &self,
        ctx: &ExecutionContext,
        user_input: &str,
        response: &str,
    ) -> Result<(), ExecutionError> {
        let Some(conversation_id) = &ctx.conversation_id else {
            return Ok(());
        };

        {
            let store = self.catalog.lock().await;
            store.append_message(conversation_id, Role::User, user_input)?;
            store.append_message(conversation_id, Role::Assistant, response)?;
        }

        let mut history = ctx.history.clone();
        history.push(Message::user(user_input));
        history.push(Message::assistant(response));
        let excess = history.len().saturating_sub(self.config.history_limit);
        history.drain(..excess);
        self.cache_history(conversation_id, &history).await;
        Ok(())
    }
}

fn to_message(stored: ConversationMessage) -> Message {
    match stored.role {
        Role::System => Message::system(stored.content),
        Role::User => Message::user(stored.content),
        Role::Assistant => Message::assistant(stored.content),
        Role::Tool => Message::tool(String::new(), stored.content),
    }
}

/// First non-empty string argument among `keys`.
fn arg_str<'a>(args: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| args.get(*k).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
}
