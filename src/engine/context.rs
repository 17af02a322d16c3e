// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-execution state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{GenerationParams, Message, TokenUsage};

/// Where an execution currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStep {
    Initialized,
    HistoryLoaded,
    AgentLoaded,
    ModelCalled,
    IntentsParsed,
    ToolsExecuted,
    FinalAnswer,
    Completed,
    Failed,
}

impl std::fmt::Display for ExecutionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initialized => "initialized",
            Self::HistoryLoaded => "history_loaded",
            Self::AgentLoaded => "agent_loaded",
            Self::ModelCalled => "model_called",
            Self::IntentsParsed => "intents_parsed",
            Self::ToolsExecuted => "tools_executed",
            Self::FinalAnswer => "final_answer",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One model call made during the execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponseRecord {
    pub model_id: i64,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    pub duration_ms: u64,
}

/// Result of one capability invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityOutcome {
    pub capability: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// State of one conversational turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub agent_id: String,
    pub conversation_id: Option<String>,
    pub user_id: Option<String>,
    pub history: Vec<Message>,
    pub skill_results: BTreeMap<String, Value>,
    pub capability_results: BTreeMap<String, Value>,
    pub model_responses: Vec<ModelResponseRecord>,
    pub params: GenerationParams,
    pub current_step: ExecutionStep,
    pub started_at: DateTime<Utc>,
}

impl ExecutionContext {
    pub fn new(
        agent_id: impl Into<String>,
        conversation_id: Option<String>,
        user_id: Option<String>,
        params: GenerationParams,
    ) -> Self {
        Self {
            execution_id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            conversation_id,
            user_id,
            history: Vec::new(),
            skill_results: BTreeMap::new(),
            capability_results: BTreeMap::new(),
            model_responses: Vec::new(),
            params,
            current_step: ExecutionStep::Initialized,
            started_at: Utc::now(),
        }
    }

    pub fn advance(&mut self, step: ExecutionStep) {
        self.current_step = step;
    }

    pub fn has_tool_results(&self) -> bool {
        !self.skill_results.is_empty() || !self.capability_results.is_empty()
    }

    pub fn record_skill_result(&mut self, name: &str, result: Value) {
        insert_unique(&mut self.skill_results, name, result);
    }

    pub fn record_capability_result(&mut self, name: &str, result: Value) {
        insert_unique(&mut self.capability_results, name, result);
    }

    /// First model response, if any.
    pub fn first_response(&self) -> Option<&ModelResponseRecord> {
        self.model_responses.first()
    }
}

/// Repeated calls to the same name get `name#2`, `name#3`, ...
fn insert_unique(map: &mut BTreeMap<String, Value>, name: &str, value: Value) {
    if !map.contains_key(name) {
        map.insert(name.to_string(), value);
        return;
    }
    let mut n = 2;
    while map.contains_key(&format!("{name}#{n}")) {
        n += 1;
    }
    map.insert(format!("{name}#{n}"), value);
}
