// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Catalog entity types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{GenerationParams, Role};

// ============================================================================
// Suppliers & Models
// ============================================================================

/// A model supplier (OpenAI, DeepSeek, a local Ollama host, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Supplier {
    pub id: i64,
    /// Unique display name, also the key for provider settings
    pub name: String,
    /// Provider type key (openai, deepseek, ollama, openai-compatible)
    pub provider_type: String,
    pub base_url: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
    pub is_active: bool,
    pub created_at: i64,
}

/// Fields for creating a supplier.
#[derive(Debug, Clone, Default)]
pub struct NewSupplier {
    pub name: String,
    pub provider_type: String,
    pub base_url: Option<String>,
    pub api_key_env: Option<String>,
}

/// Kind of model, used to pick parameter rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Chat,
    Completion,
    Image,
    Embedding,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Completion => "completion",
            Self::Image => "image",
            Self::Embedding => "embedding",
        }
    }
}

impl std::str::FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chat" => Ok(Self::Chat),
            "completion" | "text" => Ok(Self::Completion),
            "image" => Ok(Self::Image),
            "embedding" => Ok(Self::Embedding),
            other => Err(format!("unknown model type: {other}")),
        }
    }
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A model row.
///
/// `id` is the catalog identity used everywhere else; `model_id` is the
/// supplier's own model name and is unique per supplier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: i64,
    pub supplier_id: i64,
    pub model_id: String,
    pub display_name: String,
    pub description: Option<String>,
    pub model_type: ModelType,
    pub context_window: Option<u32>,
    pub is_active: bool,
    /// Observed reliability, 0..=100
    pub success_rate: f64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields for creating a model.
#[derive(Debug, Clone)]
pub struct NewModel {
    pub supplier_id: i64,
    pub model_id: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub model_type: ModelType,
    pub context_window: Option<u32>,
}

impl NewModel {
    pub fn chat(supplier_id: i64, model_id: impl Into<String>) -> Self {
        Self {
            supplier_id,
            model_id: model_id.into(),
            display_name: None,
            description: None,
            model_type: ModelType::Chat,
            context_window: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_type(mut self, model_type: ModelType) -> Self {
        self.model_type = model_type;
        self
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// A capability known to the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub category: String,
    pub description: Option<String>,
}

/// Association between a model and a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityLink {
    pub model_id: i64,
    pub capability: String,
    /// 1..=5
    pub strength: i32,
    /// 1..=5
    pub confidence: i32,
    /// Set by discovery rather than by an operator
    pub auto_tagged: bool,
}

/// An active model together with everything the scheduler needs.
#[derive(Debug, Clone, Serialize)]
pub struct ModelProfile {
    pub model: ModelRecord,
    pub supplier_name: String,
    pub provider_type: String,
    pub strengths: HashMap<String, i32>,
    pub confidence: HashMap<String, i32>,
}

// ============================================================================
// Default models & templates
// ============================================================================

/// Where a default-model entry applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DefaultScope {
    Global,
    /// Scene default keyed by capability name
    Scene(String),
}

impl DefaultScope {
    /// Storage key: `global` or `scene:<capability>`.
    pub fn key(&self) -> String {
        match self {
            Self::Global => "global".to_string(),
            Self::Scene(capability) => format!("scene:{capability}"),
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        if key == "global" {
            Some(Self::Global)
        } else {
            key.strip_prefix("scene:")
                .filter(|c| !c.is_empty())
                .map(|c| Self::Scene(c.to_string()))
        }
    }
}

/// A configured default model; lower priority wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultModelEntry {
    pub scope: DefaultScope,
    pub model_id: i64,
    pub priority: i32,
}

/// A stored set of canonical generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterTemplate {
    pub id: i64,
    pub name: String,
    pub model_type: ModelType,
    pub params: GenerationParams,
    /// Incremented on every save
    pub version: i32,
    pub updated_at: i64,
}

// ============================================================================
// Agents
// ============================================================================

/// How an agent's model is chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ModelBinding {
    /// Always use this catalog model
    Fixed { model_id: i64 },
    /// Ask the scheduler on every turn
    Scheduled {
        required_capabilities: Vec<String>,
        #[serde(default = "default_strategy")]
        strategy: String,
        #[serde(default = "default_min_strength")]
        min_strength: i32,
    },
}

fn default_strategy() -> String {
    "capability_first".to_string()
}

fn default_min_strength() -> i32 {
    1
}

/// Persisted agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub system_prompt: String,
    pub model: ModelBinding,
    /// Declared skills; `None` means no declaration at all
    #[serde(default)]
    pub skills: Option<Vec<String>>,
    /// Declared capabilities; `None` means no declaration at all
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
    /// Canonical parameters applied to every call
    #[serde(default)]
    pub params: GenerationParams,
}

// ============================================================================
// Skills
// ============================================================================

/// Interpreter for a script skill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptLanguage {
    Python,
    Shell,
    Node,
}

impl ScriptLanguage {
    /// Interpreter binary and the file extension for the script.
    pub fn interpreter(&self) -> (&'static str, &'static str) {
        match self {
            Self::Python => ("python3", "py"),
            Self::Shell => ("sh", "sh"),
            Self::Node => ("node", "js"),
        }
    }
}

impl std::str::FromStr for ScriptLanguage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Self::Python),
            "shell" | "sh" | "bash" => Ok(Self::Shell),
            "node" | "javascript" | "js" => Ok(Self::Node),
            other => Err(other.to_string()),
        }
    }
}

/// What a skill does when invoked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkillKind {
    /// Template with `{{arg}}` placeholders sent to the agent's model
    Prompt { template: String },
    /// Program run in the sandbox with arguments on stdin
    Script { language: ScriptLanguage, source: String },
}

/// A registered skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillRecord {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub kind: SkillKind,
    /// sha256 of the serialized definition
    pub content_hash: String,
    pub is_active: bool,
    pub created_at: i64,
}

/// One row of the skill execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillExecutionLog {
    pub id: i64,
    pub skill_id: i64,
    pub execution_id: Option<String>,
    pub agent_id: Option<String>,
    pub arguments: serde_json::Value,
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub created_at: i64,
}

/// Fields for appending an execution log row.
#[derive(Debug, Clone)]
pub struct NewSkillExecutionLog {
    pub skill_id: i64,
    pub execution_id: Option<String>,
    pub agent_id: Option<String>,
    pub arguments: serde_json::Value,
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

// ============================================================================
// Conversations & knowledge
// ============================================================================

/// A stored conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: i64,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: i64,
}

/// A document in a knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: i64,
    pub knowledge_base: String,
    pub title: String,
    pub content: String,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scope_keys() {
        assert_eq!(DefaultScope::Global.key(), "global");
        let scene = DefaultScope::Scene("code_generation".to_string());
        assert_eq!(scene.key(), "scene:code_generation");
        assert_eq!(DefaultScope::from_key(&scene.key()), Some(scene));
        assert_eq!(DefaultScope::from_key("scene:"), None);
        assert_eq!(DefaultScope::from_key("team"), None);
    }

    #[test]
    fn test_model_binding_serialization() {
        let binding: ModelBinding = serde_json::from_str(
            r#"{"mode": "scheduled", "required_capabilities": ["code_generation"]}"#,
        )
        .unwrap();
        assert_eq!(
            binding,
            ModelBinding::Scheduled {
                required_capabilities: vec!["code_generation".to_string()],
                strategy: "capability_first".to_string(),
                min_strength: 1,
            }
        );

        let fixed = serde_json::to_value(ModelBinding::Fixed { model_id: 7 }).unwrap();
        assert_eq!(fixed["mode"], "fixed");
        assert_eq!(fixed["model_id"], 7);
    }

    #[test]
    fn test_skill_kind_serialization() {
        let kind = SkillKind::Script {
            language: ScriptLanguage::Python,
            source: "print(1)".to_string(),
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["kind"], "script");
        assert_eq!(json["language"], "python");
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("Chat".parse::<ModelType>().unwrap(), ModelType::Chat);
        assert!("audio".parse::<ModelType>().is_err());
        assert_eq!("bash".parse::<ScriptLanguage>().unwrap(), ScriptLanguage::Shell);
    }
}
