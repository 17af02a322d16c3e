// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Skill execution.
//!
//! Prompt skills render a `{{arg}}` template and send it to a model. Script
//! skills run in the [`sandbox`]. Every run that reaches a registered skill
//! is written to the execution log, successful or not.

pub mod sandbox;

pub use sandbox::{run_script, SandboxLimits, SandboxOutput};

use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::catalog::{NewSkillExecutionLog, SharedCatalog, SkillKind, SkillRecord};
use crate::config::ResolvedEngineConfig;
use crate::error::SkillError;
use crate::llm::LlmService;
use crate::telemetry::ApiMonitor;
use crate::types::{GenerationParams, Message};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
});

/// Fill `{{name}}` placeholders from an argument object.
///
/// Strings are inserted verbatim, other values as JSON.
pub fn render_template(template: &str, args: &Value) -> Result<String, SkillError> {
    let mut missing = Vec::new();
    let rendered = PLACEHOLDER.replace_all(template, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match args.get(name) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => {
                missing.push(name.to_string());
                String::new()
            }
        }
    });

    if missing.is_empty() {
        Ok(rendered.into_owned())
    } else {
        Err(SkillError::InvalidInput(format!(
            "missing argument(s): {}",
            missing.join(", ")
        )))
    }
}

/// Who is invoking a skill.
#[derive(Debug, Clone, Default)]
pub struct SkillInvocation {
    pub execution_id: Option<String>,
    pub agent_id: Option<String>,
    /// Model used by prompt skills
    pub model_id: Option<i64>,
    pub params: GenerationParams,
}

/// Result of one skill run.
#[derive(Debug, Clone, Serialize)]
pub struct SkillOutcome {
    pub skill: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

pub struct SkillExecutor {
    catalog: SharedCatalog,
    llm: Arc<LlmService>,
    monitor: Arc<ApiMonitor>,
    limits: SandboxLimits,
}

impl SkillExecutor {
    pub fn new(
        catalog: SharedCatalog,
        llm: Arc<LlmService>,
        monitor: Arc<ApiMonitor>,
        limits: SandboxLimits,
    ) -> Self {
        Self {
            catalog,
            llm,
            monitor,
            limits,
        }
    }

    /// Sandbox limits taken from engine settings.
    pub fn limits_from_config(config: &ResolvedEngineConfig) -> SandboxLimits {
        SandboxLimits {
            wall_timeout: Duration::from_millis(config.skill_timeout_ms),
            max_output_bytes: config.max_skill_output_bytes,
            ..Default::default()
        }
    }

    /// Run an active skill by name.
    ///
    /// Fails only when the skill does not exist or the log cannot be
    /// written; run failures come back as an unsuccessful outcome.
    pub async fn execute(
        &self,
        name: &str,
        args: &Value,
        invocation: &SkillInvocation,
    ) -> Result<SkillOutcome, SkillError> {
        let skill = {
            let store = self.catalog.lock().await;
            store
                .get_skill_by_name(name)?
                .ok_or_else(|| SkillError::NotFound(name.to_string()))?
        };

        let start = Instant::now();
        let result = self.run(&skill, args, invocation).await;
        let duration = start.elapsed();

        let (success, output, error) = match result {
            Ok((true, output)) => (true, Some(output), None),
            Ok((false, output)) => (false, Some(output.clone()), Some(output)),
            Err(e) => (false, None, Some(e.to_string())),
        };

        {
            let store = self.catalog.lock().await;
            store.append_skill_log(&NewSkillExecutionLog {
                skill_id: skill.id,
                execution_id: invocation.execution_id.clone(),
                agent_id: invocation.agent_id.clone(),
                arguments: args.clone(),
                success,
                output: output.clone(),
                error: error.clone(),
                duration_ms: duration.as_millis() as u64,
            })?;
        }
        self.monitor
            .record_operation(&format!("skill.{name}"), duration, success);

        if success {
            info!(skill = name, duration_ms = duration.as_millis() as u64, "Skill executed");
        } else {
            warn!(skill = name, error = ?error, "Skill failed");
        }

        Ok(SkillOutcome {
            skill: name.to_string(),
            success,
            output,
            error,
            duration_ms: duration.as_millis() as u64,
        })
    }

    /// Returns (success, text).
    async fn run(
        &self,
        skill: &SkillRecord,
        args: &Value,
        invocation: &SkillInvocation,
    ) -> Result<(bool, String), SkillError> {
        match &skill.kind {
            SkillKind::Prompt { template } => {
                let prompt = render_template(template, args)?;
                let model_id = invocation.model_id.ok_or_else(|| {
                    SkillError::InvalidInput(format!(
                        "prompt skill '{}' needs a model",
                        skill.name
                    ))
                })?;
                let response = self
                    .llm
                    .chat(model_id, &[Message::user(prompt)], None, &invocation.params)
                    .await?;
                Ok((true, response.content))
            }
            SkillKind::Script { language, source } => {
                let out = run_script(*language, source, args, &self.limits).await?;
                if out.success() {
                    Ok((true, out.stdout))
                } else if out.stderr.is_empty() {
                    Ok((false, format!("exit code {}", out.exit_code)))
                } else {
                    Ok((false, out.stderr))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogStore, NewModel, NewSupplier, ScriptLanguage};
    use crate::config::ResolvedConfig;
    use crate::params::ParameterNormalizer;
    use crate::providers::ScriptedProvider;
    use serde_json::json;

    #[test]
    fn test_render_template() {
        let rendered = render_template(
            "Summarize {{ text }} in {{words}} words",
            &json!({"text": "the doc", "words": 10}),
        )
        .unwrap();
        assert_eq!(rendered, "Summarize the doc in 10 words");

        let err = render_template("{{a}} {{b}}", &json!({"a": 1})).unwrap_err();
        assert!(err.to_string().contains('b'));
    }

    async fn executor() -> (SkillExecutor, SharedCatalog, i64, Arc<ScriptedProvider>) {
        let store = CatalogStore::open_in_memory().unwrap();
        let supplier = store
            .create_supplier(&NewSupplier {
                name: "openai".to_string(),
                provider_type: "openai".to_string(),
                ..Default::default()
            })
            .unwrap();
        let model = store
            .create_model(&NewModel::chat(supplier.id, "gpt-4o-mini"))
            .unwrap();
        let catalog = store.into_shared();
        let monitor = Arc::new(ApiMonitor::new());
        let llm = Arc::new(LlmService::new(
            catalog.clone(),
            Arc::new(ResolvedConfig::default()),
            Arc::new(ParameterNormalizer::new()),
            monitor.clone(),
        ));
        let provider = Arc::new(ScriptedProvider::new("gpt-4o-mini").with_text("short summary"));
        llm.register_provider(model.id, provider.clone()).await;

        let executor = SkillExecutor::new(catalog.clone(), llm, monitor, SandboxLimits::default());
        (executor, catalog, model.id, provider)
    }

    #[tokio::test]
    async fn test_prompt_skill_calls_model_and_logs() {
        let (executor, catalog, model_id, provider) = executor().await;
        let skill = catalog
            .lock()
            .await
            .create_skill(
                "summarize",
                None,
                &SkillKind::Prompt {
                    template: "Summarize: {{text}}".to_string(),
                },
            )
            .unwrap();

        let invocation = SkillInvocation {
            model_id: Some(model_id),
            execution_id: Some("exec-1".to_string()),
            ..Default::default()
        };
        let outcome = executor
            .execute("summarize", &json!({"text": "long text"}), &invocation)
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.output.as_deref(), Some("short summary"));
        assert_eq!(
            provider.requests()[0].messages[0].content,
            "Summarize: long text"
        );

        // Missing argument: failed outcome, still logged
        let outcome = executor
            .execute("summarize", &json!({}), &invocation)
            .await
            .unwrap();
        assert!(!outcome.success);

        let logs = catalog.lock().await.list_skill_logs(skill.id, 10).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1].execution_id.as_deref(), Some("exec-1"));
    }

    #[tokio::test]
    async fn test_unknown_skill() {
        let (executor, _, _, _) = executor().await;
        let err = executor
            .execute("nope", &json!({}), &SkillInvocation::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SkillError::NotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_script_skill_failure_is_outcome() {
        let (executor, catalog, _, _) = executor().await;
        catalog
            .lock()
            .await
            .create_skill(
                "fail",
                None,
                &SkillKind::Script {
                    language: ScriptLanguage::Shell,
                    source: "echo bad >&2; exit 1".to_string(),
                },
            )
            .unwrap();

        let outcome = executor
            .execute("fail", &json!({}), &SkillInvocation::default())
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref().map(str::trim), Some("bad"));
    }
}
