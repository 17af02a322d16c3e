// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Copilot main entry point - catalog administration, scheduling and chat.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;

use copilot::app::AppContext;
use copilot::catalog::{
    AgentConfig, CapabilityLink, DefaultScope, ModelBinding, ModelType, NewModel, NewSupplier,
    ScriptLanguage, SkillKind,
};
use copilot::config::{self, CliOptions};
use copilot::engine::ExecutionRequest;
use copilot::knowledge::{format_results, DEFAULT_TOP_K};
use copilot::params::{apply_template, ParameterNormalizer};
use copilot::providers::ProviderType;
use copilot::scheduler::{ModelSelectionCriteria, SchedulingStrategy};
use copilot::telemetry::{init_telemetry, TelemetryConfig};
use copilot::types::GenerationParams;

/// Copilot - model scheduling and agent execution backend.
#[derive(Parser)]
#[command(name = "copilot")]
#[command(author, version, about = "AI copilot backend core", long_about = None)]
struct Cli {
    /// Catalog database path
    #[arg(long, env = "COPILOT_DATABASE", global = true)]
    database: Option<PathBuf>,

    /// Log filter directive (e.g. "copilot=debug")
    #[arg(long, env = "COPILOT_LOG", global = true)]
    log_level: Option<String>,

    /// Output format
    #[arg(short = 'f', long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,

    /// Show debug logs
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an example configuration file
    Init,

    /// Manage suppliers
    Supplier {
        #[command(subcommand)]
        action: SupplierAction,
    },

    /// Manage models
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },

    /// Tag models with capabilities inferred from their names
    Discover {
        /// Model id or name; all active models when omitted
        model: Option<String>,
        /// Replace manually assigned links
        #[arg(long)]
        overwrite: bool,
    },

    /// Manage default models
    Default {
        #[command(subcommand)]
        action: DefaultAction,
    },

    /// Select models for a set of capabilities
    Schedule {
        /// Required capability (repeatable)
        #[arg(short, long = "capability")]
        capabilities: Vec<String>,
        #[arg(long, default_value_t = 1)]
        min_strength: i32,
        /// capability_first, cost_effective, performance_optimized or balanced
        #[arg(short, long)]
        strategy: Option<String>,
        #[arg(long)]
        max_cost: Option<f64>,
        /// Milliseconds
        #[arg(long)]
        max_response_time: Option<u32>,
        /// Preferred supplier (repeatable)
        #[arg(long = "prefer")]
        preferred_suppliers: Vec<String>,
        /// Excluded model name or id (repeatable)
        #[arg(long = "exclude")]
        excluded_models: Vec<String>,
        /// Ignore configured defaults
        #[arg(long)]
        no_defaults: bool,
        #[arg(long)]
        task_id: Option<String>,
        /// Current workload as MODEL_ID=COUNT (repeatable)
        #[arg(long = "workload", value_parser = parse_workload)]
        workload: Vec<(i64, u32)>,
    },

    /// Manage agents
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },

    /// Manage skills
    Skill {
        #[command(subcommand)]
        action: SkillAction,
    },

    /// Manage knowledge documents
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },

    /// Run one conversational turn with an agent
    Chat {
        agent_id: String,
        message: String,
        #[arg(short, long)]
        conversation: Option<String>,
        #[arg(short, long)]
        user: Option<String>,
        /// Generation parameter as KEY=VALUE (repeatable)
        #[arg(short, long = "param")]
        params: Vec<String>,
    },

    /// Manage parameter templates
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },

    /// Single-prompt completion against a catalog model
    Complete {
        /// Model id or name
        model: String,
        prompt: String,
        /// Parameter template to start from
        #[arg(short, long)]
        template: Option<String>,
        /// Generation parameter as KEY=VALUE (repeatable)
        #[arg(short, long = "param")]
        params: Vec<String>,
    },

    /// Generate an image with a catalog model
    Image {
        /// Model id or name
        model: String,
        prompt: String,
        #[arg(short, long = "param")]
        params: Vec<String>,
    },

    /// Translate generation parameters between canonical and supplier keys
    Normalize {
        /// Supplier type (openai, ollama, ...)
        supplier: String,
        /// Parameters as a JSON object
        params: String,
        #[arg(long, default_value = "chat")]
        model_type: String,
        /// Translate supplier keys to canonical keys instead
        #[arg(long)]
        to_canonical: bool,
    },
}

#[derive(Subcommand)]
enum SupplierAction {
    /// Register a supplier
    Add {
        name: String,
        /// openai, deepseek, ollama or openai-compatible
        #[arg(short = 't', long = "type")]
        provider_type: String,
        #[arg(long)]
        base_url: Option<String>,
        /// Environment variable holding the API key
        #[arg(long)]
        api_key_env: Option<String>,
    },
    /// List suppliers
    List {
        /// Include deactivated suppliers
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Register a model and tag its capabilities
    Add {
        /// Supplier name
        supplier: String,
        /// Supplier model name
        model_id: String,
        #[arg(short = 't', long = "type", default_value = "chat")]
        model_type: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        context_window: Option<u32>,
        /// Skip automatic capability tagging
        #[arg(long)]
        no_discover: bool,
    },
    /// List models
    #[command(aliases = &["ls"])]
    List {
        /// Include deactivated models
        #[arg(long)]
        all: bool,
    },
    /// Deactivate a model
    Deactivate { model: String },
    /// List the models a model's supplier endpoint advertises
    Remote { model: String },
    /// Set a capability strength by hand
    Link {
        model: String,
        capability: String,
        #[arg(long, default_value_t = 3)]
        strength: i32,
        #[arg(long, default_value_t = 3)]
        confidence: i32,
    },
}

#[derive(Subcommand)]
enum DefaultAction {
    /// Set the global default, or a scene default for a capability
    Set {
        model: String,
        /// Capability the default applies to
        #[arg(long)]
        scene: Option<String>,
        /// Lower wins
        #[arg(long, default_value_t = 0)]
        priority: i32,
    },
}

#[derive(Subcommand)]
enum TemplateAction {
    /// Create a template or bump its version
    Save {
        name: String,
        /// Canonical parameters as a JSON object
        params: String,
        #[arg(long, default_value = "chat")]
        model_type: String,
    },
    /// List templates
    List,
}

#[derive(Subcommand)]
enum AgentAction {
    /// Create or replace an agent
    Add {
        agent_id: String,
        /// Read the whole configuration from a JSON or YAML file
        #[arg(long, conflicts_with_all = ["name", "system_prompt", "model", "capability"])]
        file: Option<PathBuf>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        system_prompt: Option<String>,
        /// Fixed model id or name
        #[arg(long, conflicts_with = "capability")]
        model: Option<String>,
        /// Schedule a model requiring this capability (repeatable)
        #[arg(long)]
        capability: Vec<String>,
        #[arg(long, default_value = "capability_first")]
        strategy: String,
        #[arg(long, default_value_t = 1)]
        min_strength: i32,
        /// Declared skill (repeatable)
        #[arg(long = "skill")]
        skills: Vec<String>,
        /// Declared capability call target (repeatable)
        #[arg(long = "allow-capability")]
        allowed_capabilities: Vec<String>,
    },
    /// List agents
    List,
}

#[derive(Subcommand)]
enum SkillAction {
    /// Register a prompt or script skill
    Add {
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// Prompt template with {{arg}} placeholders
        #[arg(long, conflicts_with = "script")]
        template: Option<String>,
        /// Script file
        #[arg(long)]
        script: Option<PathBuf>,
        /// python, shell or node
        #[arg(long, default_value = "python")]
        language: String,
    },
    /// List skills
    List,
}

#[derive(Subcommand)]
enum KbAction {
    /// Add a document
    Add {
        knowledge_base: String,
        title: String,
        /// Document text; read from --file when omitted
        #[arg(long)]
        content: Option<String>,
        #[arg(long, conflicts_with = "content")]
        file: Option<PathBuf>,
    },
    /// Search documents
    Search {
        query: String,
        #[arg(long)]
        kb: Option<String>,
        #[arg(short = 'k', long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cwd = std::env::current_dir()?;
    let workspace_root = config::find_workspace_root(&cwd).unwrap_or(cwd);
    let cli_options = CliOptions {
        database: cli.database.clone(),
        log_level: cli.log_level.clone(),
        ..Default::default()
    };
    let resolved = config::load_config(&workspace_root, cli_options)?;

    let _telemetry = init_telemetry(&TelemetryConfig::for_cli(
        cli.verbose,
        resolved.log_level.as_deref(),
    ))?;

    let format = cli.format;
    match cli.command {
        Commands::Init => {
            let path = config::init_config(&workspace_root, None)?;
            println!("Created config file: {}", path.display());
            Ok(())
        }
        Commands::Normalize {
            supplier,
            params,
            model_type,
            to_canonical,
        } => normalize(&supplier, &params, &model_type, to_canonical, format),
        command => {
            let app = AppContext::init(resolved).await?;
            let result = run(&app, command, format).await;
            let snapshot = app.shutdown().await;
            tracing::debug!("{}", snapshot.format_report());
            result
        }
    }
}

async fn run(app: &AppContext, command: Commands, format: OutputFormat) -> anyhow::Result<()> {
    match command {
        Commands::Supplier { action } => supplier_command(app, action, format).await,
        Commands::Model { action } => model_command(app, action, format).await,
        Commands::Discover { model, overwrite } => {
            let summaries = match model {
                Some(reference) => {
                    let id = app.catalog.lock().await.find_model(&reference)?.id;
                    vec![app.discovery.auto_tag_model(id, overwrite).await?]
                }
                None => app.discovery.auto_tag_all(overwrite).await?,
            };
            output(format, &summaries, || {
                for s in &summaries {
                    println!(
                        "{} {} added: [{}] updated: [{}] kept: [{}]",
                        "✓".green(),
                        s.model_name.bright_white(),
                        s.added.join(", "),
                        s.updated.join(", "),
                        s.kept.join(", ")
                    );
                }
            })
        }
        Commands::Default { action } => match action {
            DefaultAction::Set {
                model,
                scene,
                priority,
            } => {
                let store = app.catalog.lock().await;
                let record = store.find_model(&model)?;
                let scope = match scene {
                    Some(capability) => DefaultScope::Scene(capability),
                    None => DefaultScope::Global,
                };
                store.set_default_model(&scope, record.id, priority)?;
                println!(
                    "{} Default for {} is now {} (priority {})",
                    "✓".green(),
                    scope.key().bright_cyan(),
                    record.model_id.bright_white(),
                    priority
                );
                Ok(())
            }
        },
        Commands::Schedule {
            capabilities,
            min_strength,
            strategy,
            max_cost,
            max_response_time,
            preferred_suppliers,
            excluded_models,
            no_defaults,
            task_id,
            workload,
        } => {
            let strategy: SchedulingStrategy = strategy
                .as_deref()
                .unwrap_or(&app.config.scheduler.default_strategy)
                .parse()?;
            let criteria = ModelSelectionCriteria {
                required_capabilities: capabilities,
                min_strength,
                max_cost,
                max_response_time,
                preferred_suppliers: non_empty(preferred_suppliers),
                excluded_models: non_empty(excluded_models),
            };
            let task_id = task_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let use_defaults = app.config.scheduler.use_defaults && !no_defaults;

            let mut result = app
                .scheduler
                .schedule_models(&task_id, &criteria, strategy, use_defaults)
                .await?;
            if !workload.is_empty() {
                let workload: HashMap<i64, u32> = workload.into_iter().collect();
                result = app.scheduler.load_balance(&workload, &result);
            }

            output(format, &result, || {
                println!(
                    "{} {} ({})",
                    "Primary:".bright_blue().bold(),
                    result.primary_model.model_name.bright_white(),
                    result.primary_model.selection_reason
                );
                for (i, m) in result.fallback_models.iter().enumerate() {
                    println!("  fallback {}: {} [{}]", i + 1, m.model_name, m.supplier_name);
                }
                println!(
                    "{}",
                    format!(
                        "strategy {} · est. cost {:.4} · est. time {}ms",
                        result.scheduling_strategy,
                        result.total_estimated_cost,
                        result.total_estimated_time
                    )
                    .dimmed()
                );
            })
        }
        Commands::Agent { action } => agent_command(app, action, format).await,
        Commands::Skill { action } => skill_command(app, action, format).await,
        Commands::Kb { action } => kb_command(app, action, format).await,
        Commands::Chat {
            agent_id,
            message,
            conversation,
            user,
            params,
        } => {
            let mut request = ExecutionRequest::new(agent_id, message).with_params(parse_params(&params)?);
            if let Some(conversation) = conversation {
                request = request.with_conversation(conversation);
            }
            if let Some(user) = user {
                request = request.with_user(user);
            }

            let outcome = app.engine.execute(request).await;
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&outcome.to_json())?);
                }
                OutputFormat::Text => match (&outcome.response, &outcome.error) {
                    (Some(response), _) => println!("{response}"),
                    (None, Some(error)) => eprintln!("{} {}", "Error:".red().bold(), error),
                    (None, None) => {}
                },
            }
            if outcome.success {
                Ok(())
            } else {
                Err(anyhow!("execution {} failed", outcome.context.execution_id))
            }
        }
        Commands::Template { action } => match action {
            TemplateAction::Save {
                name,
                params,
                model_type,
            } => {
                let model_type: ModelType = model_type.parse().map_err(|e: String| anyhow!(e))?;
                let params: GenerationParams =
                    serde_json::from_str(&params).context("params must be a JSON object")?;
                let template = app
                    .catalog
                    .lock()
                    .await
                    .save_parameter_template(&name, model_type, &params)?;
                output(format, &template, || {
                    println!(
                        "{} Saved template {} (version {})",
                        "✓".green(),
                        template.name.bright_white(),
                        template.version
                    );
                })
            }
            TemplateAction::List => {
                let templates = app.catalog.lock().await.list_parameter_templates()?;
                output(format, &templates, || {
                    for t in &templates {
                        println!(
                            "{} [{}] v{} {}",
                            t.name.bright_white(),
                            t.model_type,
                            t.version,
                            serde_json::Value::Object(t.params.clone()).to_string().dimmed()
                        );
                    }
                })
            }
        },
        Commands::Complete {
            model,
            prompt,
            template,
            params,
        } => {
            let (model_id, template) = {
                let store = app.catalog.lock().await;
                let model_id = store.find_model(&model)?.id;
                let template = match template {
                    Some(name) => Some(
                        store
                            .get_parameter_template(&name)?
                            .ok_or_else(|| anyhow!("unknown template: {name}"))?,
                    ),
                    None => None,
                };
                (model_id, template)
            };
            let params = apply_template(template.as_ref(), &parse_params(&params)?);
            let outcome = app.llm.text_completion(model_id, &prompt, &params).await;
            output(format, &outcome, || {
                println!("{}", outcome.generated_text);
                if let Some(error) = &outcome.error {
                    eprintln!("{} {}", "Degraded:".yellow().bold(), error);
                }
            })
        }
        Commands::Image {
            model,
            prompt,
            params,
        } => {
            let model_id = app.catalog.lock().await.find_model(&model)?.id;
            let image = app
                .llm
                .generate_image(model_id, &prompt, &parse_params(&params)?)
                .await?;
            output(format, &image, || {
                match (&image.url, &image.b64_json) {
                    (Some(url), _) => println!("{url}"),
                    (None, Some(data)) => println!("{} bytes of base64 image data", data.len()),
                    (None, None) => println!("{}", "No image returned".yellow()),
                }
                if let Some(revised) = &image.revised_prompt {
                    println!("{}", revised.dimmed());
                }
            })
        }
        Commands::Init | Commands::Normalize { .. } => Ok(()),
    }
}

async fn supplier_command(
    app: &AppContext,
    action: SupplierAction,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match action {
        SupplierAction::Add {
            name,
            provider_type,
            base_url,
            api_key_env,
        } => {
            let parsed: ProviderType = provider_type
                .parse()
                .map_err(|_| anyhow!("unknown provider type: {provider_type}"))?;
            let supplier = app.catalog.lock().await.create_supplier(&NewSupplier {
                name,
                provider_type: parsed.key().to_string(),
                base_url,
                api_key_env,
            })?;
            output(format, &supplier, || {
                println!(
                    "{} Added supplier {} ({}) with id {}",
                    "✓".green(),
                    supplier.name.bright_white(),
                    supplier.provider_type,
                    supplier.id
                );
            })
        }
        SupplierAction::List { all } => {
            let suppliers = app.catalog.lock().await.list_suppliers(!all)?;
            output(format, &suppliers, || {
                for s in &suppliers {
                    let status = if s.is_active { "active".green() } else { "inactive".red() };
                    println!(
                        "{:>4}  {} [{}] {} {}",
                        s.id,
                        s.name.bright_white(),
                        s.provider_type,
                        s.base_url.as_deref().unwrap_or("default endpoint").dimmed(),
                        status
                    );
                }
            })
        }
    }
}

async fn model_command(
    app: &AppContext,
    action: ModelAction,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match action {
        ModelAction::Add {
            supplier,
            model_id,
            model_type,
            description,
            context_window,
            no_discover,
        } => {
            let model_type: ModelType = model_type.parse().map_err(|e: String| anyhow!(e))?;
            let record = {
                let store = app.catalog.lock().await;
                let supplier = store
                    .get_supplier_by_name(&supplier)?
                    .ok_or_else(|| anyhow!("unknown supplier: {supplier}"))?;
                store.create_model(&NewModel {
                    supplier_id: supplier.id,
                    model_id,
                    display_name: None,
                    description,
                    model_type,
                    context_window,
                })?
            };
            let tags = if no_discover {
                None
            } else {
                Some(app.discovery.auto_tag_model(record.id, false).await?)
            };

            output(format, &serde_json::json!({ "model": record, "capabilities": tags }), || {
                println!(
                    "{} Added model {} with id {}",
                    "✓".green(),
                    record.model_id.bright_white(),
                    record.id
                );
                if let Some(tags) = &tags {
                    println!("  capabilities: {}", tags.added.join(", "));
                }
            })
        }
        ModelAction::List { all } => {
            let rows = {
                let store = app.catalog.lock().await;
                let models = store.list_models(!all)?;
                let mut rows = Vec::with_capacity(models.len());
                for model in models {
                    let links = store.model_capabilities(model.id)?;
                    rows.push((model, links));
                }
                rows
            };
            let json_rows: Vec<Value> = rows
                .iter()
                .map(|(model, links)| serde_json::json!({ "model": model, "capabilities": links }))
                .collect();
            output(format, &json_rows, || {
                for (model, links) in &rows {
                    let caps: Vec<String> = links
                        .iter()
                        .map(|l| format!("{}:{}", l.capability, l.strength))
                        .collect();
                    let status = if model.is_active { "".normal() } else { " inactive".red() };
                    println!(
                        "{:>4}  {} [{}] success {:.1}%{}",
                        model.id,
                        model.model_id.bright_white(),
                        model.model_type,
                        model.success_rate,
                        status
                    );
                    if !caps.is_empty() {
                        println!("      {}", caps.join(" ").dimmed());
                    }
                }
            })
        }
        ModelAction::Deactivate { model } => {
            let store = app.catalog.lock().await;
            let record = store.find_model(&model)?;
            store.deactivate_model(record.id)?;
            println!("{} Deactivated {}", "✓".green(), record.model_id.bright_white());
            Ok(())
        }
        ModelAction::Remote { model } => {
            let model_id = app.catalog.lock().await.find_model(&model)?.id;
            let remote = app.llm.list_remote_models(model_id).await?;
            output(format, &remote, || {
                for info in &remote {
                    println!("{}", info.id);
                }
            })
        }
        ModelAction::Link {
            model,
            capability,
            strength,
            confidence,
        } => {
            if !(1..=5).contains(&strength) || !(1..=5).contains(&confidence) {
                bail!("strength and confidence must be between 1 and 5");
            }
            let store = app.catalog.lock().await;
            let record = store.find_model(&model)?;
            store.link_capability(&CapabilityLink {
                model_id: record.id,
                capability: capability.clone(),
                strength,
                confidence,
                auto_tagged: false,
            })?;
            println!(
                "{} {} → {} (strength {}, confidence {})",
                "✓".green(),
                record.model_id.bright_white(),
                capability.bright_cyan(),
                strength,
                confidence
            );
            Ok(())
        }
    }
}

async fn agent_command(
    app: &AppContext,
    action: AgentAction,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match action {
        AgentAction::Add {
            agent_id,
            file,
            name,
            system_prompt,
            model,
            capability,
            strategy,
            min_strength,
            skills,
            allowed_capabilities,
        } => {
            let agent = match file {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    let mut agent: AgentConfig = serde_yaml::from_str(&text)
                        .with_context(|| format!("parsing {}", path.display()))?;
                    agent.agent_id = agent_id;
                    agent
                }
                None => {
                    let binding = match model {
                        Some(reference) => ModelBinding::Fixed {
                            model_id: app.catalog.lock().await.find_model(&reference)?.id,
                        },
                        None if !capability.is_empty() => {
                            strategy.parse::<SchedulingStrategy>()?;
                            ModelBinding::Scheduled {
                                required_capabilities: capability,
                                strategy,
                                min_strength,
                            }
                        }
                        None => bail!("an agent needs --model or at least one --capability"),
                    };
                    AgentConfig {
                        name: name.unwrap_or_else(|| agent_id.clone()),
                        agent_id,
                        description: None,
                        system_prompt: system_prompt
                            .unwrap_or_else(|| "You are a helpful assistant.".to_string()),
                        model: binding,
                        skills: non_empty(skills),
                        capabilities: non_empty(allowed_capabilities),
                        params: GenerationParams::new(),
                    }
                }
            };

            app.catalog.lock().await.save_agent(&agent)?;
            app.engine.agent_cache().invalidate(&agent.agent_id);
            output(format, &agent, || {
                println!("{} Saved agent {}", "✓".green(), agent.agent_id.bright_white());
            })
        }
        AgentAction::List => {
            let agents = app.catalog.lock().await.list_agents()?;
            output(format, &agents, || {
                for agent in &agents {
                    let binding = match &agent.model {
                        ModelBinding::Fixed { model_id } => format!("model #{model_id}"),
                        ModelBinding::Scheduled {
                            required_capabilities,
                            strategy,
                            ..
                        } => format!("{} via {}", required_capabilities.join("+"), strategy),
                    };
                    println!("{}  {}", agent.agent_id.bright_white(), binding.dimmed());
                }
            })
        }
    }
}

async fn skill_command(
    app: &AppContext,
    action: SkillAction,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match action {
        SkillAction::Add {
            name,
            description,
            template,
            script,
            language,
        } => {
            let kind = match (template, script) {
                (Some(template), _) => SkillKind::Prompt { template },
                (None, Some(path)) => SkillKind::Script {
                    language: language
                        .parse::<ScriptLanguage>()
                        .map_err(|l| anyhow!("unsupported script language: {l}"))?,
                    source: std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?,
                },
                (None, None) => bail!("a skill needs --template or --script"),
            };
            let skill = app
                .catalog
                .lock()
                .await
                .create_skill(&name, description.as_deref(), &kind)?;
            output(format, &skill, || {
                println!("{} Added skill {} with id {}", "✓".green(), skill.name.bright_white(), skill.id);
            })
        }
        SkillAction::List => {
            let skills = app.catalog.lock().await.list_skills(true)?;
            output(format, &skills, || {
                for skill in &skills {
                    let kind = match &skill.kind {
                        SkillKind::Prompt { .. } => "prompt".to_string(),
                        SkillKind::Script { language, .. } => format!("{language:?}").to_lowercase(),
                    };
                    println!(
                        "{:>4}  {} [{}] {}",
                        skill.id,
                        skill.name.bright_white(),
                        kind,
                        skill.description.as_deref().unwrap_or("").dimmed()
                    );
                }
            })
        }
    }
}

async fn kb_command(app: &AppContext, action: KbAction, format: OutputFormat) -> anyhow::Result<()> {
    match action {
        KbAction::Add {
            knowledge_base,
            title,
            content,
            file,
        } => {
            let content = match (content, file) {
                (Some(content), _) => content,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                (None, None) => bail!("a document needs --content or --file"),
            };
            let doc = app.knowledge.add_document(&knowledge_base, &title, &content).await?;
            output(format, &doc, || {
                println!("{} Added document {} to {}", "✓".green(), doc.title.bright_white(), doc.knowledge_base);
            })
        }
        KbAction::Search { query, kb, top_k } => {
            let hits = app.knowledge.search(kb.as_deref(), &query, top_k).await?;
            output(format, &hits, || println!("{}", format_results(&hits)))
        }
    }
}

fn normalize(
    supplier: &str,
    params: &str,
    model_type: &str,
    to_canonical: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let model_type: ModelType = model_type.parse().map_err(|e: String| anyhow!(e))?;
    let params: GenerationParams = serde_json::from_str(params).context("params must be a JSON object")?;

    let normalizer = ParameterNormalizer::new();
    let translated = if to_canonical {
        normalizer.normalize_parameters(supplier, model_type, &params)
    } else {
        normalizer.denormalize_parameters(supplier, model_type, &params)
    };

    output(format, &translated, || {
        for (key, value) in &translated {
            println!("{} = {}", key.bright_white(), value);
        }
    })
}

// ============================================================================
// Helpers
// ============================================================================

/// Print JSON, or run the text renderer.
fn output<T: Serialize>(format: OutputFormat, value: &T, text: impl FnOnce()) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => text(),
    }
    Ok(())
}

fn non_empty(values: Vec<String>) -> Option<Vec<String>> {
    (!values.is_empty()).then_some(values)
}

fn parse_workload(raw: &str) -> Result<(i64, u32), String> {
    let (id, count) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected MODEL_ID=COUNT, got '{raw}'"))?;
    let id = id.trim().parse().map_err(|_| format!("bad model id '{id}'"))?;
    let count = count.trim().parse().map_err(|_| format!("bad count '{count}'"))?;
    Ok((id, count))
}

/// `KEY=VALUE` pairs; values that parse as JSON keep their type.
fn parse_params(raw: &[String]) -> anyhow::Result<GenerationParams> {
    let mut params = GenerationParams::new();
    for pair in raw {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got '{pair}'"))?;
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        params.insert(key.trim().to_string(), value);
    }
    Ok(params)
}
