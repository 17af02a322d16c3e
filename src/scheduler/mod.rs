// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Model scheduling: choose a primary model and ordered fallbacks for a set
//! of required capabilities.
//!
//! Selection order:
//! 1. Configured defaults (global or scene), lower priority winning
//! 2. Filtered and ranked catalog models
//!
//! Results are values. [`AgentModelScheduler::perform_fallback`] and
//! [`AgentModelScheduler::load_balance`] return new results.

pub mod estimates;
pub mod scoring;
pub mod types;

pub use estimates::{estimate_for, Estimate};
pub use types::{
    ModelSelectionCriteria, ScheduledModel, SchedulingResult, SchedulingState, SchedulingStrategy,
};

use std::collections::HashMap;

use tracing::{debug, error, info, warn};

use crate::catalog::{DefaultModelEntry, DefaultScope, ModelProfile, SharedCatalog};
use crate::error::SchedulerError;

/// Workload above which the primary is demoted.
pub const LOAD_BALANCE_THRESHOLD: u32 = 10;

/// Number of fallbacks kept behind the primary.
pub const MAX_FALLBACKS: usize = 2;

/// Picks models from the catalog.
#[derive(Clone)]
pub struct AgentModelScheduler {
    catalog: SharedCatalog,
}

impl AgentModelScheduler {
    pub fn new(catalog: SharedCatalog) -> Self {
        Self { catalog }
    }

    /// Select a primary model and up to two fallbacks.
    pub async fn schedule_models(
        &self,
        task_id: &str,
        criteria: &ModelSelectionCriteria,
        strategy: SchedulingStrategy,
        use_defaults: bool,
    ) -> Result<SchedulingResult, SchedulerError> {
        criteria.validate()?;

        let (profiles, defaults) = {
            let store = self.catalog.lock().await;
            let profiles = store.active_model_profiles()?;
            let defaults = if use_defaults {
                let global = store.get_default_model(&DefaultScope::Global)?;
                let scene = match criteria.required_capabilities.first() {
                    Some(capability) => {
                        store.get_default_model(&DefaultScope::Scene(capability.clone()))?
                    }
                    None => None,
                };
                (global, scene)
            } else {
                (None, None)
            };
            (profiles, defaults)
        };

        if use_defaults {
            if let Some(result) =
                self.schedule_from_defaults(task_id, criteria, strategy, &profiles, defaults)
            {
                return Ok(result);
            }
        }

        let ranked = rank_candidates(&profiles, criteria, strategy, None);
        let mut ranked = ranked.into_iter();
        let Some(primary) = ranked.next() else {
            warn!(
                task_id,
                state = %SchedulingState::NoModelSelected,
                capabilities = ?criteria.required_capabilities,
                min_strength = criteria.min_strength,
                "No model matches criteria"
            );
            return Err(SchedulerError::NoMatchingModel {
                capabilities: criteria.required_capabilities.clone(),
                min_strength: criteria.min_strength,
            });
        };
        let fallbacks: Vec<ScheduledModel> = ranked.take(MAX_FALLBACKS).collect();

        info!(
            task_id,
            state = %SchedulingState::PrimarySelected,
            model_id = primary.model_id,
            model = %primary.model_name,
            fallbacks = fallbacks.len(),
            strategy = %strategy,
            "Scheduled models"
        );
        Ok(SchedulingResult::new(task_id, primary, fallbacks, strategy))
    }

    /// Default-model path. Returns `None` when no usable default exists.
    fn schedule_from_defaults(
        &self,
        task_id: &str,
        criteria: &ModelSelectionCriteria,
        strategy: SchedulingStrategy,
        profiles: &[ModelProfile],
        (global, scene): (Option<DefaultModelEntry>, Option<DefaultModelEntry>),
    ) -> Option<SchedulingResult> {
        // Scene wins ties
        let chosen = match (global, scene) {
            (Some(g), Some(s)) => {
                if g.priority < s.priority {
                    g
                } else {
                    s
                }
            }
            (Some(g), None) => g,
            (None, Some(s)) => s,
            (None, None) => return None,
        };

        let Some(profile) = profiles.iter().find(|p| p.model.id == chosen.model_id) else {
            debug!(task_id, model_id = chosen.model_id, "Default model is not active");
            return None;
        };
        if criteria.excludes(profile.model.id, &profile.model.model_id) {
            debug!(task_id, model_id = chosen.model_id, "Default model is excluded");
            return None;
        }

        let mut primary = scheduled_from_profile(profile);
        primary.selection_reason = format!(
            "{} default (priority {})",
            match chosen.scope {
                DefaultScope::Global => "global".to_string(),
                DefaultScope::Scene(ref capability) => format!("scene '{capability}'"),
            },
            chosen.priority
        );

        let fallbacks: Vec<ScheduledModel> =
            rank_candidates(profiles, criteria, strategy, Some(primary.model_id))
                .into_iter()
                .take(MAX_FALLBACKS)
                .collect();

        info!(
            task_id,
            state = %SchedulingState::PrimarySelected,
            model_id = primary.model_id,
            model = %primary.model_name,
            reason = %primary.selection_reason,
            "Scheduled default model"
        );
        Some(SchedulingResult::new(task_id, primary, fallbacks, strategy))
    }

    /// React to a failed model.
    ///
    /// A failed primary is replaced by the first fallback; a failed fallback
    /// is dropped. With no fallback the result comes back unchanged. The
    /// failure is recorded against the model's success rate; storage errors
    /// are logged, never returned.
    pub async fn perform_fallback(
        &self,
        result: &SchedulingResult,
        failed_model_id: i64,
    ) -> SchedulingResult {
        self.record_failure(failed_model_id).await;

        if result.primary_model.model_id == failed_model_id {
            let Some((next, rest)) = result.fallback_models.split_first() else {
                error!(
                    task_id = %result.task_id,
                    state = %SchedulingState::PrimaryFailed,
                    model_id = failed_model_id,
                    "Primary model failed and no fallback is available"
                );
                return result.clone();
            };

            info!(
                task_id = %result.task_id,
                state = %SchedulingState::PrimaryFailed,
                failed = failed_model_id,
                promoted = next.model_id,
                "Promoted fallback model"
            );
            return result.reordered(next.clone(), rest.to_vec());
        }

        if result
            .fallback_models
            .iter()
            .any(|m| m.model_id == failed_model_id)
        {
            let remaining = result
                .fallback_models
                .iter()
                .filter(|m| m.model_id != failed_model_id)
                .cloned()
                .collect();
            debug!(task_id = %result.task_id, model_id = failed_model_id, "Removed failed fallback");
            return result.reordered(result.primary_model.clone(), remaining);
        }

        warn!(
            task_id = %result.task_id,
            model_id = failed_model_id,
            "Failed model is not part of the scheduling result"
        );
        result.clone()
    }

    async fn record_failure(&self, model_id: i64) {
        let mut store = self.catalog.lock().await;
        if let Err(e) = store.update_model_performance(model_id, false) {
            error!(model_id, error = %e, "Failed to record model failure");
        }
    }

    /// Record a successful call against a model's success rate.
    pub async fn record_success(&self, model_id: i64) {
        let mut store = self.catalog.lock().await;
        if let Err(e) = store.update_model_performance(model_id, true) {
            error!(model_id, error = %e, "Failed to record model success");
        }
    }

    /// Demote an overloaded primary.
    ///
    /// When the primary's workload exceeds [`LOAD_BALANCE_THRESHOLD`] the
    /// first fallback is promoted and the old primary moves to the end of the
    /// fallback list. Otherwise the result is returned unchanged.
    pub fn load_balance(
        &self,
        current_workload: &HashMap<i64, u32>,
        result: &SchedulingResult,
    ) -> SchedulingResult {
        let primary = &result.primary_model;
        let load = current_workload
            .get(&primary.model_id)
            .copied()
            .unwrap_or(0);
        if load <= LOAD_BALANCE_THRESHOLD {
            return result.clone();
        }

        let Some((next, rest)) = result.fallback_models.split_first() else {
            warn!(
                task_id = %result.task_id,
                model_id = primary.model_id,
                load,
                "Primary overloaded but no fallback available"
            );
            return result.clone();
        };

        let mut fallbacks = rest.to_vec();
        fallbacks.push(primary.clone());

        info!(
            task_id = %result.task_id,
            state = %SchedulingState::PrimaryOverloaded,
            demoted = primary.model_id,
            promoted = next.model_id,
            load,
            "Rebalanced primary model"
        );
        result.reordered(next.clone(), fallbacks)
    }
}

fn scheduled_from_profile(profile: &ModelProfile) -> ScheduledModel {
    let estimate = estimate_for(&profile.model.model_id);
    ScheduledModel {
        model_id: profile.model.id,
        model_name: profile.model.model_id.clone(),
        supplier_name: profile.supplier_name.clone(),
        capability_strength: profile.strengths.clone(),
        confidence_score: profile.confidence.clone(),
        estimated_cost: estimate.cost,
        estimated_response_time: estimate.response_time_ms,
        selection_reason: String::new(),
    }
}

fn passes_filter(model: &ScheduledModel, criteria: &ModelSelectionCriteria) -> bool {
    if criteria.excludes(model.model_id, &model.model_name) {
        return false;
    }
    if !criteria.allows_supplier(&model.supplier_name) {
        return false;
    }
    let strong_enough = criteria.required_capabilities.iter().all(|capability| {
        model
            .capability_strength
            .get(capability)
            .is_some_and(|&strength| strength >= criteria.min_strength)
    });
    if !strong_enough {
        return false;
    }
    if criteria
        .max_cost
        .is_some_and(|max| model.estimated_cost > max)
    {
        return false;
    }
    if criteria
        .max_response_time
        .is_some_and(|max| model.estimated_response_time > max)
    {
        return false;
    }
    true
}

/// Filter and rank active models, best first.
fn rank_candidates(
    profiles: &[ModelProfile],
    criteria: &ModelSelectionCriteria,
    strategy: SchedulingStrategy,
    skip: Option<i64>,
) -> Vec<ScheduledModel> {
    let mut candidates: Vec<ScheduledModel> = profiles
        .iter()
        .filter(|p| Some(p.model.id) != skip)
        .map(scheduled_from_profile)
        .filter(|m| passes_filter(m, criteria))
        .collect();

    scoring::rank(&mut candidates, &criteria.required_capabilities, strategy);
    for candidate in &mut candidates {
        candidate.selection_reason =
            scoring::selection_reason(candidate, &criteria.required_capabilities, strategy);
    }
    candidates
}
