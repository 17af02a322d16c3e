// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Scheduling value types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::SchedulerError;

// ============================================================================
// Strategy
// ============================================================================

/// How candidates are ranked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingStrategy {
    /// Weighted capability strength and confidence
    #[default]
    CapabilityFirst,
    /// Cheapest estimated cost first
    CostEffective,
    /// Fastest estimated response first
    PerformanceOptimized,
    /// Blend of capability, cost and speed
    Balanced,
}

impl SchedulingStrategy {
    pub const ALL: [SchedulingStrategy; 4] = [
        Self::CapabilityFirst,
        Self::CostEffective,
        Self::PerformanceOptimized,
        Self::Balanced,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CapabilityFirst => "capability_first",
            Self::CostEffective => "cost_effective",
            Self::PerformanceOptimized => "performance_optimized",
            Self::Balanced => "balanced",
        }
    }
}

impl FromStr for SchedulingStrategy {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or_else(|| SchedulerError::InvalidCriteria(format!("unknown strategy: {s}")))
    }
}

impl fmt::Display for SchedulingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Criteria
// ============================================================================

/// Filter applied to candidate models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSelectionCriteria {
    /// Empty means every active model qualifies
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default = "default_min_strength")]
    pub min_strength: i32,
    #[serde(default)]
    pub max_cost: Option<f64>,
    /// Milliseconds
    #[serde(default)]
    pub max_response_time: Option<u32>,
    #[serde(default)]
    pub preferred_suppliers: Option<Vec<String>>,
    /// Model names or catalog ids
    #[serde(default)]
    pub excluded_models: Option<Vec<String>>,
}

fn default_min_strength() -> i32 {
    1
}

impl Default for ModelSelectionCriteria {
    fn default() -> Self {
        Self {
            required_capabilities: Vec::new(),
            min_strength: default_min_strength(),
            max_cost: None,
            max_response_time: None,
            preferred_suppliers: None,
            excluded_models: None,
        }
    }
}

impl ModelSelectionCriteria {
    pub fn requiring(capabilities: &[&str], min_strength: i32) -> Self {
        Self {
            required_capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            min_strength,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if !(1..=5).contains(&self.min_strength) {
            return Err(SchedulerError::InvalidCriteria(format!(
                "min_strength must be between 1 and 5, got {}",
                self.min_strength
            )));
        }
        if let Some(max_cost) = self.max_cost {
            if max_cost < 0.0 || max_cost.is_nan() {
                return Err(SchedulerError::InvalidCriteria(format!(
                    "max_cost must be non-negative, got {max_cost}"
                )));
            }
        }
        Ok(())
    }

    /// Whether a model is excluded by name or by catalog id.
    pub fn excludes(&self, id: i64, name: &str) -> bool {
        self.excluded_models.as_ref().is_some_and(|excluded| {
            let id = id.to_string();
            excluded.iter().any(|e| e == name || *e == id)
        })
    }

    /// Whether a supplier passes the preference filter.
    pub fn allows_supplier(&self, supplier: &str) -> bool {
        self.preferred_suppliers
            .as_ref()
            .is_none_or(|preferred| preferred.iter().any(|p| p.eq_ignore_ascii_case(supplier)))
    }
}

// ============================================================================
// Results
// ============================================================================

/// A candidate chosen by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledModel {
    /// Catalog id
    pub model_id: i64,
    /// Supplier model name
    pub model_name: String,
    pub supplier_name: String,
    pub capability_strength: HashMap<String, i32>,
    pub confidence_score: HashMap<String, i32>,
    pub estimated_cost: f64,
    /// Milliseconds
    pub estimated_response_time: u32,
    pub selection_reason: String,
}

/// Outcome of one scheduling call. Operations on a result return a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulingResult {
    pub task_id: String,
    /// Primary followed by fallbacks
    pub selected_models: Vec<ScheduledModel>,
    pub primary_model: ScheduledModel,
    pub fallback_models: Vec<ScheduledModel>,
    pub total_estimated_cost: f64,
    pub total_estimated_time: u32,
    pub scheduling_strategy: SchedulingStrategy,
}

impl SchedulingResult {
    /// Build a result, deriving the selection list and totals.
    pub fn new(
        task_id: impl Into<String>,
        primary: ScheduledModel,
        fallbacks: Vec<ScheduledModel>,
        strategy: SchedulingStrategy,
    ) -> Self {
        let mut selected = Vec::with_capacity(fallbacks.len() + 1);
        selected.push(primary.clone());
        selected.extend(fallbacks.iter().cloned());

        let total_estimated_cost = selected.iter().map(|m| m.estimated_cost).sum();
        let total_estimated_time = selected.iter().map(|m| m.estimated_response_time).sum();

        Self {
            task_id: task_id.into(),
            selected_models: selected,
            primary_model: primary,
            fallback_models: fallbacks,
            total_estimated_cost,
            total_estimated_time,
            scheduling_strategy: strategy,
        }
    }

    /// Same task and strategy with a different ordering.
    pub fn reordered(&self, primary: ScheduledModel, fallbacks: Vec<ScheduledModel>) -> Self {
        Self::new(self.task_id.clone(), primary, fallbacks, self.scheduling_strategy)
    }

    /// Every model id in selection order.
    pub fn model_ids(&self) -> Vec<i64> {
        self.selected_models.iter().map(|m| m.model_id).collect()
    }
}

/// Per-task scheduling state, used for logging transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulingState {
    NoModelSelected,
    PrimarySelected,
    PrimaryFailed,
    PrimaryOverloaded,
}

impl fmt::Display for SchedulingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoModelSelected => "NO_MODEL_SELECTED",
            Self::PrimarySelected => "PRIMARY_SELECTED",
            Self::PrimaryFailed => "PRIMARY_FAILED",
            Self::PrimaryOverloaded => "PRIMARY_OVERLOADED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: i64, cost: f64, time: u32) -> ScheduledModel {
        ScheduledModel {
            model_id: id,
            model_name: format!("m{id}"),
            supplier_name: "s".to_string(),
            capability_strength: HashMap::new(),
            confidence_score: HashMap::new(),
            estimated_cost: cost,
            estimated_response_time: time,
            selection_reason: String::new(),
        }
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "balanced".parse::<SchedulingStrategy>().unwrap(),
            SchedulingStrategy::Balanced
        );
        assert_eq!(
            "Cost-Effective".parse::<SchedulingStrategy>().unwrap(),
            SchedulingStrategy::CostEffective
        );
        assert!("fastest".parse::<SchedulingStrategy>().is_err());
    }

    #[test]
    fn test_result_totals() {
        let result = SchedulingResult::new(
            "t1",
            model(1, 0.01, 1000),
            vec![model(2, 0.02, 2000)],
            SchedulingStrategy::CostEffective,
        );
        assert_eq!(result.model_ids(), vec![1, 2]);
        assert!((result.total_estimated_cost - 0.03).abs() < 1e-9);
        assert_eq!(result.total_estimated_time, 3000);
    }

    #[test]
    fn test_criteria_filters() {
        let criteria = ModelSelectionCriteria {
            preferred_suppliers: Some(vec!["OpenAI".to_string()]),
            excluded_models: Some(vec!["gpt-4".to_string(), "7".to_string()]),
            ..Default::default()
        };
        assert!(criteria.allows_supplier("openai"));
        assert!(!criteria.allows_supplier("deepseek"));
        assert!(criteria.excludes(1, "gpt-4"));
        assert!(criteria.excludes(7, "other"));
        assert!(!criteria.excludes(8, "other"));

        assert!(ModelSelectionCriteria::requiring(&["chat"], 6).validate().is_err());
        assert!(ModelSelectionCriteria::requiring(&["chat"], 3).validate().is_ok());
    }
}
