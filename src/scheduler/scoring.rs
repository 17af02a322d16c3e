// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Strategy-specific ranking.

use std::cmp::Ordering;

use super::types::{ScheduledModel, SchedulingStrategy};

const STRENGTH_WEIGHT: f64 = 0.7;
const CONFIDENCE_WEIGHT: f64 = 0.3;

const BALANCED_CAPABILITY: f64 = 0.5;
const BALANCED_COST: f64 = 0.3;
const BALANCED_PERFORMANCE: f64 = 0.2;

/// Weighted strength/confidence over the required capabilities, 0..=5.
///
/// With no required capabilities the model's whole capability map is used.
pub fn capability_score(model: &ScheduledModel, required: &[String]) -> f64 {
    let names: Vec<&String> = if required.is_empty() {
        model.capability_strength.keys().collect()
    } else {
        required.iter().collect()
    };
    if names.is_empty() {
        return 0.0;
    }

    let total: f64 = names
        .iter()
        .map(|name| {
            let strength = model.capability_strength.get(*name).copied().unwrap_or(0) as f64;
            let confidence = model.confidence_score.get(*name).copied().unwrap_or(0) as f64;
            strength * STRENGTH_WEIGHT + confidence * CONFIDENCE_WEIGHT
        })
        .sum();
    total / names.len() as f64
}

/// Sort candidates best-first for the strategy. The sort is stable, so ties
/// keep catalog order.
pub fn rank(candidates: &mut [ScheduledModel], required: &[String], strategy: SchedulingStrategy) {
    match strategy {
        SchedulingStrategy::CapabilityFirst => {
            candidates.sort_by(|a, b| {
                capability_score(b, required).total_cmp(&capability_score(a, required))
            });
        }
        SchedulingStrategy::CostEffective => {
            candidates.sort_by(|a, b| {
                a.estimated_cost
                    .total_cmp(&b.estimated_cost)
                    .then_with(|| {
                        capability_score(b, required).total_cmp(&capability_score(a, required))
                    })
            });
        }
        SchedulingStrategy::PerformanceOptimized => {
            candidates.sort_by(|a, b| {
                a.estimated_response_time
                    .cmp(&b.estimated_response_time)
                    .then_with(|| {
                        capability_score(b, required).total_cmp(&capability_score(a, required))
                    })
            });
        }
        SchedulingStrategy::Balanced => {
            let max_cost = candidates
                .iter()
                .map(|m| m.estimated_cost)
                .fold(0.0_f64, f64::max);
            let max_time = candidates
                .iter()
                .map(|m| m.estimated_response_time)
                .max()
                .unwrap_or(0) as f64;

            let score = |m: &ScheduledModel| {
                let capability = capability_score(m, required) / 5.0;
                let cost = if max_cost > 0.0 {
                    1.0 - m.estimated_cost / max_cost
                } else {
                    1.0
                };
                let performance = if max_time > 0.0 {
                    1.0 - m.estimated_response_time as f64 / max_time
                } else {
                    1.0
                };
                capability * BALANCED_CAPABILITY + cost * BALANCED_COST + performance * BALANCED_PERFORMANCE
            };
            candidates.sort_by(|a, b| score(b).partial_cmp(&score(a)).unwrap_or(Ordering::Equal));
        }
    }
}

/// Human-readable reason attached to each selected model.
pub fn selection_reason(model: &ScheduledModel, required: &[String], strategy: SchedulingStrategy) -> String {
    match strategy {
        SchedulingStrategy::CapabilityFirst => {
            format!("capability score {:.2}", capability_score(model, required))
        }
        SchedulingStrategy::CostEffective => {
            format!("estimated cost {}", model.estimated_cost)
        }
        SchedulingStrategy::PerformanceOptimized => {
            format!("estimated response time {}ms", model.estimated_response_time)
        }
        SchedulingStrategy::Balanced => format!(
            "balanced (capability {:.2}, cost {}, {}ms)",
            capability_score(model, required),
            model.estimated_cost,
            model.estimated_response_time
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn model(id: i64, strength: i32, confidence: i32, cost: f64, time: u32) -> ScheduledModel {
        ScheduledModel {
            model_id: id,
            model_name: format!("m{id}"),
            supplier_name: "s".to_string(),
            capability_strength: HashMap::from([("code_generation".to_string(), strength)]),
            confidence_score: HashMap::from([("code_generation".to_string(), confidence)]),
            estimated_cost: cost,
            estimated_response_time: time,
            selection_reason: String::new(),
        }
    }

    fn ids(models: &[ScheduledModel]) -> Vec<i64> {
        models.iter().map(|m| m.model_id).collect()
    }

    fn required() -> Vec<String> {
        vec!["code_generation".to_string()]
    }

    #[test]
    fn test_capability_first() {
        let mut models = vec![model(1, 2, 5, 0.0, 100), model(2, 5, 1, 1.0, 5000)];
        rank(&mut models, &required(), SchedulingStrategy::CapabilityFirst);
        assert_eq!(ids(&models), vec![2, 1]);
    }

    #[test]
    fn test_cost_and_performance() {
        let mut models = vec![model(1, 3, 3, 0.03, 2000), model(2, 3, 3, 0.001, 3000)];
        rank(&mut models, &required(), SchedulingStrategy::CostEffective);
        assert_eq!(ids(&models), vec![2, 1]);

        rank(&mut models, &required(), SchedulingStrategy::PerformanceOptimized);
        assert_eq!(ids(&models), vec![1, 2]);
    }

    #[test]
    fn test_balanced_prefers_cheap_fast_when_capability_equal() {
        let mut models = vec![
            model(1, 4, 4, 0.03, 2000),
            model(2, 4, 4, 0.0, 800),
            model(3, 4, 4, 0.01, 3000),
        ];
        rank(&mut models, &required(), SchedulingStrategy::Balanced);
        assert_eq!(models[0].model_id, 2);
    }

    #[test]
    fn test_stable_on_ties() {
        let mut models = vec![model(5, 3, 3, 0.0, 100), model(3, 3, 3, 0.0, 100)];
        rank(&mut models, &required(), SchedulingStrategy::CapabilityFirst);
        assert_eq!(ids(&models), vec![5, 3]);
    }
}
