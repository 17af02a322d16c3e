// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Translation between canonical generation parameters and the key names
//! each supplier expects.
//!
//! Rules are keyed by `(supplier, model type)`. A rule maps one canonical key
//! to one supplier key, optionally with a linear scale applied to numbers.
//! Keys without a rule pass through untouched in both directions.

use std::collections::HashMap;

use serde_json::Value;

use crate::catalog::{ModelType, ParameterTemplate};
use crate::types::GenerationParams;

/// One canonical ↔ supplier key mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamRule {
    pub canonical: String,
    pub supplier_key: String,
    /// Supplier value = canonical value × scale
    pub scale: Option<f64>,
}

impl ParamRule {
    pub fn rename(canonical: &str, supplier_key: &str) -> Self {
        Self {
            canonical: canonical.to_string(),
            supplier_key: supplier_key.to_string(),
            scale: None,
        }
    }

    pub fn scaled(canonical: &str, supplier_key: &str, scale: f64) -> Self {
        Self {
            scale: Some(scale),
            ..Self::rename(canonical, supplier_key)
        }
    }
}

/// Rule table lookup and application.
#[derive(Debug, Clone)]
pub struct ParameterNormalizer {
    rules: HashMap<(String, ModelType), Vec<ParamRule>>,
}

impl Default for ParameterNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterNormalizer {
    /// Normalizer with the built-in rule table.
    pub fn new() -> Self {
        let mut normalizer = Self {
            rules: HashMap::new(),
        };

        // Ollama is reached through its OpenAI-compatible `/v1` endpoint, which
        // takes canonical keys, so it has no rules.

        normalizer.add_rules(
            "openai",
            ModelType::Image,
            vec![
                ParamRule::rename("image_size", "size"),
                ParamRule::rename("image_count", "n"),
            ],
        );

        normalizer
    }

    /// Register rules for a supplier and model type, replacing any existing.
    pub fn add_rules(&mut self, supplier: &str, model_type: ModelType, rules: Vec<ParamRule>) {
        self.rules
            .insert((supplier.to_lowercase(), model_type), rules);
    }

    /// Rules for a supplier and model type. Unknown suppliers get none,
    /// which makes them identity mappings.
    pub fn rules_for(&self, supplier: &str, model_type: ModelType) -> &[ParamRule] {
        self.rules
            .get(&(supplier.to_lowercase(), model_type))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Supplier keys → canonical keys.
    pub fn normalize_parameters(
        &self,
        supplier: &str,
        model_type: ModelType,
        params: &GenerationParams,
    ) -> GenerationParams {
        let rules = self.rules_for(supplier, model_type);
        let mut out = GenerationParams::new();

        for (key, value) in params {
            match rules.iter().find(|r| &r.supplier_key == key) {
                Some(rule) => {
                    let value = match rule.scale {
                        Some(scale) => scale_value(value, 1.0 / scale),
                        None => value.clone(),
                    };
                    out.insert(rule.canonical.clone(), value);
                }
                None => {
                    // Keep an already-canonical value if the same key also
                    // arrived in supplier form.
                    out.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }

        out
    }

    /// Canonical keys → supplier keys.
    pub fn denormalize_parameters(
        &self,
        supplier: &str,
        model_type: ModelType,
        params: &GenerationParams,
    ) -> GenerationParams {
        let rules = self.rules_for(supplier, model_type);
        let mut out = GenerationParams::new();

        for (key, value) in params {
            match rules.iter().find(|r| &r.canonical == key) {
                Some(rule) => {
                    let value = match rule.scale {
                        Some(scale) => scale_value(value, scale),
                        None => value.clone(),
                    };
                    out.insert(rule.supplier_key.clone(), value);
                }
                None => {
                    out.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }

        out
    }
}

fn scale_value(value: &Value, factor: f64) -> Value {
    match value.as_f64() {
        Some(n) if !value.is_u64() && !value.is_i64() => {
            serde_json::Number::from_f64(n * factor)
                .map(Value::Number)
                .unwrap_or_else(|| value.clone())
        }
        Some(n) => {
            let scaled = n * factor;
            if scaled.fract() == 0.0 {
                Value::from(scaled as i64)
            } else {
                serde_json::Number::from_f64(scaled)
                    .map(Value::Number)
                    .unwrap_or_else(|| value.clone())
            }
        }
        None => value.clone(),
    }
}

/// Merge a stored template with request overrides; overrides win.
pub fn apply_template(
    template: Option<&ParameterTemplate>,
    overrides: &GenerationParams,
) -> GenerationParams {
    let mut merged = template.map(|t| t.params.clone()).unwrap_or_default();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> GenerationParams {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_ollama_keeps_canonical_keys() {
        let normalizer = ParameterNormalizer::new();
        let canonical = params(json!({
            "max_tokens": 256,
            "frequency_penalty": 0.5,
            "temperature": 0.4
        }));

        let supplier = normalizer.denormalize_parameters("Ollama", ModelType::Chat, &canonical);
        assert_eq!(supplier, canonical);
        assert!(!supplier.contains_key("num_predict"));
        assert!(!supplier.contains_key("repeat_penalty"));

        let back = normalizer.normalize_parameters("ollama", ModelType::Completion, &supplier);
        assert_eq!(back, canonical);
    }

    #[test]
    fn test_openai_image_keys_round_trip() {
        let normalizer = ParameterNormalizer::new();
        let canonical = params(json!({"image_size": "512x512", "image_count": 2}));

        let supplier = normalizer.denormalize_parameters("openai", ModelType::Image, &canonical);
        assert_eq!(supplier["size"], json!("512x512"));
        assert_eq!(supplier["n"], json!(2));
        assert!(!supplier.contains_key("image_size"));

        let back = normalizer.normalize_parameters("OpenAI", ModelType::Image, &supplier);
        assert_eq!(back, canonical);
    }

    #[test]
    fn test_unknown_supplier_is_identity() {
        let normalizer = ParameterNormalizer::new();
        let input = params(json!({"max_tokens": 100, "top_p": 0.9}));

        assert_eq!(
            normalizer.denormalize_parameters("acme", ModelType::Chat, &input),
            input
        );
        assert_eq!(
            normalizer.normalize_parameters("openai", ModelType::Chat, &input),
            input
        );
    }

    #[test]
    fn test_scaled_rule() {
        let mut normalizer = ParameterNormalizer::new();
        normalizer.add_rules(
            "percent",
            ModelType::Chat,
            vec![ParamRule::scaled("temperature", "heat", 100.0)],
        );

        let supplier =
            normalizer.denormalize_parameters("percent", ModelType::Chat, &params(json!({"temperature": 0.5})));
        assert_eq!(supplier["heat"].as_f64(), Some(50.0));

        let canonical = normalizer.normalize_parameters("percent", ModelType::Chat, &supplier);
        assert_eq!(canonical["temperature"].as_f64(), Some(0.5));
    }

    #[test]
    fn test_apply_template_overrides_win() {
        let template = ParameterTemplate {
            id: 1,
            name: "precise".to_string(),
            model_type: ModelType::Chat,
            params: params(json!({"temperature": 0.1, "max_tokens": 500})),
            version: 2,
            updated_at: 0,
        };

        let merged = apply_template(Some(&template), &params(json!({"temperature": 0.9})));
        assert_eq!(merged["temperature"], json!(0.9));
        assert_eq!(merged["max_tokens"], json!(500));

        let merged = apply_template(None, &params(json!({"top_p": 1})));
        assert_eq!(merged.len(), 1);
    }
}
