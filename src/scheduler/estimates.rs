// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Static cost and latency estimates keyed on model-name substrings.

/// Estimated cost per call (relative units) and response time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub cost: f64,
    pub response_time_ms: u32,
}

/// Substring table, most specific first.
const ESTIMATES: &[(&str, f64, u32)] = &[
    ("gpt-4o-mini", 0.00015, 800),
    ("gpt-4o", 0.005, 1500),
    ("gpt-4", 0.03, 2000),
    ("gpt-3.5", 0.002, 1000),
    ("deepseek", 0.001, 1500),
    ("claude", 0.008, 2000),
    ("qwen", 0.0008, 1200),
    ("llama", 0.0, 2500),
    ("mistral", 0.0, 2000),
];

/// Used when no entry matches.
pub const DEFAULT_ESTIMATE: Estimate = Estimate {
    cost: 0.01,
    response_time_ms: 3000,
};

/// Estimate for a model name; case-insensitive.
pub fn estimate_for(model_name: &str) -> Estimate {
    let name = model_name.to_lowercase();
    ESTIMATES
        .iter()
        .find(|(key, _, _)| name.contains(key))
        .map(|&(_, cost, response_time_ms)| Estimate {
            cost,
            response_time_ms,
        })
        .unwrap_or(DEFAULT_ESTIMATE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_most_specific_wins() {
        assert_eq!(estimate_for("gpt-4o-mini").response_time_ms, 800);
        assert_eq!(estimate_for("GPT-4o").response_time_ms, 1500);
        assert_eq!(estimate_for("gpt-4-turbo").cost, 0.03);
        assert_eq!(estimate_for("deepseek-chat").cost, 0.001);
    }

    #[test]
    fn test_unknown_gets_default() {
        assert_eq!(estimate_for("mystery-model"), DEFAULT_ESTIMATE);
    }
}
