// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! API and operation monitoring.
//!
//! [`ApiMonitor`] is constructed once by the application context and shared
//! through an `Arc`. It records every provider call (per supplier/model),
//! named internal operations (scheduling, executions, skills) and token
//! totals.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Collects API call and operation metrics.
#[derive(Debug)]
pub struct ApiMonitor {
    /// Provider calls keyed by `supplier/model`.
    api_calls: RwLock<HashMap<String, CallMetrics>>,

    /// Internal operations keyed by name.
    operations: RwLock<HashMap<String, CallMetrics>>,

    input_tokens: AtomicU64,
    output_tokens: AtomicU64,

    start_time: Instant,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ApiMonitor {
    pub fn new() -> Self {
        Self {
            api_calls: RwLock::new(HashMap::new()),
            operations: RwLock::new(HashMap::new()),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record one provider call.
    pub fn record_api_call(&self, supplier: &str, model: &str, duration: Duration, success: bool) {
        let key = format!("{supplier}/{model}");
        write(&self.api_calls)
            .entry(key)
            .or_default()
            .record(duration, success);
    }

    /// Record a named internal operation.
    pub fn record_operation(&self, name: &str, duration: Duration, success: bool) {
        write(&self.operations)
            .entry(name.to_string())
            .or_default()
            .record(duration, success);
    }

    /// Record token usage.
    pub fn record_tokens(&self, input: u64, output: u64) {
        self.input_tokens.fetch_add(input, Ordering::Relaxed);
        self.output_tokens.fetch_add(output, Ordering::Relaxed);
    }

    /// Metrics for one `supplier/model` pair.
    pub fn api_metrics(&self, supplier: &str, model: &str) -> Option<CallMetrics> {
        read(&self.api_calls)
            .get(&format!("{supplier}/{model}"))
            .cloned()
    }

    pub fn operation_metrics(&self, name: &str) -> Option<CallMetrics> {
        read(&self.operations).get(name).cloned()
    }

    /// Total (input, output) tokens.
    pub fn token_counts(&self) -> (u64, u64) {
        (
            self.input_tokens.load(Ordering::Relaxed),
            self.output_tokens.load(Ordering::Relaxed),
        )
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MonitorSnapshot {
        let (input_tokens, output_tokens) = self.token_counts();
        MonitorSnapshot {
            api_calls: read(&self.api_calls).clone(),
            operations: read(&self.operations).clone(),
            input_tokens,
            output_tokens,
            uptime_ms: self.uptime().as_millis() as u64,
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        write(&self.api_calls).clear();
        write(&self.operations).clear();
        self.input_tokens.store(0, Ordering::Relaxed);
        self.output_tokens.store(0, Ordering::Relaxed);
    }
}

impl Default for ApiMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters and latency distribution for one key.
#[derive(Debug, Clone, Serialize)]
pub struct CallMetrics {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    #[serde(serialize_with = "as_millis")]
    pub total_duration: Duration,
    #[serde(serialize_with = "as_millis")]
    pub max_duration: Duration,
    #[serde(skip)]
    pub histogram: Histogram,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl CallMetrics {
    pub fn record(&mut self, duration: Duration, success: bool) {
        self.calls += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_duration += duration;
        self.max_duration = self.max_duration.max(duration);
        self.histogram.record(duration);
    }

    pub fn avg_duration(&self) -> Duration {
        if self.calls == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.calls as u32
        }
    }

    /// Success rate in 0.0..=1.0; 1.0 when nothing was recorded.
    pub fn success_rate(&self) -> f64 {
        if self.calls == 0 {
            1.0
        } else {
            self.successes as f64 / self.calls as f64
        }
    }
}

impl Default for CallMetrics {
    fn default() -> Self {
        Self {
            calls: 0,
            successes: 0,
            failures: 0,
            total_duration: Duration::ZERO,
            max_duration: Duration::ZERO,
            histogram: Histogram::default(),
        }
    }
}

/// Fixed-bucket latency histogram.
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Upper bounds in milliseconds; one extra overflow bucket.
    bounds_ms: Vec<u64>,
    counts: Vec<u64>,
}

impl Histogram {
    pub fn with_bounds(bounds_ms: Vec<u64>) -> Self {
        let counts = vec![0; bounds_ms.len() + 1];
        Self { bounds_ms, counts }
    }

    pub fn record(&mut self, duration: Duration) {
        let millis = duration.as_millis() as u64;
        let idx = self
            .bounds_ms
            .iter()
            .position(|&b| millis <= b)
            .unwrap_or(self.bounds_ms.len());
        self.counts[idx] += 1;
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Approximate percentile, reported as the bucket's upper bound.
    pub fn percentile(&self, p: f64) -> Duration {
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }

        let target = (total as f64 * p / 100.0).ceil() as u64;
        let mut cumulative = 0u64;
        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                let millis = self
                    .bounds_ms
                    .get(i)
                    .copied()
                    .unwrap_or_else(|| self.bounds_ms.last().copied().unwrap_or(0) * 2);
                return Duration::from_millis(millis);
            }
        }
        Duration::ZERO
    }

    pub fn p50(&self) -> Duration {
        self.percentile(50.0)
    }

    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // LLM calls sit in the hundreds of ms to tens of seconds
        Self::with_bounds(vec![10, 100, 500, 1_000, 2_500, 5_000, 10_000, 30_000, 60_000])
    }
}

/// Point-in-time copy of the monitor.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub api_calls: HashMap<String, CallMetrics>,
    pub operations: HashMap<String, CallMetrics>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub uptime_ms: u64,
}

impl MonitorSnapshot {
    /// Format as a human-readable report.
    pub fn format_report(&self) -> String {
        let mut report = String::new();
        report.push_str("=== API Monitor ===\n");
        report.push_str(&format!("Uptime: {}ms\n", self.uptime_ms));
        report.push_str(&format!(
            "Tokens: {} input, {} output\n",
            self.input_tokens, self.output_tokens
        ));

        let mut section = |title: &str, map: &HashMap<String, CallMetrics>| {
            if map.is_empty() {
                return;
            }
            report.push_str(&format!("\n{title}:\n"));
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            for key in keys {
                let m = &map[key];
                report.push_str(&format!(
                    "  {}: {} calls, {:.1}% success, avg {:.2?}, p99 {:.2?}\n",
                    key,
                    m.calls,
                    m.success_rate() * 100.0,
                    m.avg_duration(),
                    m.histogram.p99()
                ));
            }
        };

        section("API calls", &self.api_calls);
        section("Operations", &self.operations);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_metrics() {
        let mut metrics = CallMetrics::default();
        metrics.record(Duration::from_millis(100), true);
        metrics.record(Duration::from_millis(200), true);
        metrics.record(Duration::from_millis(60), false);

        assert_eq!(metrics.calls, 3);
        assert_eq!(metrics.failures, 1);
        assert_eq!(metrics.avg_duration(), Duration::from_millis(120));
        assert!((metrics.success_rate() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_histogram_percentiles() {
        let mut hist = Histogram::default();
        for _ in 0..100 {
            hist.record(Duration::from_millis(300));
        }
        assert_eq!(hist.p50(), Duration::from_millis(500));
        assert_eq!(hist.p99(), Duration::from_millis(500));

        hist.record(Duration::from_secs(120));
        assert_eq!(hist.counts()[hist.counts().len() - 1], 1);
    }

    #[test]
    fn test_monitor_records_per_model() {
        let monitor = ApiMonitor::new();
        monitor.record_api_call("openai", "gpt-4o", Duration::from_millis(900), true);
        monitor.record_api_call("openai", "gpt-4o", Duration::from_millis(1100), false);
        monitor.record_api_call("ollama", "llama3", Duration::from_millis(50), true);
        monitor.record_tokens(120, 30);

        let gpt = monitor.api_metrics("openai", "gpt-4o").unwrap();
        assert_eq!(gpt.calls, 2);
        assert_eq!(gpt.failures, 1);
        assert!(monitor.api_metrics("deepseek", "deepseek-chat").is_none());

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.api_calls.len(), 2);
        assert_eq!(snapshot.input_tokens, 120);
        assert!(snapshot.format_report().contains("openai/gpt-4o"));
    }

    #[test]
    fn test_monitor_reset() {
        let monitor = ApiMonitor::new();
        monitor.record_operation("scheduler.schedule_models", Duration::from_millis(2), true);
        monitor.record_tokens(10, 5);
        monitor.reset();

        assert!(monitor.operation_metrics("scheduler.schedule_models").is_none());
        assert_eq!(monitor.token_counts(), (0, 0));
    }

    #[test]
    fn test_snapshot_serializes() {
        let monitor = ApiMonitor::new();
        monitor.record_operation("engine.execute", Duration::from_millis(40), true);
        let json = serde_json::to_value(monitor.snapshot()).unwrap();
        assert_eq!(json["operations"]["engine.execute"]["calls"], 1);
        assert_eq!(json["operations"]["engine.execute"]["total_duration"], 40);
    }
}
