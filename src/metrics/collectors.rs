//! High-level recording interface over the raw Prometheus metrics.
//!
//! Every method is a no-op for metrics that were never initialized, so the
//! orchestrator can record unconditionally.

use super::prometheus::{
    ATTEMPTS_TOTAL, ATTEMPT_LATENCY, COST_USD_TOTAL, REQUESTS_TOTAL, TOKENS_TOTAL,
};
use crate::llm::provider::TokenUsage;

/// Metrics collector for orchestrator activity.
///
/// # Example
///
/// ```ignore
/// use llm_orchestrator::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
/// collector.record_attempt("outline", "deepseek-chat", "success", 2.5);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Create a new MetricsCollector instance.
    pub fn new() -> Self {
        Self
    }

    /// Record one attempt.
    ///
    /// # Arguments
    ///
    /// * `stage` - Pipeline stage name
    /// * `model` - Model the attempt was sent to
    /// * `outcome` - Attempt outcome tag (e.g., "success", "validation_failed")
    /// * `latency_secs` - Time spent on the attempt in seconds
    pub fn record_attempt(&self, stage: &str, model: &str, outcome: &str, latency_secs: f64) {
        if let Some(attempts) = ATTEMPTS_TOTAL.get() {
            attempts.with_label_values(&[stage, model, outcome]).inc();
        }

        if let Some(latency) = ATTEMPT_LATENCY.get() {
            latency.with_label_values(&[model]).observe(latency_secs);
        }

        tracing::trace!(
            stage = stage,
            model = model,
            outcome = outcome,
            latency_secs = latency_secs,
            "Recorded attempt metric"
        );
    }

    /// Record billed usage for a model.
    pub fn record_usage(&self, model: &str, usage: &TokenUsage, cost_usd: f64) {
        if let Some(tokens) = TOKENS_TOTAL.get() {
            tokens
                .with_label_values(&[model, "prompt"])
                .inc_by(usage.prompt_tokens as f64);
            tokens
                .with_label_values(&[model, "completion"])
                .inc_by(usage.completion_tokens as f64);
            if let Some(reasoning) = usage.reasoning_tokens {
                tokens
                    .with_label_values(&[model, "reasoning"])
                    .inc_by(reasoning as f64);
            }
        }

        if let Some(cost) = COST_USD_TOTAL.get() {
            cost.with_label_values(&[model]).inc_by(cost_usd);
        }
    }

    /// Record the final result of an orchestrator invocation.
    pub fn record_request(&self, stage: &str, result: &str) {
        if let Some(requests) = REQUESTS_TOTAL.get() {
            requests.with_label_values(&[stage, result]).inc();
        }
    }
}
