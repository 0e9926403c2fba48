//! Prometheus metrics registration and export.
//!
//! This module defines the Prometheus metrics used by llm-orchestrator and
//! provides functions for initializing, registering, and exporting them.

use prometheus::{CounterVec, Encoder, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::{Mutex, OnceLock};

static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Global Prometheus registry for all llm-orchestrator metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Orchestrator invocations, labeled by stage and result (success/exhausted/fatal).
pub static REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Individual attempts, labeled by stage, model and outcome.
pub static ATTEMPTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Provider call plus validation latency in seconds, labeled by model.
pub static ATTEMPT_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Billed tokens, labeled by model and type (prompt/completion/reasoning).
pub static TOKENS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Billed cost in USD, labeled by model.
pub static COST_USD_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls are no-ops.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
///
/// # Example
///
/// ```ignore
/// use llm_orchestrator::metrics::init_metrics;
///
/// init_metrics().expect("Failed to initialize metrics");
/// ```
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let requests_total = CounterVec::new(
        Opts::new(
            "llm_orchestrator_requests_total",
            "Orchestrator invocations by final result",
        ),
        &["stage", "result"],
    )?;

    let attempts_total = CounterVec::new(
        Opts::new("llm_orchestrator_attempts_total", "Attempts by outcome"),
        &["stage", "model", "outcome"],
    )?;

    let attempt_latency = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "llm_orchestrator_attempt_latency_seconds",
            "Attempt latency in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["model"],
    )?;

    let tokens_total = CounterVec::new(
        Opts::new("llm_orchestrator_tokens_total", "Billed tokens"),
        &["model", "type"],
    )?;

    let cost_usd_total = CounterVec::new(
        Opts::new("llm_orchestrator_cost_usd_total", "Billed cost in USD"),
        &["model"],
    )?;

    registry.register(Box::new(requests_total.clone()))?;
    registry.register(Box::new(attempts_total.clone()))?;
    registry.register(Box::new(attempt_latency.clone()))?;
    registry.register(Box::new(tokens_total.clone()))?;
    registry.register(Box::new(cost_usd_total.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = REQUESTS_TOTAL.set(requests_total);
    let _ = ATTEMPTS_TOTAL.set(attempts_total);
    let _ = ATTEMPT_LATENCY.set(attempt_latency);
    let _ = TOKENS_TOTAL.set(tokens_total);
    let _ = COST_USD_TOTAL.set(cost_usd_total);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, the returned
/// string is a Prometheus comment describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
