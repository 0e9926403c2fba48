//! Prometheus-based monitoring of orchestrator attempts, tokens and cost.
//!
//! # Example
//!
//! ```ignore
//! use llm_orchestrator::metrics::{init_metrics, export_metrics};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! // ... run requests ...
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{
    export_metrics, init_metrics, ATTEMPTS_TOTAL, ATTEMPT_LATENCY, COST_USD_TOTAL, REGISTRY,
    REQUESTS_TOTAL, TOKENS_TOTAL,
};
