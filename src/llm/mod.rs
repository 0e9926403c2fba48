//! LLM provider integration.
//!
//! Three adapters share one [`LlmProvider`] capability:
//!
//! - `direct`: the vendor's own OpenAI-compatible chat endpoint
//! - `grounded`: generateContent with native web-search grounding
//! - `gateway`: a hosted OpenAI-compatible gateway for third-party models
//!
//! [`router::ProviderRouter`] picks the adapter from the model name and keeps
//! one client per provider kind in a [`router::ProviderRegistry`].
//!
//! # Cost Tracking
//!
//! ```ignore
//! use llm_orchestrator::llm::{PricingTable, TokenUsage, UsageTracker};
//!
//! let tracker = UsageTracker::new(PricingTable::default());
//! tracker.add_usage("outline", "deepseek-chat", &TokenUsage::new(1200, 400));
//! println!("${:.4}", tracker.summarize().total_cost_usd());
//! tracker.reset();
//! ```

pub mod batch;
pub mod cost;
pub mod pricing;
pub mod provider;
pub mod providers;
pub mod router;

pub use batch::{BatchCostAggregator, BatchSummary};
pub use cost::{CostSummary, UsageBreakdown, UsageTotals, UsageTracker};
pub use pricing::{CostBreakdown, PricingModel, PricingTable};
pub use provider::{
    GroundingSummary, LlmProvider, Message, NormalizedResponse, ProviderRequest, ResponseFormat,
    TokenUsage,
};
pub use providers::{DirectProvider, GatewayProvider, GroundedProvider};
pub use router::{
    default_registry, ProviderKind, ProviderRegistry, ProviderRouter, RoutePattern, RouteProvider,
    RouteTable,
};
