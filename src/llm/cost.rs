//! Session usage and cost tracking.
//!
//! A [`UsageTracker`] accumulates token counts and cost per stage and per
//! model for one session (one pipeline run). Nothing resets it implicitly;
//! callers running several independent sessions call [`UsageTracker::reset`]
//! between them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use super::pricing::{nanos_to_dollars, CostBreakdown, PricingTable};
use super::provider::TokenUsage;
use crate::error::ArtifactError;

/// File name written by [`UsageTracker::save_report`].
pub const USAGE_REPORT_FILE: &str = "token_usage_report.json";

/// Integer accumulator for one bucket (session, stage or model).
#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    requests: u64,
    prompt_tokens: u64,
    completion_tokens: u64,
    reasoning_tokens: u64,
    cache_hit_tokens: u64,
    cache_miss_tokens: u64,
    input_nanos: u64,
    output_nanos: u64,
}

impl Accumulator {
    fn add(&mut self, usage: &TokenUsage, cost: &CostBreakdown) {
        self.requests += 1;
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.reasoning_tokens += usage.reasoning_tokens.unwrap_or(0);
        self.cache_hit_tokens += usage.cache_hit_tokens.unwrap_or(0);
        self.cache_miss_tokens += usage.cache_miss_tokens.unwrap_or(0);
        self.input_nanos += cost.input_nanos;
        self.output_nanos += cost.output_nanos;
    }

    fn to_totals(self) -> UsageTotals {
        let total_tokens = self.prompt_tokens + self.completion_tokens;
        let total_nanos = self.input_nanos + self.output_nanos;
        let (avg_tokens, avg_cost) = if self.requests == 0 {
            (0.0, 0.0)
        } else {
            (
                total_tokens as f64 / self.requests as f64,
                nanos_to_dollars(total_nanos) / self.requests as f64,
            )
        };
        UsageTotals {
            requests: self.requests,
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            reasoning_tokens: self.reasoning_tokens,
            cache_hit_tokens: self.cache_hit_tokens,
            cache_miss_tokens: self.cache_miss_tokens,
            total_tokens,
            input_cost_usd: nanos_to_dollars(self.input_nanos),
            output_cost_usd: nanos_to_dollars(self.output_nanos),
            total_cost_usd: nanos_to_dollars(total_nanos),
            average_tokens_per_request: avg_tokens,
            average_cost_per_request: avg_cost,
        }
    }
}

/// Aggregated token and cost figures for one bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub requests: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub reasoning_tokens: u64,
    pub cache_hit_tokens: u64,
    pub cache_miss_tokens: u64,
    pub total_tokens: u64,
    pub input_cost_usd: f64,
    pub output_cost_usd: f64,
    pub total_cost_usd: f64,
    pub average_tokens_per_request: f64,
    pub average_cost_per_request: f64,
}

impl UsageTotals {
    /// Add another bucket's figures into this one, recomputing averages.
    pub fn merge(&mut self, other: &UsageTotals) {
        self.requests += other.requests;
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.reasoning_tokens += other.reasoning_tokens;
        self.cache_hit_tokens += other.cache_hit_tokens;
        self.cache_miss_tokens += other.cache_miss_tokens;
        self.total_tokens += other.total_tokens;
        self.input_cost_usd += other.input_cost_usd;
        self.output_cost_usd += other.output_cost_usd;
        self.total_cost_usd += other.total_cost_usd;
        if self.requests > 0 {
            self.average_tokens_per_request = self.total_tokens as f64 / self.requests as f64;
            self.average_cost_per_request = self.total_cost_usd / self.requests as f64;
        }
    }
}

/// Totals for one named stage or model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageBreakdown {
    pub name: String,
    #[serde(flatten)]
    pub totals: UsageTotals,
}

/// Snapshot of a session's usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub session_id: Uuid,
    pub session_start: DateTime<Utc>,
    pub session_end: DateTime<Utc>,
    pub currency: String,
    pub totals: UsageTotals,
    /// Sorted by stage name.
    pub by_stage: Vec<UsageBreakdown>,
    /// Sorted by cost, most expensive first.
    pub by_model: Vec<UsageBreakdown>,
}

impl CostSummary {
    /// Total session cost in dollars.
    pub fn total_cost_usd(&self) -> f64 {
        self.totals.total_cost_usd
    }
}

struct SessionState {
    id: Uuid,
    started_at: DateTime<Utc>,
    totals: Accumulator,
    by_stage: HashMap<String, Accumulator>,
    by_model: HashMap<String, Accumulator>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            totals: Accumulator::default(),
            by_stage: HashMap::new(),
            by_model: HashMap::new(),
        }
    }
}

/// Usage accumulator for one session.
pub struct UsageTracker {
    pricing: PricingTable,
    state: RwLock<SessionState>,
}

impl UsageTracker {
    /// Create a tracker using the given pricing table.
    ///
    /// # Example
    ///
    /// ```
    /// use llm_orchestrator::llm::cost::UsageTracker;
    /// use llm_orchestrator::llm::pricing::PricingTable;
    /// use llm_orchestrator::llm::provider::TokenUsage;
    ///
    /// let tracker = UsageTracker::new(PricingTable::default());
    /// tracker.add_usage("outline", "deepseek-chat", &TokenUsage::new(1000, 500));
    /// assert_eq!(tracker.summarize().totals.requests, 1);
    /// ```
    pub fn new(pricing: PricingTable) -> Self {
        Self {
            pricing,
            state: RwLock::new(SessionState::new()),
        }
    }

    /// Get the pricing table.
    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Record one request's usage and return its cost.
    ///
    /// # Arguments
    ///
    /// * `stage` - Stage the request belongs to
    /// * `model` - Model that served it
    /// * `usage` - Token counts as reported by the provider
    pub fn add_usage(&self, stage: &str, model: &str, usage: &TokenUsage) -> CostBreakdown {
        let cost = self.pricing.cost(model, usage);
        {
            let mut state = self.write();
            state.totals.add(usage, &cost);
            state
                .by_stage
                .entry(stage.to_string())
                .or_default()
                .add(usage, &cost);
            state
                .by_model
                .entry(model.to_string())
                .or_default()
                .add(usage, &cost);
        }

        tracing::debug!(
            stage = %stage,
            model = %model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            cost_usd = cost.total_usd(),
            "Recorded LLM usage"
        );
        cost
    }

    /// Number of recorded requests in this session.
    pub fn request_count(&self) -> u64 {
        self.read().totals.requests
    }

    /// Snapshot the session totals and breakdowns.
    pub fn summarize(&self) -> CostSummary {
        let state = self.read();

        let mut by_stage: Vec<UsageBreakdown> = state
            .by_stage
            .iter()
            .map(|(name, acc)| UsageBreakdown {
                name: name.clone(),
                totals: acc.to_totals(),
            })
            .collect();
        by_stage.sort_by(|a, b| a.name.cmp(&b.name));

        let mut by_model: Vec<UsageBreakdown> = state
            .by_model
            .iter()
            .map(|(name, acc)| UsageBreakdown {
                name: name.clone(),
                totals: acc.to_totals(),
            })
            .collect();
        by_model.sort_by(|a, b| {
            b.totals
                .total_cost_usd
                .total_cmp(&a.totals.total_cost_usd)
                .then_with(|| a.name.cmp(&b.name))
        });

        CostSummary {
            session_id: state.id,
            session_start: state.started_at,
            session_end: Utc::now(),
            currency: self.pricing.currency.clone(),
            totals: state.totals.to_totals(),
            by_stage,
            by_model,
        }
    }

    /// Clear all accumulated usage and start a new session.
    pub fn reset(&self) {
        *self.write() = SessionState::new();
        tracing::debug!("Usage tracker reset");
    }

    /// Write the summary as `token_usage_report.json` into `dir`.
    pub fn save_report(&self, dir: impl AsRef<Path>) -> Result<PathBuf, ArtifactError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|source| ArtifactError::DirectoryCreationFailed {
            path: dir.display().to_string(),
            source,
        })?;
        let path = dir.join(USAGE_REPORT_FILE);
        let json = serde_json::to_string_pretty(&self.summarize())?;
        std::fs::write(&path, json)?;
        tracing::info!(path = %path.display(), "Saved token usage report");
        Ok(path)
    }

    /// Log the summary through tracing.
    pub fn log_summary(&self) {
        let summary = self.summarize();
        let totals = &summary.totals;
        tracing::info!(
            requests = totals.requests,
            prompt_tokens = totals.prompt_tokens,
            completion_tokens = totals.completion_tokens,
            reasoning_tokens = totals.reasoning_tokens,
            total_cost_usd = format!("{:.4}", totals.total_cost_usd),
            "Session token usage"
        );
        for stage in &summary.by_stage {
            tracing::info!(
                stage = %stage.name,
                requests = stage.totals.requests,
                tokens = stage.totals.total_tokens,
                cost_usd = format!("{:.4}", stage.totals.total_cost_usd),
                "Stage usage"
            );
        }
        for model in &summary.by_model {
            tracing::info!(
                model = %model.name,
                requests = model.totals.requests,
                tokens = model.totals.total_tokens,
                cost_usd = format!("{:.4}", model.totals.total_cost_usd),
                "Model usage"
            );
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new(PricingTable::default())
    }
}
