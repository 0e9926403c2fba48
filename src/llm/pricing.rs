//! Per-model pricing functions.
//!
//! Prices are USD per one million tokens. Costs are computed in integer
//! nano-dollars so long sessions accumulate without floating-point drift.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::provider::TokenUsage;
use crate::error::PricingError;

/// Nano-dollars per dollar.
pub const NANOS_PER_DOLLAR: f64 = 1_000_000_000.0;

/// Prompt length above which long-context prices apply, when not configured.
pub const DEFAULT_PROMPT_LENGTH_THRESHOLD: u64 = 200_000;

/// Convert a token count at a per-million price to nano-dollars.
fn tokens_to_nanos(tokens: u64, price_per_1m: f64) -> u64 {
    // tokens / 1e6 * price * 1e9
    (tokens as f64 * price_per_1m * 1_000.0).round() as u64
}

/// Convert nano-dollars to dollars.
pub fn nanos_to_dollars(nanos: u64) -> f64 {
    nanos as f64 / NANOS_PER_DOLLAR
}

fn default_threshold() -> u64 {
    DEFAULT_PROMPT_LENGTH_THRESHOLD
}

/// Pricing function for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "pricing_model", rename_all = "snake_case")]
pub enum PricingModel {
    /// One input price and one output price.
    FlatRate { input_cost: f64, output_cost: f64 },
    /// Input priced differently on context-cache hit and miss.
    CacheTiered {
        input_cost_cache_hit: f64,
        input_cost_cache_miss: f64,
        output_cost: f64,
    },
    /// Both prices step up once the prompt exceeds a length threshold.
    LengthTiered {
        #[serde(default = "default_threshold")]
        prompt_length_threshold: u64,
        input_cost_short: f64,
        input_cost_long: f64,
        output_cost_short: f64,
        output_cost_long: f64,
    },
}

impl PricingModel {
    /// Compute the cost of one request.
    ///
    /// Output is billed on `completion_tokens`, which already includes
    /// reasoning tokens.
    pub fn cost(&self, usage: &TokenUsage) -> CostBreakdown {
        match self {
            PricingModel::FlatRate {
                input_cost,
                output_cost,
            } => CostBreakdown {
                input_nanos: tokens_to_nanos(usage.prompt_tokens, *input_cost),
                output_nanos: tokens_to_nanos(usage.completion_tokens, *output_cost),
            },
            PricingModel::CacheTiered {
                input_cost_cache_hit,
                input_cost_cache_miss,
                output_cost,
            } => {
                let hit = usage.cache_hit_tokens.unwrap_or(0);
                // Without a breakdown every prompt token is a miss.
                let miss = usage
                    .cache_miss_tokens
                    .unwrap_or_else(|| usage.prompt_tokens.saturating_sub(hit));
                CostBreakdown {
                    input_nanos: tokens_to_nanos(hit, *input_cost_cache_hit)
                        + tokens_to_nanos(miss, *input_cost_cache_miss),
                    output_nanos: tokens_to_nanos(usage.completion_tokens, *output_cost),
                }
            }
            PricingModel::LengthTiered {
                prompt_length_threshold,
                input_cost_short,
                input_cost_long,
                output_cost_short,
                output_cost_long,
            } => {
                let (input_price, output_price) = if usage.prompt_tokens > *prompt_length_threshold
                {
                    (*input_cost_long, *output_cost_long)
                } else {
                    (*input_cost_short, *output_cost_short)
                };
                CostBreakdown {
                    input_nanos: tokens_to_nanos(usage.prompt_tokens, input_price),
                    output_nanos: tokens_to_nanos(usage.completion_tokens, output_price),
                }
            }
        }
    }
}

/// Cost of one request, split into input and output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CostBreakdown {
    /// Input cost in nano-dollars.
    pub input_nanos: u64,
    /// Output cost in nano-dollars.
    pub output_nanos: u64,
}

impl CostBreakdown {
    /// Total cost in nano-dollars.
    pub fn total_nanos(&self) -> u64 {
        self.input_nanos + self.output_nanos
    }

    /// Input cost in dollars.
    pub fn input_usd(&self) -> f64 {
        nanos_to_dollars(self.input_nanos)
    }

    /// Output cost in dollars.
    pub fn output_usd(&self) -> f64 {
        nanos_to_dollars(self.output_nanos)
    }

    /// Total cost in dollars.
    pub fn total_usd(&self) -> f64 {
        nanos_to_dollars(self.total_nanos())
    }
}

/// Pricing table keyed by model identifier.
///
/// File format:
///
/// ```json
/// {
///   "pricing_version": "2025-06",
///   "currency": "USD",
///   "models": {
///     "deepseek-chat": {"pricing_model": "cache_tiered", "input_cost_cache_hit": 0.07,
///                        "input_cost_cache_miss": 0.27, "output_cost": 1.10}
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    #[serde(default)]
    pub pricing_version: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub models: BTreeMap<String, PricingModel>,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl PricingTable {
    /// Create an empty table.
    pub fn empty() -> Self {
        Self {
            pricing_version: String::new(),
            currency: default_currency(),
            models: BTreeMap::new(),
        }
    }

    /// Parse a table from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self, PricingError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a table from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PricingError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PricingError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let table = Self::from_json_str(&content)?;
        tracing::info!(
            path = %path.display(),
            version = %table.pricing_version,
            models = table.models.len(),
            "Loaded pricing table"
        );
        Ok(table)
    }

    /// Add or replace a model's pricing.
    pub fn with_model(mut self, model: impl Into<String>, pricing: PricingModel) -> Self {
        self.models.insert(model.into(), pricing);
        self
    }

    /// Pricing for `model`, if known.
    pub fn get(&self, model: &str) -> Option<&PricingModel> {
        self.models.get(model)
    }

    /// Cost of one request. Unknown models cost zero.
    pub fn cost(&self, model: &str, usage: &TokenUsage) -> CostBreakdown {
        match self.get(model) {
            Some(pricing) => pricing.cost(usage),
            None => {
                tracing::warn!(model = %model, "No pricing for model, cost recorded as zero");
                CostBreakdown::default()
            }
        }
    }
}

impl Default for PricingTable {
    /// Built-in list prices for the models routed by default.
    fn default() -> Self {
        Self {
            pricing_version: "builtin".to_string(),
            ..Self::empty()
        }
        .with_model(
            "deepseek-chat",
            PricingModel::CacheTiered {
                input_cost_cache_hit: 0.07,
                input_cost_cache_miss: 0.27,
                output_cost: 1.10,
            },
        )
        .with_model(
            "deepseek-reasoner",
            PricingModel::CacheTiered {
                input_cost_cache_hit: 0.14,
                input_cost_cache_miss: 0.55,
                output_cost: 2.19,
            },
        )
        .with_model(
            "gemini-2.5-pro",
            PricingModel::LengthTiered {
                prompt_length_threshold: DEFAULT_PROMPT_LENGTH_THRESHOLD,
                input_cost_short: 1.25,
                input_cost_long: 2.50,
                output_cost_short: 10.0,
                output_cost_long: 15.0,
            },
        )
        .with_model(
            "gemini-2.5-flash",
            PricingModel::FlatRate {
                input_cost: 0.30,
                output_cost: 2.50,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_rate() {
        let pricing = PricingModel::FlatRate {
            input_cost: 3.0,
            output_cost: 15.0,
        };
        let cost = pricing.cost(&TokenUsage::new(1_000_000, 100_000));
        assert!((cost.input_usd() - 3.0).abs() < 1e-9);
        assert!((cost.output_usd() - 1.5).abs() < 1e-9);
        assert!((cost.total_usd() - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_cache_tiered_with_breakdown() {
        let pricing = PricingModel::CacheTiered {
            input_cost_cache_hit: 0.1,
            input_cost_cache_miss: 1.0,
            output_cost: 2.0,
        };
        let usage = TokenUsage {
            prompt_tokens: 1_000_000,
            completion_tokens: 500_000,
            reasoning_tokens: Some(400_000),
            cache_hit_tokens: Some(600_000),
            cache_miss_tokens: Some(400_000),
        };
        let cost = pricing.cost(&usage);
        // 0.6 * 0.1 + 0.4 * 1.0
        assert!((cost.input_usd() - 0.46).abs() < 1e-9);
        // reasoning is inside completion_tokens, billed once
        assert!((cost.output_usd() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cache_tiered_without_breakdown_is_all_miss() {
        let pricing = PricingModel::CacheTiered {
            input_cost_cache_hit: 0.1,
            input_cost_cache_miss: 1.0,
            output_cost: 2.0,
        };
        let cost = pricing.cost(&TokenUsage::new(2_000_000, 0));
        assert!((cost.input_usd() - 2.0).abs() < 1e-9);
        assert_eq!(cost.output_nanos, 0);
    }

    #[test]
    fn test_length_tiered_threshold() {
        let pricing = PricingModel::LengthTiered {
            prompt_length_threshold: 200_000,
            input_cost_short: 1.0,
            input_cost_long: 2.0,
            output_cost_short: 10.0,
            output_cost_long: 20.0,
        };
        let short = pricing.cost(&TokenUsage::new(200_000, 1_000));
        assert!((short.input_usd() - 0.2).abs() < 1e-9);
        assert!((short.output_usd() - 0.01).abs() < 1e-9);

        let long = pricing.cost(&TokenUsage::new(200_001, 1_000));
        assert!((long.input_usd() - 0.400002).abs() < 1e-9);
        assert!((long.output_usd() - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_table_from_json() {
        let table = PricingTable::from_json_str(
            r#"{
                "pricing_version": "test",
                "models": {
                    "m-flat": {"pricing_model": "flat_rate", "input_cost": 1.0, "output_cost": 2.0},
                    "m-long": {"pricing_model": "length_tiered", "input_cost_short": 1.0,
                               "input_cost_long": 2.0, "output_cost_short": 3.0, "output_cost_long": 4.0}
                }
            }"#,
        )
        .expect("valid table");

        assert_eq!(table.currency, "USD");
        assert_eq!(table.models.len(), 2);
        match table.get("m-long") {
            Some(PricingModel::LengthTiered {
                prompt_length_threshold,
                ..
            }) => assert_eq!(*prompt_length_threshold, DEFAULT_PROMPT_LENGTH_THRESHOLD),
            other => panic!("unexpected pricing: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_model_costs_zero() {
        let table = PricingTable::empty();
        let cost = table.cost("mystery", &TokenUsage::new(1000, 1000));
        assert_eq!(cost, CostBreakdown::default());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = PricingTable::from_json_file(dir.path().join("nope.json"))
            .expect_err("file does not exist");
        assert!(matches!(err, PricingError::NotFound(_)));
    }

    #[test]
    fn test_builtin_table_prices_default_models() {
        let table = PricingTable::default();
        assert!(table.get("deepseek-chat").is_some());
        assert!(table.get("gemini-2.5-pro").is_some());
    }
}
