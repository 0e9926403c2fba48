//! Model-name based provider routing.
//!
//! This module maps a model identifier to one of the adapter variants through
//! a static pattern table, and caches one adapter instance per provider kind:
//! - Direct vendor: `deepseek-*` and anything unmatched
//! - Search grounded: bare `gemini-*` names
//! - Gateway: any `vendor/model` name
//!
//! No retry logic lives here; the router issues exactly one call per `route`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use super::provider::{LlmProvider, NormalizedResponse, ProviderRequest};
use super::providers::{DirectProvider, GatewayProvider, GroundedProvider};
use crate::error::LlmError;
use crate::orchestrator::ModelSpec;

/// Adapter variant a model is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Vendor's own chat endpoint.
    Direct,
    /// Provider with native web-search grounding.
    SearchGrounded,
    /// OpenAI-compatible multi-vendor gateway.
    Gateway,
}

impl ProviderKind {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Direct => "direct",
            ProviderKind::SearchGrounded => "search_grounded",
            ProviderKind::Gateway => "gateway",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a rule matches a model name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePattern {
    /// Whole name equals the value.
    Exact(String),
    /// Name starts with the value.
    Prefix(String),
    /// Name contains the value anywhere.
    Contains(String),
}

impl RoutePattern {
    /// Returns true if `model` matches this pattern.
    pub fn matches(&self, model: &str) -> bool {
        match self {
            RoutePattern::Exact(value) => model == value,
            RoutePattern::Prefix(value) => model.starts_with(value.as_str()),
            RoutePattern::Contains(value) => model.contains(value.as_str()),
        }
    }
}

/// Ordered list of pattern rules; the first match wins.
#[derive(Debug, Clone)]
pub struct RouteTable {
    rules: Vec<(RoutePattern, ProviderKind)>,
    fallback: ProviderKind,
}

impl RouteTable {
    /// Create an empty table that resolves everything to `fallback`.
    pub fn new(fallback: ProviderKind) -> Self {
        Self {
            rules: Vec::new(),
            fallback,
        }
    }

    /// Append a rule.
    pub fn rule(mut self, pattern: RoutePattern, kind: ProviderKind) -> Self {
        self.rules.push((pattern, kind));
        self
    }

    /// Resolve the provider kind for a model name.
    pub fn resolve(&self, model: &str) -> ProviderKind {
        self.rules
            .iter()
            .find(|(pattern, _)| pattern.matches(model))
            .map(|(_, kind)| *kind)
            .unwrap_or(self.fallback)
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        // Namespaced names go through the gateway even when they embed
        // "gemini-" or "deepseek-" (e.g. "google/gemini-2.5-pro").
        RouteTable::new(ProviderKind::Direct)
            .rule(RoutePattern::Contains("/".into()), ProviderKind::Gateway)
            .rule(RoutePattern::Prefix("gemini-".into()), ProviderKind::SearchGrounded)
            .rule(RoutePattern::Prefix("deepseek-".into()), ProviderKind::Direct)
    }
}

/// Cache of adapter instances keyed by provider kind.
///
/// Adapters are created lazily from environment credentials on first use and
/// reused afterwards. Tests and embedding applications inject their own with
/// [`ProviderRegistry::with_provider`].
pub struct ProviderRegistry {
    providers: Mutex<HashMap<ProviderKind, Arc<dyn LlmProvider>>>,
    timeout_secs: u64,
}

impl ProviderRegistry {
    /// Create an empty registry whose adapters use `timeout_secs` HTTP timeouts.
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
            timeout_secs,
        }
    }

    /// Register a pre-built adapter for a kind.
    pub fn with_provider(self, kind: ProviderKind, provider: Arc<dyn LlmProvider>) -> Self {
        self.lock().insert(kind, provider);
        self
    }

    /// Register or replace an adapter.
    pub fn register(&self, kind: ProviderKind, provider: Arc<dyn LlmProvider>) {
        self.lock().insert(kind, provider);
    }

    /// Drop every cached adapter.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Kinds that currently have an adapter.
    pub fn cached_kinds(&self) -> Vec<ProviderKind> {
        self.lock().keys().copied().collect()
    }

    /// Get the adapter for `kind`, building it from the environment if needed.
    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn LlmProvider>, LlmError> {
        let mut providers = self.lock();
        if let Some(provider) = providers.get(&kind) {
            return Ok(Arc::clone(provider));
        }

        let provider = self.build_from_env(kind)?;
        tracing::debug!(kind = %kind, provider = provider.name(), "Initialized provider client");
        providers.insert(kind, Arc::clone(&provider));
        Ok(provider)
    }

    fn build_from_env(&self, kind: ProviderKind) -> Result<Arc<dyn LlmProvider>, LlmError> {
        let provider: Arc<dyn LlmProvider> = match kind {
            ProviderKind::Direct => {
                Arc::new(DirectProvider::from_env()?.with_timeout(self.timeout_secs)?)
            }
            ProviderKind::SearchGrounded => {
                Arc::new(GroundedProvider::from_env()?.with_timeout(self.timeout_secs)?)
            }
            ProviderKind::Gateway => {
                Arc::new(GatewayProvider::from_env()?.with_timeout(self.timeout_secs)?)
            }
        };
        Ok(provider)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ProviderKind, Arc<dyn LlmProvider>>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.providers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new(super::providers::chat::DEFAULT_TIMEOUT_SECS)
    }
}

static DEFAULT_REGISTRY: OnceLock<Arc<ProviderRegistry>> = OnceLock::new();

/// Process-wide convenience registry.
///
/// Library code never reaches for this implicitly; callers opt in by passing
/// it to [`ProviderRouter::new`].
pub fn default_registry() -> Arc<ProviderRegistry> {
    Arc::clone(DEFAULT_REGISTRY.get_or_init(|| Arc::new(ProviderRegistry::default())))
}

/// Anything that can send one request to the backend serving a model.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    /// Send `request` to the backend for `model` and normalize the answer.
    async fn route(
        &self,
        model: &ModelSpec,
        request: &ProviderRequest,
    ) -> Result<NormalizedResponse, LlmError>;

    /// Resolve the provider kind for a model name.
    fn resolve(&self, model: &str) -> ProviderKind {
        RouteTable::default().resolve(model)
    }
}

/// Router backed by a [`ProviderRegistry`] and a [`RouteTable`].
pub struct ProviderRouter {
    registry: Arc<ProviderRegistry>,
    table: RouteTable,
}

impl ProviderRouter {
    /// Create a router with the default route table.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use llm_orchestrator::llm::router::{ProviderRegistry, ProviderRouter};
    /// use std::sync::Arc;
    ///
    /// let router = ProviderRouter::new(Arc::new(ProviderRegistry::new(600)));
    /// assert_eq!(router.resolve("gemini-2.5-pro").as_str(), "search_grounded");
    /// ```
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            table: RouteTable::default(),
        }
    }

    /// Replace the route table.
    pub fn with_table(mut self, table: RouteTable) -> Self {
        self.table = table;
        self
    }

    /// Get the registry.
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }
}

#[async_trait]
impl RouteProvider for ProviderRouter {
    async fn route(
        &self,
        model: &ModelSpec,
        request: &ProviderRequest,
    ) -> Result<NormalizedResponse, LlmError> {
        let provider = self.registry.get(model.provider_kind)?;

        tracing::debug!(
            model = %model.name,
            kind = %model.provider_kind,
            provider = provider.name(),
            "Routing request"
        );

        provider.generate(&model.name, request).await
    }

    fn resolve(&self, model: &str) -> ProviderKind {
        self.table.resolve(model)
    }
}
