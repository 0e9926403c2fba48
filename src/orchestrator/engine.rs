//! Retry and fallback loop.
//!
//! Each attempt runs route → validate → custom check → post-process and
//! resolves to one of three steps: accepted, retryable, or fatal. Attempts are
//! strictly sequential; the record of attempt `n` is persisted and its usage
//! recorded before attempt `n + 1` starts.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::request::{
    AttemptOutcome, AttemptRecord, ModelPlan, ModelSpec, RequestSpec, StageResult, StageValue,
    UsagePolicy,
};
use crate::config::OrchestratorConfig;
use crate::error::{LlmError, OrchestratorError};
use crate::llm::cost::UsageTracker;
use crate::llm::provider::{NormalizedResponse, ProviderRequest};
use crate::llm::router::RouteProvider;
use crate::metrics::MetricsCollector;
use crate::storage::{ArtifactWriter, AttemptArtifact, NullArtifactWriter};
use crate::validation::ResponseValidator;

/// Attempt budget, backoff schedule and per-attempt timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per model.
    pub max_attempts: u32,
    /// Delay after failed attempt `n` is `backoff[n - 1]`; the last entry repeats.
    pub backoff: Vec<Duration>,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default())
    }
}

impl RetryPolicy {
    /// Policy described by a configuration.
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            max_attempts: config.retry.max_attempts,
            backoff: config
                .retry
                .delays_secs
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
        }
    }

    /// No delays between attempts.
    pub fn without_backoff(mut self) -> Self {
        self.backoff.clear();
        self
    }

    /// Delay after the failed 1-based `attempt` on a model.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let idx = attempt.saturating_sub(1) as usize;
        self.backoff
            .get(idx)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Result of one attempt.
enum AttemptStep {
    Success(StageValue),
    Retryable {
        outcome: AttemptOutcome,
        reason: String,
    },
    Fatal(LlmError),
}

/// Drives requests through the retry → fallback state machine.
pub struct RequestOrchestrator {
    router: Arc<dyn RouteProvider>,
    validator: ResponseValidator,
    artifacts: Arc<dyn ArtifactWriter>,
    usage: Arc<UsageTracker>,
    config: OrchestratorConfig,
    retry: RetryPolicy,
    usage_policy: UsagePolicy,
    metrics: MetricsCollector,
}

impl RequestOrchestrator {
    /// Create an orchestrator from a router and configuration.
    ///
    /// Artifacts are discarded and usage goes to a fresh tracker with the
    /// builtin pricing until replaced with the `with_*` methods.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use llm_orchestrator::config::{OrchestratorConfig, StageModels};
    /// use llm_orchestrator::llm::router::{default_registry, ProviderRouter};
    /// use llm_orchestrator::orchestrator::RequestOrchestrator;
    /// use std::sync::Arc;
    ///
    /// let config = OrchestratorConfig::new()
    ///     .with_stage("outline", StageModels::new("deepseek-chat").with_fallback("gemini-2.5-flash"));
    /// let router = Arc::new(ProviderRouter::new(default_registry()));
    /// let orchestrator = RequestOrchestrator::new(router, config);
    /// ```
    pub fn new(router: Arc<dyn RouteProvider>, config: OrchestratorConfig) -> Self {
        Self {
            router,
            validator: ResponseValidator::with_thresholds(config.validation.clone()),
            artifacts: Arc::new(NullArtifactWriter),
            usage: Arc::new(UsageTracker::default()),
            retry: RetryPolicy::from_config(&config),
            usage_policy: config.usage_policy,
            metrics: MetricsCollector::new(),
            config,
        }
    }

    pub fn with_artifact_writer(mut self, writer: Arc<dyn ArtifactWriter>) -> Self {
        self.artifacts = writer;
        self
    }

    /// Share a usage tracker with other orchestrators of the same session.
    pub fn with_usage_tracker(mut self, usage: Arc<UsageTracker>) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_usage_policy(mut self, policy: UsagePolicy) -> Self {
        self.usage_policy = policy;
        self
    }

    pub fn with_validator(mut self, validator: ResponseValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Model sequence for a request: the explicit plan, else the stage
    /// configuration.
    pub fn resolve_models(&self, spec: &RequestSpec) -> Result<Vec<ModelSpec>, OrchestratorError> {
        let plan: ModelPlan = match &spec.models {
            Some(plan) => plan.clone(),
            None => self
                .config
                .models_for(&spec.stage_name)
                .ok_or_else(|| OrchestratorError::NoModelConfigured(spec.stage_name.clone()))?,
        };
        if plan.primary.trim().is_empty() {
            return Err(OrchestratorError::NoModelConfigured(
                spec.stage_name.clone(),
            ));
        }

        Ok(plan
            .sequence()
            .into_iter()
            .map(|name| {
                ModelSpec::new(
                    name,
                    self.router.resolve(name),
                    self.retry.max_attempts,
                    self.retry.attempt_timeout,
                )
            })
            .collect())
    }

    fn provider_request(&self, spec: &RequestSpec) -> ProviderRequest {
        let mut request = ProviderRequest::new(spec.messages.clone())
            .with_temperature(spec.temperature.unwrap_or(self.config.temperature));
        if let Some(max_tokens) = spec.max_tokens.or(self.config.max_tokens) {
            request = request.with_max_tokens(max_tokens);
        }
        if let Some(format) = spec.response_format {
            request = request.with_response_format(format);
        }
        if spec.enable_web_search {
            request = request.with_web_search();
        }
        request
    }

    /// Run a request until one attempt is accepted.
    ///
    /// Models are tried in order (primary, then fallback), each up to its
    /// attempt budget. Only a fatal provider error or exhaustion of every
    /// model reaches the caller.
    ///
    /// # Errors
    ///
    /// * `OrchestratorError::NoModelConfigured` - no plan on the request or stage
    /// * `OrchestratorError::Fatal` - credentials or configuration rejected
    /// * `OrchestratorError::Exhausted` - every attempt on every model failed
    pub async fn execute(&self, spec: &RequestSpec) -> Result<StageResult, OrchestratorError> {
        let models = self.resolve_models(spec)?;
        let request = self.provider_request(spec);
        let validator = match spec.min_length {
            Some(min_length) => self.validator.clone().with_min_length(min_length),
            None => self.validator.clone(),
        };

        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut attempt_index: u32 = 0;

        for model in &models {
            for attempt in 1..=model.max_attempts {
                attempt_index += 1;
                let timestamp = Utc::now();
                let started = Instant::now();

                tracing::info!(
                    stage = %spec.stage_name,
                    model = %model.name,
                    provider = %model.provider_kind,
                    attempt = attempt,
                    max_attempts = model.max_attempts,
                    "Sending LLM request"
                );

                let (step, response) = self.run_attempt(spec, model, &request, &validator).await;
                let elapsed = started.elapsed();
                let duration_ms = saturating_millis(elapsed);

                let (outcome, reason) = match &step {
                    AttemptStep::Success(_) => (AttemptOutcome::Success, "ok".to_string()),
                    AttemptStep::Retryable { outcome, reason } => (*outcome, reason.clone()),
                    AttemptStep::Fatal(e) => (AttemptOutcome::ProviderError, e.to_string()),
                };
                let record = AttemptRecord {
                    stage: spec.stage_name.clone(),
                    model: model.name.clone(),
                    attempt_index,
                    timestamp,
                    outcome,
                    reason,
                    raw_text: response
                        .as_ref()
                        .map(|r| r.text.clone())
                        .unwrap_or_default(),
                    duration_ms,
                };

                self.persist(&record, &request, response.as_ref()).await;
                self.metrics.record_attempt(
                    &spec.stage_name,
                    &model.name,
                    outcome.as_str(),
                    elapsed.as_secs_f64(),
                );

                let usage = response.as_ref().and_then(|r| r.usage);
                let billable = outcome.is_success() || self.usage_policy == UsagePolicy::AllResponses;
                if let (true, Some(usage)) = (billable, usage.as_ref()) {
                    let cost = self.usage.add_usage(&spec.stage_name, &model.name, usage);
                    self.metrics
                        .record_usage(&model.name, usage, cost.total_usd());
                }

                attempts.push(record);

                match step {
                    AttemptStep::Success(value) => {
                        tracing::info!(
                            stage = %spec.stage_name,
                            model = %model.name,
                            attempt = attempt,
                            duration_ms = duration_ms,
                            "LLM request accepted"
                        );
                        self.metrics.record_request(&spec.stage_name, "success");
                        return Ok(StageResult {
                            value,
                            model_used: model.name.clone(),
                            attempts,
                            usage,
                        });
                    }
                    AttemptStep::Fatal(source) => {
                        tracing::error!(
                            stage = %spec.stage_name,
                            model = %model.name,
                            error = %source,
                            "Fatal provider error, aborting request"
                        );
                        self.metrics.record_request(&spec.stage_name, "fatal");
                        return Err(OrchestratorError::Fatal {
                            stage: spec.stage_name.clone(),
                            model: model.name.clone(),
                            source,
                        });
                    }
                    AttemptStep::Retryable { outcome, reason } => {
                        tracing::warn!(
                            stage = %spec.stage_name,
                            model = %model.name,
                            attempt = attempt,
                            outcome = %outcome,
                            reason = %reason,
                            "LLM attempt failed"
                        );
                        if attempt < model.max_attempts {
                            let delay = self.retry.delay_after(attempt);
                            if !delay.is_zero() {
                                tracing::debug!(delay_secs = delay.as_secs_f64(), "Backing off");
                                tokio::time::sleep(delay).await;
                            }
                        }
                    }
                }
            }

            tracing::warn!(
                stage = %spec.stage_name,
                model = %model.name,
                "Model exhausted its attempts"
            );
        }

        let model_names: Vec<String> = models.iter().map(|m| m.name.clone()).collect();
        tracing::error!(
            stage = %spec.stage_name,
            models = ?model_names,
            attempts = attempts.len(),
            "All models failed"
        );
        self.metrics.record_request(&spec.stage_name, "exhausted");
        Err(OrchestratorError::Exhausted {
            stage: spec.stage_name.clone(),
            models: model_names,
            attempts,
        })
    }

    async fn run_attempt(
        &self,
        spec: &RequestSpec,
        model: &ModelSpec,
        request: &ProviderRequest,
        validator: &ResponseValidator,
    ) -> (AttemptStep, Option<NormalizedResponse>) {
        let call =
            tokio::time::timeout(model.per_attempt_timeout, self.router.route(model, request)).await;

        let response = match call {
            Err(_) => {
                let err = LlmError::Timeout {
                    seconds: model.per_attempt_timeout.as_secs(),
                };
                return (
                    AttemptStep::Retryable {
                        outcome: AttemptOutcome::ProviderError,
                        reason: err.to_string(),
                    },
                    None,
                );
            }
            Ok(Err(e)) if !e.is_transient() => return (AttemptStep::Fatal(e), None),
            Ok(Err(e)) => {
                return (
                    AttemptStep::Retryable {
                        outcome: AttemptOutcome::ProviderError,
                        reason: e.to_string(),
                    },
                    None,
                )
            }
            Ok(Ok(response)) => response,
        };

        let step = self.judge(spec, model, &response, validator);
        (step, Some(response))
    }

    fn judge(
        &self,
        spec: &RequestSpec,
        model: &ModelSpec,
        response: &NormalizedResponse,
        validator: &ResponseValidator,
    ) -> AttemptStep {
        if response.text.trim().is_empty() {
            return AttemptStep::Retryable {
                outcome: AttemptOutcome::ValidationFailed,
                reason: "empty_response".to_string(),
            };
        }

        let verdict = validator.validate(
            &response.text,
            spec.validation_level,
            response.finish_reason.as_deref(),
            spec.target_language.as_deref(),
        );
        if !verdict.accepted {
            return AttemptStep::Retryable {
                outcome: AttemptOutcome::ValidationFailed,
                reason: verdict.reason,
            };
        }

        if let Some(custom) = &spec.custom_validator {
            let verdict = custom.check(&response.text);
            if !verdict.accepted {
                return AttemptStep::Retryable {
                    outcome: AttemptOutcome::ValidationFailed,
                    reason: verdict.reason,
                };
            }
        }

        match &spec.post_processor {
            Some(processor) => match processor.process(&response.text, &model.name) {
                Ok(value) => AttemptStep::Success(StageValue::Json(value)),
                Err(e) => AttemptStep::Retryable {
                    outcome: AttemptOutcome::PostProcessFailed,
                    reason: format!("post_process_failed ({})", e),
                },
            },
            None => AttemptStep::Success(StageValue::Text(response.text.clone())),
        }
    }

    async fn persist(
        &self,
        record: &AttemptRecord,
        request: &ProviderRequest,
        response: Option<&NormalizedResponse>,
    ) {
        let artifact = AttemptArtifact {
            record,
            request,
            response,
        };
        if let Err(e) = self.artifacts.write_attempt(&artifact).await {
            tracing::warn!(
                stage = %record.stage,
                attempt = record.attempt_index,
                error = %e,
                "Failed to save LLM interaction"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageModels;
    use crate::llm::provider::{Message, TokenUsage};
    use crate::llm::router::ProviderKind;
    use crate::validation::{Verdict, ValidationLevel};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    type Reply = Result<NormalizedResponse, LlmError>;

    /// Router replaying scripted replies and recording the models called.
    struct ScriptedRouter {
        replies: Mutex<VecDeque<Reply>>,
        calls: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl ScriptedRouter {
        fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl RouteProvider for ScriptedRouter {
        async fn route(&self, model: &ModelSpec, _request: &ProviderRequest) -> Reply {
            self.calls.lock().expect("lock").push(model.name.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.replies
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or(Err(LlmError::EmptyResponse))
        }
    }

    fn ok(text: &str) -> Reply {
        Ok(NormalizedResponse::new(text, "stop").with_usage(TokenUsage::new(100, 50)))
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig::new().with_stage(
            "outline",
            StageModels::new("deepseek-chat").with_fallback("gemini-2.5-flash"),
        )
    }

    fn spec() -> RequestSpec {
        RequestSpec::new("outline", vec![Message::user("topic")])
            .with_validation(ValidationLevel::Minimal)
            .with_min_length(5)
    }

    fn orchestrator(router: Arc<ScriptedRouter>) -> RequestOrchestrator {
        RequestOrchestrator::new(router, config())
            .with_retry_policy(RetryPolicy::default().without_backoff())
    }

    #[test]
    fn test_delay_after() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(5));
        assert_eq!(policy.delay_after(3), Duration::from_secs(10));
        assert_eq!(policy.delay_after(7), Duration::from_secs(10));
        assert_eq!(policy.without_backoff().delay_after(1), Duration::ZERO);
    }

    #[test]
    fn test_saturating_millis() {
        assert_eq!(saturating_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(saturating_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_resolve_models() {
        let router = Arc::new(ScriptedRouter::new(Vec::new()));
        let orch = orchestrator(router);

        let models = orch.resolve_models(&spec()).expect("configured");
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].provider_kind, ProviderKind::Direct);
        assert_eq!(models[1].provider_kind, ProviderKind::SearchGrounded);
        assert_eq!(models[0].max_attempts, 3);

        let same = spec().with_models(ModelPlan::new("x/y").with_fallback("x/y"));
        let models = orch.resolve_models(&same).expect("explicit");
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].provider_kind, ProviderKind::Gateway);

        let missing = RequestSpec::new("unknown", Vec::new());
        assert!(matches!(
            orch.resolve_models(&missing),
            Err(OrchestratorError::NoModelConfigured(_))
        ));
    }

    #[tokio::test]
    async fn test_transient_errors_then_success() {
        let router = Arc::new(ScriptedRouter::new(vec![
            Err(LlmError::RateLimited("slow down".into())),
            Err(LlmError::ApiError {
                code: 503,
                message: "unavailable".into(),
            }),
            ok("a fine answer"),
        ]));
        let orch = orchestrator(router.clone());

        let result = orch.execute(&spec()).await.expect("accepted");
        assert_eq!(result.model_used, "deepseek-chat");
        assert_eq!(result.value.as_text(), Some("a fine answer"));
        assert_eq!(result.attempts.len(), 3);
        assert_eq!(result.attempts[0].outcome, AttemptOutcome::ProviderError);
        assert!(result.attempts[0].raw_text.is_empty());
        assert_eq!(router.calls().len(), 3);
        assert_eq!(orch.usage().request_count(), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let router = Arc::new(
            ScriptedRouter::new(vec![ok("late answer"), ok("late answer")])
                .with_delay(Duration::from_millis(200)),
        );
        let policy = RetryPolicy {
            max_attempts: 1,
            backoff: Vec::new(),
            attempt_timeout: Duration::from_millis(20),
        };
        let orch = RequestOrchestrator::new(router.clone(), config()).with_retry_policy(policy);

        let err = orch.execute(&spec()).await.expect_err("both time out");
        let attempts = err.attempts();
        assert_eq!(attempts.len(), 2);
        assert!(attempts.iter().all(|a| a.reason.contains("timed out")));
        assert_eq!(router.calls(), vec!["deepseek-chat", "gemini-2.5-flash"]);
        assert_eq!(orch.usage().request_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_text_is_rejected_at_any_level() {
        let router = Arc::new(ScriptedRouter::new(vec![ok("   "), ok("content")]));
        let orch = orchestrator(router);
        let spec = spec().with_validation(ValidationLevel::None);

        let result = orch.execute(&spec).await.expect("second attempt");
        assert_eq!(result.attempts[0].reason, "empty_response");
        assert_eq!(result.attempts[0].outcome, AttemptOutcome::ValidationFailed);
        assert_eq!(result.attempts[1].attempt_index, 2);
    }

    #[tokio::test]
    async fn test_custom_validator_rejection() {
        let router = Arc::new(ScriptedRouter::new(vec![ok("short answer"), ok("a longer answer")]));
        let orch = orchestrator(router);
        let spec = spec().with_custom_validator(|text: &str| {
            if text.len() > 12 {
                Verdict::accept()
            } else {
                Verdict::reject("too_terse")
            }
        });

        let result = orch.execute(&spec).await.expect("accepted");
        assert_eq!(result.attempts[0].reason, "too_terse");
        assert_eq!(result.value.as_text(), Some("a longer answer"));
    }

    #[tokio::test]
    async fn test_usage_policy_all_responses() {
        let router = Arc::new(ScriptedRouter::new(vec![ok("tiny"), ok("long enough")]));
        let orch = orchestrator(router).with_usage_policy(UsagePolicy::AllResponses);

        orch.execute(&spec()).await.expect("accepted");
        assert_eq!(orch.usage().request_count(), 2);
        let summary = orch.usage().summarize();
        assert_eq!(summary.totals.prompt_tokens, 200);
    }

    #[tokio::test]
    async fn test_request_options_reach_router() {
        struct Capture(Mutex<Option<ProviderRequest>>);

        #[async_trait]
        impl RouteProvider for Capture {
            async fn route(&self, _model: &ModelSpec, request: &ProviderRequest) -> Reply {
                *self.0.lock().expect("lock") = Some(request.clone());
                ok("captured answer")
            }
        }

        let capture = Arc::new(Capture(Mutex::new(None)));
        let orch = RequestOrchestrator::new(capture.clone(), config());
        let spec = spec().with_max_tokens(512).with_web_search();
        orch.execute(&spec).await.expect("accepted");

        let request = capture.0.lock().expect("lock").clone().expect("captured");
        assert_eq!(request.max_tokens, Some(512));
        assert_eq!(request.temperature, Some(0.3));
        assert!(request.enable_web_search);
    }
}
