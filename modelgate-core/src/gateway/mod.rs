//! Gateway orchestrator.
//!
//! [`Gateway::process`] runs one request through tokenization, routing,
//! invocation, validation and gating, then writes exactly one audit entry
//! and returns a [`GatewayResponse`]. Every exit, including errors and
//! cancellation, goes through the audit step (see [`state`]).
//!
//! The backend call is the only suspension point that waits on the outside
//! world. It runs under a timeout and races the caller's cancellation token.
//! A transient failure or timeout earns one retry, routed to the fallback
//! model when the policy has one.

mod outcome;
pub mod state;

pub use outcome::{GatewayOutcome, GatewayResponse};
pub use state::{MAX_RETRIES, PipelineState, StateTrace};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditOutcome, AuditSink, AuditValidation, MemoryAuditLog};
use crate::backend::{BackendError, GenerationBackend, GenerationRequest, GenerationResult, Usage};
use crate::error::GatewayError;
use crate::gate::{ConfidenceDecision, ConfidenceGate};
use crate::metrics::GatewayMetrics;
use crate::pii::{DetectorSet, TokenizedText, Tokenizer};
use crate::policy::{UseCaseCatalog, UseCasePolicy};
use crate::router::{ModelRouter, RoutingDecision, RoutingSignal};
use crate::validator::{ValidationOutcome, validate};
use crate::vault::{MemoryVault, TokenVault};

// ============================================================================
// Options
// ============================================================================

/// Per-call overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessOptions {
    /// Backend timeout; the catalog default when `None`.
    pub timeout: Option<Duration>,
    /// Route the first attempt to the fallback model.
    pub force_fallback: bool,
}

// ============================================================================
// Per-request state
// ============================================================================

/// What the audit entry and response need, gathered as the pipeline runs.
struct RequestContext {
    request_id: Uuid,
    use_case: String,
    started: Instant,
    trace: StateTrace,
    tokenized: Option<TokenizedText>,
    routing: Option<RoutingDecision>,
    attempts: u8,
    usage: Usage,
    cost: f64,
    validation: AuditValidation,
    confidence: Option<f64>,
}

impl RequestContext {
    fn new(request_id: Uuid, use_case: &str) -> Self {
        Self {
            request_id,
            use_case: use_case.to_string(),
            started: Instant::now(),
            trace: StateTrace::new(),
            tokenized: None,
            routing: None,
            attempts: 0,
            usage: Usage::default(),
            cost: 0.0,
            validation: AuditValidation::NotReached,
            confidence: None,
        }
    }
}

/// Why a single backend attempt produced no result.
enum AttemptError {
    Backend(BackendError),
    TimedOut(Duration),
    Cancelled,
}

impl AttemptError {
    fn status(&self) -> &'static str {
        match self {
            Self::Backend(BackendError::Transient { .. }) => "transient",
            Self::Backend(BackendError::Terminal { .. }) => "terminal",
            Self::TimedOut(_) => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

// ============================================================================
// Gateway
// ============================================================================

/// The request pipeline, shared across concurrent callers.
///
/// Tokenization and validation run on the caller's task with no global lock;
/// only vault and audit-sink mutations synchronize.
pub struct Gateway {
    catalog: Arc<UseCaseCatalog>,
    backend: Arc<dyn GenerationBackend>,
    tokenizer: Tokenizer,
    router: ModelRouter,
    audit: Arc<dyn AuditSink>,
    metrics: Option<Arc<GatewayMetrics>>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("use_cases", &self.catalog.names().collect::<Vec<_>>())
            .field("backend", &self.backend.name())
            .field("tokenizer", &self.tokenizer)
            .field("audit_entries", &self.audit.len())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Gateway with an in-memory vault (TTL from the catalog defaults), the
    /// built-in detectors and an in-memory audit log.
    #[must_use]
    pub fn new(catalog: UseCaseCatalog, backend: Arc<dyn GenerationBackend>) -> Self {
        let vault: Arc<dyn TokenVault> = Arc::new(MemoryVault::new(catalog.defaults.token_ttl));
        let router = ModelRouter::new(Arc::clone(&catalog.models));
        Self {
            catalog: Arc::new(catalog),
            backend,
            tokenizer: Tokenizer::new(DetectorSet::builtin(), vault),
            router,
            audit: Arc::new(MemoryAuditLog::new()),
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_vault(mut self, vault: Arc<dyn TokenVault>) -> Self {
        self.tokenizer = Tokenizer::new(self.tokenizer.detectors().clone(), vault);
        self
    }

    #[must_use]
    pub fn with_detectors(mut self, detectors: DetectorSet) -> Self {
        self.tokenizer = Tokenizer::new(detectors, Arc::clone(self.tokenizer.vault()));
        self
    }

    #[must_use]
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.router = self.router.with_metrics(Arc::clone(&metrics));
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn catalog(&self) -> &UseCaseCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    #[must_use]
    pub fn vault(&self) -> &Arc<dyn TokenVault> {
        self.tokenizer.vault()
    }

    #[must_use]
    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Process one request with catalog defaults.
    pub async fn process(&self, use_case: &str, input: &str) -> GatewayResponse {
        self.process_with(use_case, input, ProcessOptions::default(), &CancellationToken::new())
            .await
    }

    /// Process one request, abandoning the backend call if `cancel` fires.
    pub async fn process_with_cancel(
        &self,
        use_case: &str,
        input: &str,
        cancel: CancellationToken,
    ) -> GatewayResponse {
        self.process_with(use_case, input, ProcessOptions::default(), &cancel)
            .await
    }

    /// Process one request with per-call options.
    pub async fn process_with(
        &self,
        use_case: &str,
        input: &str,
        opts: ProcessOptions,
        cancel: &CancellationToken,
    ) -> GatewayResponse {
        self.process_request(Uuid::new_v4(), use_case, input, opts, cancel)
            .await
    }

    #[tracing::instrument(
        name = "gateway.process",
        skip_all,
        fields(request_id = %request_id, use_case = %use_case)
    )]
    async fn process_request(
        &self,
        request_id: Uuid,
        use_case: &str,
        input: &str,
        opts: ProcessOptions,
        cancel: &CancellationToken,
    ) -> GatewayResponse {
        let mut ctx = RequestContext::new(request_id, use_case);
        let result = self.run(&mut ctx, input, opts, cancel).await;
        self.finish(ctx, result).await
    }

    /// Detokenize a (validated) value for a trusted downstream consumer.
    ///
    /// # Errors
    ///
    /// `VaultMiss` on the first token the vault cannot resolve.
    pub async fn reveal(&self, value: &serde_json::Value) -> Result<serde_json::Value, GatewayError> {
        Ok(self.tokenizer.detokenize_value(value).await?)
    }

    /// Detokenize text.
    ///
    /// # Errors
    ///
    /// `VaultMiss` on the first token the vault cannot resolve.
    pub async fn reveal_text(&self, text: &str) -> Result<String, GatewayError> {
        Ok(self.tokenizer.detokenize(text).await?)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Pipeline
    // ────────────────────────────────────────────────────────────────────────

    async fn run(
        &self,
        ctx: &mut RequestContext,
        input: &str,
        opts: ProcessOptions,
        cancel: &CancellationToken,
    ) -> Result<ConfidenceDecision, GatewayError> {
        let Some(policy) = self.catalog.get(&ctx.use_case).cloned() else {
            // Still tokenize, so the failure entry holds no original values.
            match self.tokenizer.tokenize_all(input).await {
                Ok(tokenized) => {
                    ctx.tokenized = Some(tokenized);
                    ctx.trace.advance(PipelineState::Tokenized)?;
                }
                Err(err) => warn!(error = %err, "Could not tokenize input for unknown use case"),
            }
            return Err(GatewayError::UnknownUseCase {
                use_case: ctx.use_case.clone(),
            });
        };

        let tokenized = self.tokenizer.tokenize(input, &policy.pii_categories).await?;
        if let Some(metrics) = &self.metrics {
            for token_use in &tokenized.tokens {
                metrics.record_pii_token(token_use.category.as_str());
            }
        }
        let input_words = tokenized.text.split_whitespace().count();
        let user_input = tokenized.text.clone();
        ctx.tokenized = Some(tokenized);
        ctx.trace.advance(PipelineState::Tokenized)?;

        let timeout = opts
            .timeout
            .unwrap_or(self.catalog.defaults.invocation_timeout);
        let mut signal = if opts.force_fallback {
            RoutingSignal::forced_fallback(input_words)
        } else {
            RoutingSignal::primary(input_words)
        };

        let result = loop {
            let decision = self.router.select(&policy, signal)?;
            ctx.trace.advance(PipelineState::Routed)?;
            debug!(
                model = %decision.model,
                reason = decision.reason.tag(),
                stripped = ?decision.stripped,
                "Routed"
            );

            let request = GenerationRequest {
                request_id: ctx.request_id,
                use_case: policy.name.clone(),
                model: decision.model.clone(),
                system_prompt: policy.system_prompt.clone(),
                user_input: user_input.clone(),
                params: decision.params.clone(),
            };
            let model = decision.model.clone();
            ctx.routing = Some(decision);
            ctx.trace.advance(PipelineState::Invoked)?;
            ctx.attempts += 1;

            match self.invoke(&request, timeout, cancel).await {
                Ok(result) => break result,
                Err(AttemptError::Cancelled) => return Err(GatewayError::Cancelled),
                Err(AttemptError::Backend(BackendError::Terminal { reason })) => {
                    return Err(GatewayError::BackendTerminal { model, reason });
                }
                Err(AttemptError::Backend(BackendError::Transient { reason })) => {
                    if ctx.trace.retries() >= MAX_RETRIES {
                        return Err(GatewayError::BackendTransient { model, reason });
                    }
                    warn!(model = %model, attempt = ctx.attempts, "Transient backend failure, retrying");
                }
                Err(AttemptError::TimedOut(after)) => {
                    let reason = format!("no response within {}", humantime::format_duration(after));
                    if ctx.trace.retries() >= MAX_RETRIES {
                        return Err(GatewayError::BackendTransient { model, reason });
                    }
                    warn!(model = %model, attempt = ctx.attempts, "Backend timed out, retrying");
                }
            }
            signal = RoutingSignal::retry(input_words);
        };

        ctx.usage = result.usage;
        if let Some(routing) = &ctx.routing {
            ctx.cost = self.catalog.models.cost(&routing.model, &result.usage);
        }

        let value = match validate(&result.output, &policy.output_schema) {
            ValidationOutcome::Valid(value) => {
                ctx.validation = AuditValidation::Valid;
                ctx.trace.advance(PipelineState::Validated)?;
                value
            }
            ValidationOutcome::Invalid(violations) => {
                ctx.validation = AuditValidation::Invalid {
                    violations: violations.clone(),
                };
                ctx.trace.advance(PipelineState::Validated)?;
                info!(violations = violations.len(), "Output failed schema validation");
                return Err(GatewayError::SchemaViolation { violations });
            }
        };

        self.gate(ctx, &policy, value)
    }

    fn gate(
        &self,
        ctx: &mut RequestContext,
        policy: &UseCasePolicy,
        value: serde_json::Value,
    ) -> Result<ConfidenceDecision, GatewayError> {
        let gate = ConfidenceGate::for_policy(policy);
        ctx.confidence = gate.confidence(&value);
        let decision = gate.decide(value, policy.confidence_threshold);
        ctx.trace.advance(PipelineState::Gated)?;
        Ok(decision)
    }

    /// One backend attempt under `timeout`, racing cancellation.
    #[tracing::instrument(
        name = "gateway.invoke",
        skip_all,
        fields(model = %request.model, backend = self.backend.name())
    )]
    async fn invoke(
        &self,
        request: &GenerationRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, AttemptError> {
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(AttemptError::Cancelled),
            result = tokio::time::timeout(timeout, self.backend.generate(request)) => match result {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(err)) => Err(AttemptError::Backend(err)),
                Err(_) => Err(AttemptError::TimedOut(timeout)),
            },
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let status = match &result {
            Ok(_) => "ok",
            Err(err) => err.status(),
        };
        if let Err(AttemptError::Backend(err)) = &result {
            // Backend text stays in logs.
            warn!(status, reason = err.reason(), "Backend call failed");
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_backend_call(&request.model, status, elapsed_ms);
        }
        result
    }

    /// Write the audit entry and build the response.
    async fn finish(
        &self,
        mut ctx: RequestContext,
        mut result: Result<ConfidenceDecision, GatewayError>,
    ) -> GatewayResponse {
        if let Err(err) = ctx.trace.advance(PipelineState::Audited) {
            result = Err(err);
        }

        let outcome = match &result {
            Ok(ConfidenceDecision::Accepted(_)) => AuditOutcome::Accepted,
            Ok(ConfidenceDecision::NeedsHumanReview(_, reason)) => AuditOutcome::NeedsReview {
                reason: reason.clone(),
            },
            Err(GatewayError::Cancelled) => AuditOutcome::Cancelled,
            Err(err) => AuditOutcome::Failed {
                kind: err.error_type_name().to_string(),
            },
        };

        let (tokenized_input, pii_tokens) = match &ctx.tokenized {
            Some(t) => (
                t.text.clone(),
                t.distinct_tokens()
                    .into_iter()
                    .map(|token| token.as_str().to_string())
                    .collect::<Vec<_>>(),
            ),
            None => (String::new(), Vec::new()),
        };
        let model = ctx.routing.as_ref().map(|r| r.model.clone());

        let entry = AuditEntry {
            request_id: ctx.request_id,
            use_case: ctx.use_case.clone(),
            tokenized_input: tokenized_input.clone(),
            pii_tokens: pii_tokens.len(),
            model_used: model.clone(),
            routing_reason: ctx.routing.as_ref().map(|r| r.reason.clone()),
            stripped_params: ctx
                .routing
                .as_ref()
                .map(|r| r.stripped.clone())
                .unwrap_or_default(),
            attempts: ctx.attempts,
            validation: ctx.validation.clone(),
            outcome,
            confidence: ctx.confidence,
            usage: ctx.usage,
            cost: ctx.cost,
            latency_ms: u64::try_from(ctx.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            states: ctx.trace.states().to_vec(),
            timestamp: Utc::now(),
        };

        if let Err(err) = self.audit.record(entry).await {
            let internal = GatewayError::internal();
            error!(error = %err, internal = %internal, "Audit sink rejected entry");
            result = Err(internal);
        }

        let terminal = if result.is_ok() {
            PipelineState::Done
        } else {
            PipelineState::Failed
        };
        if let Err(err) = ctx.trace.advance(terminal) {
            result = Err(err);
        }

        let outcome = match result {
            Ok(decision) => GatewayOutcome::from(decision),
            Err(ref err) => GatewayOutcome::from(err),
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_request(&ctx.use_case, outcome.tag());
            metrics.record_cost(&ctx.use_case, ctx.cost);
        }
        info!(
            outcome = outcome.tag(),
            model = model.as_deref().unwrap_or("-"),
            attempts = ctx.attempts,
            pii_tokens = pii_tokens.len(),
            confidence = ctx.confidence,
            cost = ctx.cost,
            "Request finished"
        );

        GatewayResponse {
            request_id: ctx.request_id,
            use_case: ctx.use_case,
            outcome,
            model,
            cost: ctx.cost,
            usage: ctx.usage,
            tokenized_input,
            pii_tokens,
            states: ctx.trace.into_states(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ScriptStep, ScriptedBackend};
    use crate::config::load_builtin;

    fn gateway(backend: Arc<ScriptedBackend>) -> Gateway {
        let (catalog, _) = load_builtin().unwrap();
        Gateway::new(catalog, backend)
    }

    #[tokio::test]
    async fn test_unknown_use_case_is_audited_tokenized() {
        let backend = Arc::new(ScriptedBackend::demo());
        let gw = gateway(Arc::clone(&backend));

        let response = gw.process("nope", "mail me at jane@example.com").await;
        assert_eq!(response.outcome.tag(), "unknown_use_case");
        assert!(!response.tokenized_input.contains("jane@example.com"));
        assert_eq!(backend.call_count(), 0);

        let entries = gw.audit().entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].states,
            vec![
                PipelineState::Received,
                PipelineState::Tokenized,
                PipelineState::Audited
            ]
        );
        assert_eq!(entries[0].validation, AuditValidation::NotReached);
    }

    #[tokio::test]
    async fn test_terminal_backend_failure_is_not_retried() {
        let backend = Arc::new(ScriptedBackend::demo());
        backend.push_steps([ScriptStep::Terminal("HTTP 400: bad request".to_string())]);
        let gw = gateway(Arc::clone(&backend));

        let response = gw
            .process("support_ticket_classifier", "I forgot my password")
            .await;
        assert_eq!(response.outcome.tag(), "backend_terminal");
        assert_eq!(backend.call_count(), 1);
        assert_eq!(response.states.last(), Some(&PipelineState::Failed));
        let text = serde_json::to_string(&response).unwrap();
        assert!(!text.contains("bad request"));
    }

    #[tokio::test]
    async fn test_reveal_round_trip() {
        let gw = gateway(Arc::new(ScriptedBackend::demo()));
        let response = gw
            .process(
                "onboarding_document_extractor",
                "Name: John Smith\nEmail: john@example.com\nIBAN: DE89370400440532013000",
            )
            .await;
        let value = response.outcome.value().unwrap();
        assert_ne!(value["email"], "john@example.com");

        let revealed = gw.reveal(value).await.unwrap();
        assert_eq!(revealed["email"], "john@example.com");
        assert_eq!(revealed["iban"], "DE89370400440532013000");
    }

    #[tokio::test]
    async fn test_shared_vault_and_audit_sink() {
        let vault = Arc::new(MemoryVault::default());
        let audit = Arc::new(MemoryAuditLog::new());
        let first = gateway(Arc::new(ScriptedBackend::demo()))
            .with_vault(vault.clone())
            .with_audit_sink(audit.clone());
        let second = gateway(Arc::new(ScriptedBackend::demo()))
            .with_vault(vault.clone())
            .with_audit_sink(audit.clone());

        let a = first
            .process("support_ticket_classifier", "Contact john@example.com")
            .await;
        let b = second
            .process("support_ticket_classifier", "Contact john@example.com please")
            .await;

        assert_eq!(a.pii_tokens, b.pii_tokens);
        assert_eq!(vault.len(), 1);
        assert_eq!(audit.len(), 2);
        let original = second.reveal_text(&a.pii_tokens[0]).await.unwrap();
        assert_eq!(original, "john@example.com");
    }

    #[tokio::test]
    async fn test_empty_detector_set_leaves_text_untouched() {
        let gw = gateway(Arc::new(ScriptedBackend::demo())).with_detectors(DetectorSet::empty());
        let response = gw
            .process("support_ticket_classifier", "Contact john@example.com")
            .await;
        assert_eq!(response.tokenized_input, "Contact john@example.com");
        assert!(response.pii_tokens.is_empty());
    }
}
