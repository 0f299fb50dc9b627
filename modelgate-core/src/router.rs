//! Model routing.
//!
//! [`ModelRouter::select`] picks the model for one invocation and filters the
//! policy's invocation params down to what that model accepts. Filtering is
//! deterministic (params are walked in name order) and every dropped param
//! is reported in the [`RoutingDecision`] so the audit trail explains it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;
use crate::models::ModelCatalog;
use crate::policy::UseCasePolicy;

/// Reasoning-family name for the output-length limit.
const MAX_TOKENS: &str = "max_tokens";
const MAX_COMPLETION_TOKENS: &str = "max_completion_tokens";

/// What prompted this routing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTrigger {
    /// First attempt.
    Primary,
    /// Caller asked for the fallback model.
    ForcedFallback,
    /// The previous attempt failed transiently.
    RetryAfterTransient,
}

/// Runtime input to [`ModelRouter::select`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingSignal {
    pub trigger: RouteTrigger,
    /// Word count of the tokenized input.
    pub input_words: usize,
}

impl RoutingSignal {
    #[must_use]
    pub fn primary(input_words: usize) -> Self {
        Self {
            trigger: RouteTrigger::Primary,
            input_words,
        }
    }

    #[must_use]
    pub fn forced_fallback(input_words: usize) -> Self {
        Self {
            trigger: RouteTrigger::ForcedFallback,
            input_words,
        }
    }

    #[must_use]
    pub fn retry(input_words: usize) -> Self {
        Self {
            trigger: RouteTrigger::RetryAfterTransient,
            input_words,
        }
    }
}

/// Why the chosen model was chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoutingReason {
    Primary,
    ForcedFallback,
    ComplexityEscalation { words: usize, limit: usize },
    /// Retry after a transient failure, on the fallback model.
    RetryFallback,
    /// Retry after a transient failure, on the primary (no fallback set).
    RetryPrimary,
}

impl RoutingReason {
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::ForcedFallback => "forced_fallback",
            Self::ComplexityEscalation { .. } => "complexity_escalation",
            Self::RetryFallback => "retry_fallback",
            Self::RetryPrimary => "retry_primary",
        }
    }
}

/// A param forwarded under a different name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamRename {
    pub from: String,
    pub to: String,
}

/// Result of routing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub model: String,
    /// Params the model accepts, ready to forward.
    pub params: BTreeMap<String, Value>,
    /// Params dropped as unsupported, in name order.
    pub stripped: Vec<String>,
    pub renamed: Vec<ParamRename>,
    pub reason: RoutingReason,
}

/// Chooses models and compatible params.
#[derive(Debug, Clone)]
pub struct ModelRouter {
    catalog: Arc<ModelCatalog>,
    metrics: Option<Arc<GatewayMetrics>>,
}

impl ModelRouter {
    #[must_use]
    pub fn new(catalog: Arc<ModelCatalog>) -> Self {
        Self {
            catalog,
            metrics: None,
        }
    }

    /// Count stripped params in `modelgate_param_strips_total`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    /// Select a model and its compatible params.
    ///
    /// # Errors
    ///
    /// `RoutingAmbiguity` when the chosen model id is empty or unknown, or a
    /// forced fallback is requested for a policy without one.
    pub fn select(
        &self,
        policy: &UseCasePolicy,
        signal: RoutingSignal,
    ) -> Result<RoutingDecision, GatewayError> {
        let ambiguity = |reason: String| GatewayError::RoutingAmbiguity {
            use_case: policy.name.clone(),
            reason,
        };

        let fallback = policy.fallback_model.as_deref();
        let (model, reason) = match signal.trigger {
            RouteTrigger::ForcedFallback => match fallback {
                Some(m) => (m, RoutingReason::ForcedFallback),
                None => return Err(ambiguity("forced fallback without fallback_model".to_string())),
            },
            RouteTrigger::RetryAfterTransient => match fallback {
                Some(m) => (m, RoutingReason::RetryFallback),
                None => (policy.model.as_str(), RoutingReason::RetryPrimary),
            },
            RouteTrigger::Primary => match (policy.escalate_above_words, fallback) {
                (Some(limit), Some(m)) if signal.input_words > limit => (
                    m,
                    RoutingReason::ComplexityEscalation {
                        words: signal.input_words,
                        limit,
                    },
                ),
                _ => (policy.model.as_str(), RoutingReason::Primary),
            },
        };

        if model.trim().is_empty() {
            return Err(ambiguity("empty model id".to_string()));
        }
        let Some(spec) = self.catalog.get(model) else {
            return Err(ambiguity(format!("model '{model}' not in catalog")));
        };

        let mut params = BTreeMap::new();
        let mut stripped = Vec::new();
        let mut renamed = Vec::new();

        for (name, value) in &policy.invocation_params {
            if spec.supports(name) {
                params.insert(name.clone(), value.clone());
            } else if name == MAX_TOKENS
                && spec.supports(MAX_COMPLETION_TOKENS)
                && !policy.invocation_params.contains_key(MAX_COMPLETION_TOKENS)
            {
                params.insert(MAX_COMPLETION_TOKENS.to_string(), value.clone());
                renamed.push(ParamRename {
                    from: MAX_TOKENS.to_string(),
                    to: MAX_COMPLETION_TOKENS.to_string(),
                });
            } else {
                stripped.push(name.clone());
            }
        }

        if !stripped.is_empty() {
            debug!(
                use_case = %policy.name,
                model = %model,
                stripped = ?stripped,
                "Stripped params unsupported by routed model"
            );
            if let Some(metrics) = &self.metrics {
                for param in &stripped {
                    metrics.record_param_strip(model, param);
                }
            }
        }

        Ok(RoutingDecision {
            model: model.to_string(),
            params,
            stripped,
            renamed,
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ModelFamily, ModelSpec, Pricing};
    use crate::policy::OutputSchema;
    use serde_json::json;

    fn router() -> ModelRouter {
        let catalog = ModelCatalog::new()
            .with(ModelSpec::new("gpt-4o-mini", ModelFamily::Chat, Pricing::default()))
            .with(ModelSpec::new("gpt-4o", ModelFamily::Chat, Pricing::default()))
            .with(ModelSpec::new("o1-mini", ModelFamily::Reasoning, Pricing::default()));
        ModelRouter::new(Arc::new(catalog))
    }

    fn policy() -> UseCasePolicy {
        let mut policy = UseCasePolicy::new(
            "faq",
            "gpt-4o-mini",
            "Answer.",
            OutputSchema::default(),
            0.8,
        );
        policy.fallback_model = Some("o1-mini".to_string());
        policy.invocation_params = BTreeMap::from([
            ("temperature".to_string(), json!(0.3)),
            ("max_tokens".to_string(), json!(500)),
        ]);
        policy
    }

    #[test]
    fn test_primary_keeps_supported_params() {
        let decision = router().select(&policy(), RoutingSignal::primary(5)).unwrap();
        assert_eq!(decision.model, "gpt-4o-mini");
        assert_eq!(decision.reason, RoutingReason::Primary);
        assert_eq!(decision.params.len(), 2);
        assert!(decision.stripped.is_empty());
    }

    #[test]
    fn test_reasoning_fallback_strips_and_renames() {
        let decision = router()
            .select(&policy(), RoutingSignal::forced_fallback(5))
            .unwrap();
        assert_eq!(decision.model, "o1-mini");
        assert_eq!(decision.reason, RoutingReason::ForcedFallback);
        assert!(!decision.params.contains_key("temperature"));
        assert_eq!(decision.params["max_completion_tokens"], json!(500));
        assert_eq!(decision.stripped, vec!["temperature".to_string()]);
        assert_eq!(
            decision.renamed,
            vec![ParamRename {
                from: "max_tokens".to_string(),
                to: "max_completion_tokens".to_string()
            }]
        );
    }

    #[test]
    fn test_forced_fallback_without_fallback_is_ambiguous() {
        let mut p = policy();
        p.fallback_model = None;
        let result = router().select(&p, RoutingSignal::forced_fallback(1));
        assert!(matches!(result, Err(GatewayError::RoutingAmbiguity { .. })));
    }

    #[test]
    fn test_retry_uses_fallback_then_primary() {
        let decision = router().select(&policy(), RoutingSignal::retry(1)).unwrap();
        assert_eq!(decision.model, "o1-mini");
        assert_eq!(decision.reason, RoutingReason::RetryFallback);

        let mut p = policy();
        p.fallback_model = None;
        let decision = router().select(&p, RoutingSignal::retry(1)).unwrap();
        assert_eq!(decision.model, "gpt-4o-mini");
        assert_eq!(decision.reason, RoutingReason::RetryPrimary);
    }

    #[test]
    fn test_complexity_escalation() {
        let mut p = policy();
        p.escalate_above_words = Some(10);

        let short = router().select(&p, RoutingSignal::primary(10)).unwrap();
        assert_eq!(short.model, "gpt-4o-mini");

        let long = router().select(&p, RoutingSignal::primary(11)).unwrap();
        assert_eq!(long.model, "o1-mini");
        assert_eq!(
            long.reason,
            RoutingReason::ComplexityEscalation {
                words: 11,
                limit: 10
            }
        );
    }

    #[test]
    fn test_unknown_model_is_ambiguous() {
        let mut p = policy();
        p.model = "gpt-9".to_string();
        let result = router().select(&p, RoutingSignal::primary(1));
        assert!(matches!(result, Err(GatewayError::RoutingAmbiguity { .. })));
    }

    #[test]
    fn test_explicit_completion_limit_wins_over_rename() {
        let mut p = policy();
        p.invocation_params
            .insert("max_completion_tokens".to_string(), json!(200));
        let decision = router().select(&p, RoutingSignal::forced_fallback(1)).unwrap();
        assert_eq!(decision.params["max_completion_tokens"], json!(200));
        assert!(decision.stripped.contains(&"max_tokens".to_string()));
        assert!(decision.renamed.is_empty());
    }

    #[test]
    fn test_strips_are_counted() {
        let mut registry = prometheus_client::registry::Registry::default();
        let metrics = Arc::new(GatewayMetrics::new(&mut registry));
        let router = router().with_metrics(metrics);
        router
            .select(&policy(), RoutingSignal::forced_fallback(1))
            .unwrap();
        let text = crate::metrics::encode_registry(&registry).unwrap();
        assert!(text.contains("model=\"o1-mini\",param=\"temperature\""));
    }
}
