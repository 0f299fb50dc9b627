//! Prometheus metrics using the prometheus-client crate.
//!
//! [`GatewayMetrics`] registers every gateway metric with a caller-owned
//! `Registry`. Label values come from the catalog (use cases, models,
//! params) or fixed sets (outcomes, statuses, categories), so cardinality is
//! bounded by configuration.

use std::sync::atomic::AtomicU64;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

// ─────────────────────────────────────────────────────────────────────────────
// Label Sets
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub use_case: String,
    /// "accepted", "needs_review", or an error type name
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BackendLabels {
    pub model: String,
    /// "ok", "transient", "terminal", "timeout" or "cancelled"
    pub status: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ModelLabels {
    pub model: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CategoryLabels {
    pub category: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ParamStripLabels {
    pub model: String,
    pub param: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct UseCaseLabels {
    pub use_case: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Histogram Bucket Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Backend call duration buckets in milliseconds.
const BACKEND_BUCKETS: &[f64] = &[
    10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0,
];

// ─────────────────────────────────────────────────────────────────────────────
// GatewayMetrics
// ─────────────────────────────────────────────────────────────────────────────

/// Prometheus metrics for the gateway. All names use the `modelgate_` prefix.
pub struct GatewayMetrics {
    /// Processed requests by use case and outcome.
    pub requests_total: Family<RequestLabels, Counter>,

    /// Backend invocations by model and status.
    pub backend_requests_total: Family<BackendLabels, Counter>,

    /// Backend call latency in milliseconds.
    pub backend_duration_ms: Family<ModelLabels, Histogram>,

    /// Tokens minted or reused, by category.
    pub pii_tokens_total: Family<CategoryLabels, Counter>,

    /// Invocation params dropped by the router.
    pub param_strips_total: Family<ParamStripLabels, Counter>,

    /// Accumulated cost by use case.
    pub cost_total: Family<UseCaseLabels, Counter<f64, AtomicU64>>,
}

impl std::fmt::Debug for GatewayMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayMetrics").finish_non_exhaustive()
    }
}

impl GatewayMetrics {
    /// Create and register all metrics with the given registry.
    pub fn new(registry: &mut Registry) -> Self {
        // Counter names omit `_total`; the encoder appends it.
        let requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "modelgate_requests",
            "Gateway requests by use case and outcome",
            requests_total.clone(),
        );

        let backend_requests_total = Family::<BackendLabels, Counter>::default();
        registry.register(
            "modelgate_backend_requests",
            "Generation backend calls by model and status",
            backend_requests_total.clone(),
        );

        let backend_duration_ms = Family::<ModelLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(BACKEND_BUCKETS.iter().copied())
        });
        registry.register(
            "modelgate_backend_duration_ms",
            "Generation backend call latency in milliseconds",
            backend_duration_ms.clone(),
        );

        let pii_tokens_total = Family::<CategoryLabels, Counter>::default();
        registry.register(
            "modelgate_pii_tokens",
            "Sensitive values replaced by tokens",
            pii_tokens_total.clone(),
        );

        let param_strips_total = Family::<ParamStripLabels, Counter>::default();
        registry.register(
            "modelgate_param_strips",
            "Invocation params stripped as unsupported by the routed model",
            param_strips_total.clone(),
        );

        let cost_total = Family::<UseCaseLabels, Counter<f64, AtomicU64>>::default();
        registry.register(
            "modelgate_cost",
            "Accumulated generation cost by use case",
            cost_total.clone(),
        );

        Self {
            requests_total,
            backend_requests_total,
            backend_duration_ms,
            pii_tokens_total,
            param_strips_total,
            cost_total,
        }
    }

    pub fn record_request(&self, use_case: &str, outcome: &str) {
        self.requests_total
            .get_or_create(&RequestLabels {
                use_case: use_case.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Record one backend call and its latency.
    pub fn record_backend_call(&self, model: &str, status: &str, duration_ms: f64) {
        self.backend_requests_total
            .get_or_create(&BackendLabels {
                model: model.to_string(),
                status: status.to_string(),
            })
            .inc();

        self.backend_duration_ms
            .get_or_create(&ModelLabels {
                model: model.to_string(),
            })
            .observe(duration_ms);
    }

    pub fn record_pii_token(&self, category: &str) {
        self.pii_tokens_total
            .get_or_create(&CategoryLabels {
                category: category.to_string(),
            })
            .inc();
    }

    pub fn record_param_strip(&self, model: &str, param: &str) {
        self.param_strips_total
            .get_or_create(&ParamStripLabels {
                model: model.to_string(),
                param: param.to_string(),
            })
            .inc();
    }

    pub fn record_cost(&self, use_case: &str, cost: f64) {
        if cost.is_finite() && cost > 0.0 {
            self.cost_total
                .get_or_create(&UseCaseLabels {
                    use_case: use_case.to_string(),
                })
                .inc_by(cost);
        }
    }
}

/// Encode a registry as OpenMetrics text.
pub fn encode_registry(registry: &Registry) -> Result<String, std::fmt::Error> {
    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, registry)?;
    Ok(buffer)
}
