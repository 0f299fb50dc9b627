//! Caller-facing results.

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::PipelineState;
use crate::backend::Usage;
use crate::error::GatewayError;
use crate::gate::{ConfidenceDecision, ReviewReason};

/// Structured outcome of one `process` call.
///
/// Errors carry the safe message and whitelisted details only; backend text
/// never appears here.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GatewayOutcome {
    Accepted {
        value: Value,
    },
    NeedsReview {
        value: Value,
        reason: ReviewReason,
    },
    Error {
        kind: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
}

impl GatewayOutcome {
    #[must_use]
    pub fn tag(&self) -> &str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::NeedsReview { .. } => "needs_review",
            Self::Error { kind, .. } => kind,
        }
    }

    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// The (tokenized) value, unless this is an error.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Accepted { value } | Self::NeedsReview { value, .. } => Some(value),
            Self::Error { .. } => None,
        }
    }
}

impl From<ConfidenceDecision> for GatewayOutcome {
    fn from(decision: ConfidenceDecision) -> Self {
        match decision {
            ConfidenceDecision::Accepted(value) => Self::Accepted { value },
            ConfidenceDecision::NeedsHumanReview(value, reason) => {
                Self::NeedsReview { value, reason }
            }
        }
    }
}

impl From<&GatewayError> for GatewayOutcome {
    fn from(err: &GatewayError) -> Self {
        Self::Error {
            kind: err.error_type_name().to_string(),
            message: err.safe_message(),
            details: err.safe_details(),
        }
    }
}

/// Everything a caller learns about one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayResponse {
    pub request_id: Uuid,
    pub use_case: String,
    pub outcome: GatewayOutcome,
    /// Model of the last backend attempt.
    pub model: Option<String>,
    pub cost: f64,
    pub usage: Usage,
    pub tokenized_input: String,
    /// Distinct tokens minted or reused for the input.
    pub pii_tokens: Vec<String>,
    pub states: Vec<PipelineState>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_outcome_is_safe() {
        let err = GatewayError::BackendTerminal {
            model: "gpt-4o".to_string(),
            reason: "HTTP 400: api key sk-secret rejected".to_string(),
        };
        let outcome = GatewayOutcome::from(&err);
        let text = serde_json::to_string(&outcome).unwrap();
        assert!(!text.contains("sk-secret"));
        assert_eq!(outcome.tag(), "backend_terminal");
        assert!(outcome.value().is_none());
    }

    #[test]
    fn test_from_decision() {
        let outcome = GatewayOutcome::from(ConfidenceDecision::NeedsHumanReview(
            json!({"confidence": 0.6}),
            ReviewReason::BelowThreshold {
                confidence: 0.6,
                threshold: 0.85,
            },
        ));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "needs_review");
        assert_eq!(json["reason"]["kind"], "below_threshold");
        assert!(!outcome.is_accepted());
    }
}
