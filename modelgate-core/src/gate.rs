//! Confidence gate.
//!
//! Decides whether a validated result is final or goes to human review. The
//! gate never assumes confidence it cannot see: a missing or non-numeric
//! confidence field means review.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::policy::{DEFAULT_CONFIDENCE_FIELD, UseCasePolicy};

/// Why a result needs human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReviewReason {
    BelowThreshold { confidence: f64, threshold: f64 },
    MissingConfidence,
    ModelRequestedReview,
}

impl ReviewReason {
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::BelowThreshold { .. } => "below_threshold",
            Self::MissingConfidence => "missing_confidence",
            Self::ModelRequestedReview => "model_requested_review",
        }
    }
}

impl fmt::Display for ReviewReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BelowThreshold { .. } => write!(f, "confidence below threshold"),
            Self::MissingConfidence => write!(f, "confidence missing from output"),
            Self::ModelRequestedReview => write!(f, "model requested human review"),
        }
    }
}

/// Gate decision.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfidenceDecision {
    Accepted(Value),
    NeedsHumanReview(Value, ReviewReason),
}

impl ConfidenceDecision {
    #[must_use]
    pub fn value(&self) -> &Value {
        match self {
            Self::Accepted(v) | Self::NeedsHumanReview(v, _) => v,
        }
    }

    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Field names the gate reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfidenceGate {
    confidence_field: String,
    review_flag: Option<String>,
}

impl Default for ConfidenceGate {
    fn default() -> Self {
        Self {
            confidence_field: DEFAULT_CONFIDENCE_FIELD.to_string(),
            review_flag: None,
        }
    }
}

impl ConfidenceGate {
    #[must_use]
    pub fn for_policy(policy: &UseCasePolicy) -> Self {
        Self {
            confidence_field: policy.confidence_field.clone(),
            review_flag: policy.human_review_flag.clone(),
        }
    }

    /// Read the confidence field as a finite number.
    #[must_use]
    pub fn confidence(&self, value: &Value) -> Option<f64> {
        value
            .get(&self.confidence_field)
            .and_then(Value::as_f64)
            .filter(|c| c.is_finite())
    }

    /// `confidence < threshold` means review; `confidence >= threshold`
    /// accepts unless the model set the review flag.
    #[must_use]
    pub fn decide(&self, value: Value, threshold: f64) -> ConfidenceDecision {
        let Some(confidence) = self.confidence(&value) else {
            return ConfidenceDecision::NeedsHumanReview(value, ReviewReason::MissingConfidence);
        };

        if confidence < threshold {
            return ConfidenceDecision::NeedsHumanReview(
                value,
                ReviewReason::BelowThreshold {
                    confidence,
                    threshold,
                },
            );
        }

        if let Some(flag) = &self.review_flag
            && value.get(flag).and_then(Value::as_bool) == Some(true)
        {
            return ConfidenceDecision::NeedsHumanReview(value, ReviewReason::ModelRequestedReview);
        }

        ConfidenceDecision::Accepted(value)
    }
}

/// Gate on the default `confidence` field.
#[must_use]
pub fn decide(validated_value: Value, threshold: f64) -> ConfidenceDecision {
    ConfidenceGate::default().decide(validated_value, threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_below_threshold_needs_review() {
        let decision = decide(json!({"confidence": 0.60}), 0.85);
        match decision {
            ConfidenceDecision::NeedsHumanReview(_, reason) => {
                assert_eq!(reason.to_string(), "confidence below threshold");
                assert_eq!(
                    reason,
                    ReviewReason::BelowThreshold {
                        confidence: 0.60,
                        threshold: 0.85
                    }
                );
            }
            other => panic!("expected review, got {other:?}"),
        }
    }

    #[test]
    fn test_at_threshold_is_accepted() {
        assert!(decide(json!({"confidence": 0.85}), 0.85).is_accepted());
        assert!(decide(json!({"confidence": 0.92}), 0.85).is_accepted());
    }

    #[test]
    fn test_missing_confidence_needs_review() {
        let decision = decide(json!({"answer": "42"}), 0.0);
        assert_eq!(
            decision,
            ConfidenceDecision::NeedsHumanReview(
                json!({"answer": "42"}),
                ReviewReason::MissingConfidence
            )
        );
    }

    #[test]
    fn test_non_numeric_confidence_counts_as_missing() {
        let decision = decide(json!({"confidence": "high"}), 0.5);
        assert!(matches!(
            decision,
            ConfidenceDecision::NeedsHumanReview(_, ReviewReason::MissingConfidence)
        ));
    }

    #[test]
    fn test_model_requested_review() {
        let gate = ConfidenceGate {
            confidence_field: "confidence".to_string(),
            review_flag: Some("requires_human_review".to_string()),
        };
        let flagged = gate.decide(json!({"confidence": 0.99, "requires_human_review": true}), 0.8);
        assert!(matches!(
            flagged,
            ConfidenceDecision::NeedsHumanReview(_, ReviewReason::ModelRequestedReview)
        ));

        let unflagged = gate.decide(json!({"confidence": 0.99, "requires_human_review": false}), 0.8);
        assert!(unflagged.is_accepted());
    }

    #[test]
    fn test_custom_confidence_field() {
        let gate = ConfidenceGate {
            confidence_field: "certainty".to_string(),
            review_flag: None,
        };
        assert!(gate.decide(json!({"certainty": 0.9}), 0.8).is_accepted());
        assert!(!gate.decide(json!({"confidence": 0.9}), 0.8).is_accepted());
    }
}
