//! Error handling for the gateway pipeline.
//!
//! [`GatewayError`] is the taxonomy callers see. Backend and vault failures
//! are folded into it at the orchestrator; their raw messages stay in logs
//! and never reach [`GatewayError::safe_message`] or
//! [`GatewayError::safe_details`].

use thiserror::Error;

use crate::validator::SchemaViolation;
use crate::vault::VaultError;

/// Every way a gateway call can fail.
///
/// Low confidence is not here: it is a review outcome, not an error.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GatewayError {
    /// A token could not be resolved (forged, expired or evicted).
    #[error("Token '{token}' could not be resolved")]
    VaultMiss {
        /// The token string, never an original value
        token: String,
    },

    /// The policy names no usable model for this request.
    #[error("No usable model for use case '{use_case}'")]
    RoutingAmbiguity {
        use_case: String,
        /// Internal explanation, kept out of client-facing output
        reason: String,
    },

    /// Network, timeout or rate-limit failure, still failing after retry.
    #[error("Generation backend temporarily unavailable")]
    BackendTransient {
        model: String,
        /// Backend message (internal only)
        reason: String,
    },

    /// Non-recoverable backend failure.
    #[error("Generation backend failed")]
    BackendTerminal {
        model: String,
        /// Backend message (internal only)
        reason: String,
    },

    /// Model output did not conform to the use case's schema.
    #[error("Model output failed schema validation ({} violation(s))", violations.len())]
    SchemaViolation { violations: Vec<SchemaViolation> },

    #[error("Unknown use case '{use_case}'")]
    UnknownUseCase { use_case: String },

    /// Caller abandoned the request.
    #[error("Request cancelled")]
    Cancelled,

    /// Should not happen.
    #[error("Internal error. Reference: {reference}")]
    Internal {
        /// Correlation reference for log lookup
        reference: String,
    },
}

impl GatewayError {
    /// Stable snake_case tag for audit and metrics.
    #[must_use]
    pub fn error_type_name(&self) -> &'static str {
        match self {
            Self::VaultMiss { .. } => "vault_miss",
            Self::RoutingAmbiguity { .. } => "routing_ambiguity",
            Self::BackendTransient { .. } => "backend_transient",
            Self::BackendTerminal { .. } => "backend_terminal",
            Self::SchemaViolation { .. } => "schema_violation",
            Self::UnknownUseCase { .. } => "unknown_use_case",
            Self::Cancelled => "cancelled",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Whether the pipeline may retry once on this error.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::BackendTransient { .. })
    }

    /// Client-visible message.
    ///
    /// Display strings are written to be safe, so this is the Display text.
    #[must_use]
    pub fn safe_message(&self) -> String {
        self.to_string()
    }

    /// Structured details for client consumption (whitelisted fields only).
    #[must_use]
    pub fn safe_details(&self) -> Option<serde_json::Value> {
        match self {
            Self::VaultMiss { token } => Some(serde_json::json!({ "token": token })),
            Self::RoutingAmbiguity { use_case, .. } | Self::UnknownUseCase { use_case } => {
                Some(serde_json::json!({ "use_case": use_case }))
            }
            Self::BackendTransient { model, .. } | Self::BackendTerminal { model, .. } => {
                // Don't expose backend message
                Some(serde_json::json!({ "model": model }))
            }
            Self::SchemaViolation { violations } => {
                let items: Vec<_> = violations
                    .iter()
                    .map(|v| serde_json::json!({ "field": v.field(), "kind": v.kind() }))
                    .collect();
                Some(serde_json::json!({ "violations": items }))
            }
            Self::Internal { reference } => Some(serde_json::json!({ "reference": reference })),
            Self::Cancelled => None,
        }
    }

    /// Internal error with a fresh reference id.
    #[must_use]
    pub fn internal() -> Self {
        Self::Internal {
            reference: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl From<VaultError> for GatewayError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::NotFound { token } => Self::VaultMiss { token },
            other => {
                let reference = uuid::Uuid::new_v4().to_string();
                tracing::error!(error = %other, reference = %reference, "Vault failure");
                Self::Internal { reference }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::FieldType;

    #[test]
    fn test_error_type_names() {
        assert_eq!(GatewayError::Cancelled.error_type_name(), "cancelled");
        assert_eq!(
            GatewayError::VaultMiss {
                token: "PII_EMAIL_x".to_string()
            }
            .error_type_name(),
            "vault_miss"
        );
        assert_eq!(
            GatewayError::SchemaViolation { violations: vec![] }.error_type_name(),
            "schema_violation"
        );
    }

    #[test]
    fn test_backend_message_not_exposed() {
        let err = GatewayError::BackendTerminal {
            model: "gpt-4o".to_string(),
            reason: "401 invalid api key sk-abc".to_string(),
        };
        assert!(!err.safe_message().contains("sk-abc"));
        let details = err.safe_details().unwrap().to_string();
        assert!(!details.contains("sk-abc"));
        assert!(details.contains("gpt-4o"));
    }

    #[test]
    fn test_schema_details_list_fields_only() {
        let err = GatewayError::SchemaViolation {
            violations: vec![
                SchemaViolation::MissingField {
                    field: "category".to_string(),
                },
                SchemaViolation::WrongType {
                    field: "confidence".to_string(),
                    expected: FieldType::Number,
                    found: "string".to_string(),
                },
            ],
        };
        let details = err.safe_details().unwrap();
        assert_eq!(details["violations"][0]["field"], "category");
        assert_eq!(details["violations"][0]["kind"], "missing_field");
        assert_eq!(details["violations"][1]["kind"], "wrong_type");
        assert_eq!(
            err.safe_message(),
            "Model output failed schema validation (2 violation(s))"
        );
    }

    #[test]
    fn test_only_transient_is_retriable() {
        assert!(
            GatewayError::BackendTransient {
                model: "m".to_string(),
                reason: "timeout".to_string()
            }
            .is_retriable()
        );
        assert!(
            !GatewayError::BackendTerminal {
                model: "m".to_string(),
                reason: "bad request".to_string()
            }
            .is_retriable()
        );
    }

    #[test]
    fn test_vault_error_conversion() {
        let miss: GatewayError = VaultError::NotFound {
            token: "PII_PHONE_abc".to_string(),
        }
        .into();
        assert_eq!(
            miss,
            GatewayError::VaultMiss {
                token: "PII_PHONE_abc".to_string()
            }
        );

        let storage: GatewayError = VaultError::Storage {
            details: "disk".to_string(),
        }
        .into();
        assert_eq!(storage.error_type_name(), "internal_error");
    }
}
