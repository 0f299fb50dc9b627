//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Catalog loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    // ─────────────────────────────────────────────────────────────────────────
    // Catalog structure
    // ─────────────────────────────────────────────────────────────────────────
    /// Schema version not supported.
    #[error("unsupported schema version {version}, expected 1")]
    UnsupportedSchemaVersion { version: u32 },

    #[error("no use cases defined in catalog")]
    NoUseCases,

    #[error("invalid defaults: {message}")]
    InvalidDefaults { message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Models
    // ─────────────────────────────────────────────────────────────────────────
    #[error("use case '{use_case}' references unknown model '{model}'")]
    UnknownModel { use_case: String, model: String },

    #[error("use case '{use_case}' has an empty model id")]
    EmptyModelId { use_case: String },

    #[error("model '{model}' has an invalid price: must be finite and >= 0")]
    InvalidPrice { model: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Policies
    // ─────────────────────────────────────────────────────────────────────────
    #[error("use case '{use_case}': confidence_threshold {threshold} must be between 0.0 and 1.0")]
    InvalidThreshold { use_case: String, threshold: f64 },

    #[error("use case '{use_case}' has an empty system_prompt")]
    EmptySystemPrompt { use_case: String },

    #[error("use case '{use_case}': unknown PII category '{category}'")]
    UnknownPiiCategory { use_case: String, category: String },

    #[error("use case '{use_case}': invocation param '{param}' must be a scalar")]
    NonScalarParam { use_case: String, param: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Output schemas
    // ─────────────────────────────────────────────────────────────────────────
    #[error("use case '{use_case}': required field '{field}' is not declared in properties")]
    UndeclaredRequiredField { use_case: String, field: String },

    #[error("use case '{use_case}': enum on non-string field '{field}'")]
    EnumOnNonString { use_case: String, field: String },

    #[error("use case '{use_case}': bounds on non-numeric field '{field}'")]
    BoundsOnNonNumeric { use_case: String, field: String },

    #[error("use case '{use_case}': field '{field}' has minimum > maximum or non-finite bounds")]
    InvalidBounds { use_case: String, field: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Environment
    // ─────────────────────────────────────────────────────────────────────────
    /// Required environment variable not set.
    #[error("environment variable '{var}' not set (required for field '{field}')")]
    MissingEnvVar { var: String, field: String },

    // ─────────────────────────────────────────────────────────────────────────
    // I/O and parsing errors
    // ─────────────────────────────────────────────────────────────────────────
    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    ParseError(#[from] serde_saphyr::Error),

    /// I/O error reading the catalog file.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Catalog file not found at any search location.
    #[error("catalog file not found (searched: {searched:?})")]
    ConfigFileNotFound { searched: Vec<PathBuf> },

    #[error("catalog file is empty")]
    EmptyConfigFile,
}

/// Validation warnings (non-fatal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// A threshold is set but the schema never declares the confidence field,
    /// so every result will go to review.
    ThresholdWithoutConfidenceProperty { use_case: String, field: String },

    /// Neither the primary nor the fallback model accepts this param; it
    /// will always be stripped.
    ParamUnsupportedByAllModels { use_case: String, param: String },

    FallbackSameAsPrimary { use_case: String },

    /// `human_review_flag` names a field the schema does not declare.
    ReviewFlagNotInSchema { use_case: String, field: String },
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ThresholdWithoutConfidenceProperty { use_case, field } => write!(
                f,
                "use case '{use_case}' sets a confidence threshold but its schema has no '{field}' property"
            ),
            Self::ParamUnsupportedByAllModels { use_case, param } => write!(
                f,
                "use case '{use_case}': param '{param}' is not supported by any of its models and will be stripped"
            ),
            Self::FallbackSameAsPrimary { use_case } => {
                write!(f, "use case '{use_case}' has fallback_model equal to model")
            }
            Self::ReviewFlagNotInSchema { use_case, field } => write!(
                f,
                "use case '{use_case}': human_review_flag '{field}' is not declared in the schema"
            ),
        }
    }
}

/// Result of catalog validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings encountered during validation.
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn with_warnings(warnings: Vec<ValidationWarning>) -> Self {
        Self { warnings }
    }

    /// Check if validation passed with no warnings.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}
