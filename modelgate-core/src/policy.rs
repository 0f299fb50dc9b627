//! Use-case policies and output schemas.
//!
//! A [`UseCasePolicy`] is built once by the configuration loader, validated,
//! wrapped in an `Arc` and shared read-only by every request.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::GatewayDefaults;
use crate::models::ModelCatalog;
use crate::pii::PiiCategory;

// ============================================================================
// Output Schema
// ============================================================================

/// JSON type a schema field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl FieldType {
    /// Whether `value` has this type. Integers must be integral; no value is
    /// converted to make it fit.
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.is_finite() && f.fract() == 0.0)
            }
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }

    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Number | Self::Integer)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        };
        f.write_str(name)
    }
}

/// Constraints on one output field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Allowed values (string fields only).
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,

    /// Inclusive lower bound (numeric fields only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    /// Inclusive upper bound (numeric fields only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,

    /// Whether `null` is an acceptable value.
    #[serde(default)]
    pub nullable: bool,
}

impl FieldSpec {
    #[must_use]
    pub fn of(field_type: FieldType) -> Self {
        Self {
            field_type,
            allowed: None,
            minimum: None,
            maximum: None,
            nullable: false,
        }
    }

    #[must_use]
    pub fn one_of(values: &[&str]) -> Self {
        Self {
            allowed: Some(values.iter().map(|v| v.to_string()).collect()),
            ..Self::of(FieldType::String)
        }
    }

    #[must_use]
    pub fn bounded(field_type: FieldType, minimum: f64, maximum: f64) -> Self {
        Self {
            minimum: Some(minimum),
            maximum: Some(maximum),
            ..Self::of(field_type)
        }
    }
}

/// Structural contract for a use case's model output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OutputSchema {
    /// Fields that must be present, in reporting order.
    #[serde(default)]
    pub required: Vec<String>,

    #[serde(default)]
    pub properties: BTreeMap<String, FieldSpec>,
}

impl OutputSchema {
    #[must_use]
    pub fn is_required(&self, field: &str) -> bool {
        self.required.iter().any(|f| f == field)
    }
}

// ============================================================================
// Use-Case Policy
// ============================================================================

/// Immutable configuration for one use case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UseCasePolicy {
    pub name: String,
    pub display_name: String,
    pub model: String,
    pub fallback_model: Option<String>,
    /// Parameter name to value. Which ones reach the backend depends on the
    /// model chosen at routing time.
    pub invocation_params: BTreeMap<String, Value>,
    pub system_prompt: String,
    pub output_schema: OutputSchema,
    pub pii_categories: BTreeSet<PiiCategory>,
    /// In `[0, 1]`.
    pub confidence_threshold: f64,
    /// Output field holding the model's confidence.
    pub confidence_field: String,
    /// Boolean output field through which the model can ask for review.
    pub human_review_flag: Option<String>,
    /// Inputs longer than this many words route to the fallback model.
    pub escalate_above_words: Option<usize>,
    /// Demo input shown by front ends.
    pub sample_input: Option<String>,
}

impl UseCasePolicy {
    /// Minimal policy; remaining fields take their defaults.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        output_schema: OutputSchema,
        confidence_threshold: f64,
    ) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            model: model.into(),
            fallback_model: None,
            invocation_params: BTreeMap::new(),
            system_prompt: system_prompt.into(),
            output_schema,
            pii_categories: BTreeSet::new(),
            confidence_threshold,
            confidence_field: DEFAULT_CONFIDENCE_FIELD.to_string(),
            human_review_flag: None,
            escalate_above_words: None,
            sample_input: None,
        }
    }
}

/// Field the confidence gate reads unless a policy says otherwise.
pub const DEFAULT_CONFIDENCE_FIELD: &str = "confidence";

// ============================================================================
// Catalog
// ============================================================================

/// Everything the gateway needs from configuration: models, policies and
/// runtime defaults.
#[derive(Debug, Clone)]
pub struct UseCaseCatalog {
    pub models: Arc<ModelCatalog>,
    pub use_cases: BTreeMap<String, Arc<UseCasePolicy>>,
    pub defaults: GatewayDefaults,
}

impl UseCaseCatalog {
    #[must_use]
    pub fn new(models: ModelCatalog, defaults: GatewayDefaults) -> Self {
        Self {
            models: Arc::new(models),
            use_cases: BTreeMap::new(),
            defaults,
        }
    }

    /// Add a policy, replacing any with the same name.
    #[must_use]
    pub fn with_policy(mut self, policy: UseCasePolicy) -> Self {
        self.use_cases.insert(policy.name.clone(), Arc::new(policy));
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<UseCasePolicy>> {
        self.use_cases.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.use_cases.keys().map(String::as_str)
    }

    pub fn policies(&self) -> impl Iterator<Item = &Arc<UseCasePolicy>> {
        self.use_cases.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integer_type_is_strict() {
        assert!(FieldType::Integer.matches(&json!(3)));
        assert!(FieldType::Integer.matches(&json!(3.0)));
        assert!(!FieldType::Integer.matches(&json!(3.5)));
        assert!(!FieldType::Integer.matches(&json!("3")));
    }

    #[test]
    fn test_number_rejects_numeric_strings() {
        assert!(FieldType::Number.matches(&json!(0.92)));
        assert!(!FieldType::Number.matches(&json!("0.92")));
    }

    #[test]
    fn test_field_spec_deserializes_enum_keyword() {
        let spec: FieldSpec =
            serde_json::from_value(json!({"type": "string", "enum": ["low", "high"]})).unwrap();
        assert_eq!(spec.field_type, FieldType::String);
        assert_eq!(
            spec.allowed,
            Some(vec!["low".to_string(), "high".to_string()])
        );
        assert!(!spec.nullable);
    }

    #[test]
    fn test_policy_defaults() {
        let policy = UseCasePolicy::new("demo", "gpt-4o-mini", "Classify.", OutputSchema::default(), 0.8);
        assert_eq!(policy.display_name, "demo");
        assert_eq!(policy.confidence_field, "confidence");
        assert!(policy.fallback_model.is_none());
    }
}
