//! Schema validation of raw model output.
//!
//! Model output is untrusted. [`validate`] parses it and checks it against the
//! use case's [`OutputSchema`], collecting every violation rather than
//! stopping at the first. Values are reported, never adjusted into range.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::policy::{FieldType, OutputSchema};

/// One way the output failed its schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaViolation {
    /// Output is not valid JSON.
    Parse { message: String },
    /// Output parsed, but the top level is not an object.
    NotAnObject { found: String },
    MissingField { field: String },
    WrongType {
        field: String,
        expected: FieldType,
        found: String,
    },
    NotInEnum {
        field: String,
        value: String,
        allowed: Vec<String>,
    },
    OutOfRange {
        field: String,
        value: f64,
        minimum: Option<f64>,
        maximum: Option<f64>,
    },
}

impl SchemaViolation {
    /// The offending field, if the violation concerns one.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Parse { .. } | Self::NotAnObject { .. } => None,
            Self::MissingField { field }
            | Self::WrongType { field, .. }
            | Self::NotInEnum { field, .. }
            | Self::OutOfRange { field, .. } => Some(field),
        }
    }

    /// Stable tag for logs and audit.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse",
            Self::NotAnObject { .. } => "not_an_object",
            Self::MissingField { .. } => "missing_field",
            Self::WrongType { .. } => "wrong_type",
            Self::NotInEnum { .. } => "not_in_enum",
            Self::OutOfRange { .. } => "out_of_range",
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse { message } => write!(f, "output is not valid JSON: {message}"),
            Self::NotAnObject { found } => write!(f, "output must be a JSON object, found {found}"),
            Self::MissingField { field } => write!(f, "missing required field '{field}'"),
            Self::WrongType {
                field,
                expected,
                found,
            } => write!(f, "field '{field}' must be {expected}, found {found}"),
            Self::NotInEnum {
                field,
                value,
                allowed,
            } => write!(
                f,
                "field '{field}' has value '{value}', expected one of [{}]",
                allowed.join(", ")
            ),
            Self::OutOfRange {
                field,
                value,
                minimum,
                maximum,
            } => {
                let lo = minimum.map_or("-inf".to_string(), |m| m.to_string());
                let hi = maximum.map_or("inf".to_string(), |m| m.to_string());
                write!(f, "field '{field}' value {value} outside [{lo}, {hi}]")
            }
        }
    }
}

/// Result of validating one output.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Valid(Value),
    Invalid(Vec<SchemaViolation>),
}

impl ValidationOutcome {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

/// Validate raw model output against `schema`.
///
/// Missing required fields are reported first in `schema.required` order,
/// then per-property checks in property-name order. Fields the schema does
/// not describe are allowed through. A `null` is accepted for nullable
/// fields and for optional ones.
#[must_use]
pub fn validate(raw_output: &str, schema: &OutputSchema) -> ValidationOutcome {
    let body = strip_code_fence(raw_output);

    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            return ValidationOutcome::Invalid(vec![SchemaViolation::Parse {
                message: e.to_string(),
            }]);
        }
    };

    let Some(object) = value.as_object() else {
        return ValidationOutcome::Invalid(vec![SchemaViolation::NotAnObject {
            found: json_type_name(&value).to_string(),
        }]);
    };

    let mut violations = Vec::new();

    for field in &schema.required {
        if !object.contains_key(field) {
            violations.push(SchemaViolation::MissingField {
                field: field.clone(),
            });
        }
    }

    for (field, spec) in &schema.properties {
        let Some(field_value) = object.get(field) else {
            continue;
        };

        if field_value.is_null() {
            if !spec.nullable && schema.is_required(field) {
                violations.push(SchemaViolation::WrongType {
                    field: field.clone(),
                    expected: spec.field_type,
                    found: "null".to_string(),
                });
            }
            continue;
        }

        if !spec.field_type.matches(field_value) {
            violations.push(SchemaViolation::WrongType {
                field: field.clone(),
                expected: spec.field_type,
                found: json_type_name(field_value).to_string(),
            });
            continue;
        }

        if let Some(allowed) = &spec.allowed
            && let Some(s) = field_value.as_str()
            && !allowed.iter().any(|a| a == s)
        {
            violations.push(SchemaViolation::NotInEnum {
                field: field.clone(),
                value: s.to_string(),
                allowed: allowed.clone(),
            });
        }

        if spec.field_type.is_numeric()
            && let Some(n) = field_value.as_f64()
        {
            let below = spec.minimum.is_some_and(|min| n < min);
            let above = spec.maximum.is_some_and(|max| n > max);
            if below || above {
                violations.push(SchemaViolation::OutOfRange {
                    field: field.clone(),
                    value: n,
                    minimum: spec.minimum,
                    maximum: spec.maximum,
                });
            }
        }
    }

    if violations.is_empty() {
        ValidationOutcome::Valid(value)
    } else {
        ValidationOutcome::Invalid(violations)
    }
}

/// Unwrap a Markdown code fence (```json ... ```) if the whole output is one.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening line.
    match inner.split_once('\n') {
        Some((_, body)) => body.trim(),
        None => inner.trim(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
