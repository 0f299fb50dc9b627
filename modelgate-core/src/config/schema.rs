//! Catalog file schema.
//!
//! These are the on-disk shapes. The loader validates them and builds the
//! typed [`UseCaseCatalog`](crate::policy::UseCaseCatalog) the gateway runs on.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use super::duration_format;
use crate::models::ModelFamily;
use crate::policy::OutputSchema;

/// Root of a catalog file.
///
/// # Example
/// ```yaml
/// schema: 1
/// defaults:
///   invocation_timeout: 30s
/// models:
///   gpt-4o-mini:
///     prompt_price_per_1k: 0.00015
///     completion_price_per_1k: 0.0006
/// use_cases:
///   faq:
///     model: gpt-4o-mini
///     system_prompt: "Answer briefly. Respond in JSON."
///     output_schema:
///       required: [answer, confidence]
///       properties:
///         answer: { type: string }
///         confidence: { type: number, minimum: 0, maximum: 1 }
///     confidence_threshold: 0.8
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogFile {
    /// Schema version (must be 1).
    pub schema: u32,

    #[serde(default)]
    pub defaults: DefaultsSection,

    /// Model price table, keyed by model id.
    #[serde(default)]
    pub models: BTreeMap<String, ModelEntry>,

    /// Use-case policies, keyed by name.
    #[serde(default)]
    pub use_cases: BTreeMap<String, UseCaseEntry>,
}

/// Overrides for [`GatewayDefaults`](super::GatewayDefaults).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultsSection {
    #[serde(
        default,
        deserialize_with = "duration_format::deserialize_option",
        serialize_with = "duration_format::serialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub invocation_timeout: Option<Duration>,

    /// `0s` disables expiry.
    #[serde(
        default,
        deserialize_with = "duration_format::deserialize_option",
        serialize_with = "duration_format::serialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub token_ttl: Option<Duration>,
}

/// One model in the price table.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModelEntry {
    /// Inferred from the model id when omitted.
    #[serde(default)]
    pub family: Option<ModelFamily>,

    pub prompt_price_per_1k: f64,

    pub completion_price_per_1k: f64,

    /// Replaces the family's default parameter set.
    #[serde(default)]
    pub supported_params: Option<Vec<String>>,
}

/// One use case as written in the catalog.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UseCaseEntry {
    /// Defaults to the use-case key.
    #[serde(default)]
    pub display_name: Option<String>,

    pub model: String,

    #[serde(default)]
    pub fallback_model: Option<String>,

    #[serde(default)]
    pub invocation_params: BTreeMap<String, Value>,

    pub system_prompt: String,

    pub output_schema: OutputSchema,

    /// Category names (`email`, `phone`, `iban`, `credit_card`).
    #[serde(default)]
    pub pii_categories: Vec<String>,

    pub confidence_threshold: f64,

    /// Defaults to `confidence`.
    #[serde(default)]
    pub confidence_field: Option<String>,

    #[serde(default)]
    pub human_review_flag: Option<String>,

    #[serde(default)]
    pub escalate_above_words: Option<usize>,

    #[serde(default)]
    pub sample_input: Option<String>,
}
