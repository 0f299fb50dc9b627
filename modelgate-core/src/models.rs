//! Model catalog: family, supported invocation parameters, pricing.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::backend::Usage;

/// Model family. Decides which invocation parameters a model accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    /// Sampling chat-completion models.
    Chat,
    /// Deterministic reasoning models; no sampling controls.
    Reasoning,
}

impl ModelFamily {
    /// Parameters the family accepts when the catalog entry does not say.
    #[must_use]
    pub fn default_params(&self) -> &'static [&'static str] {
        match self {
            Self::Chat => &[
                "temperature",
                "top_p",
                "max_tokens",
                "presence_penalty",
                "frequency_penalty",
                "stop",
                "seed",
            ],
            Self::Reasoning => &["max_completion_tokens", "reasoning_effort", "seed"],
        }
    }

    /// Guess the family from a model id when the catalog omits it.
    ///
    /// The `o1`/`o3`/`o4` lines are reasoning models; everything else is
    /// treated as chat.
    #[must_use]
    pub fn infer(model_id: &str) -> Self {
        let id = model_id.to_ascii_lowercase();
        if ["o1", "o3", "o4"].iter().any(|p| id.starts_with(p)) {
            Self::Reasoning
        } else {
            Self::Chat
        }
    }
}

impl std::fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chat => write!(f, "chat"),
            Self::Reasoning => write!(f, "reasoning"),
        }
    }
}

/// Price table entry, in currency units per 1K tokens.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pricing {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl Pricing {
    /// `prompt_tokens × prompt price + completion_tokens × completion price`.
    #[must_use]
    pub fn cost(&self, usage: &Usage) -> f64 {
        (usage.prompt_tokens as f64 / 1000.0) * self.prompt_per_1k
            + (usage.completion_tokens as f64 / 1000.0) * self.completion_per_1k
    }
}

/// One model the gateway may route to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSpec {
    pub id: String,
    pub family: ModelFamily,
    pub supported_params: BTreeSet<String>,
    pub pricing: Pricing,
}

impl ModelSpec {
    /// A model with its family's default parameter set.
    #[must_use]
    pub fn new(id: impl Into<String>, family: ModelFamily, pricing: Pricing) -> Self {
        Self {
            id: id.into(),
            family,
            supported_params: family.default_params().iter().map(|p| p.to_string()).collect(),
            pricing,
        }
    }

    #[must_use]
    pub fn supports(&self, param: &str) -> bool {
        self.supported_params.contains(param)
    }
}

/// Models known to the gateway, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelCatalog {
    models: BTreeMap<String, ModelSpec>,
}

impl ModelCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a model.
    pub fn insert(&mut self, spec: ModelSpec) {
        self.models.insert(spec.id.clone(), spec);
    }

    #[must_use]
    pub fn with(mut self, spec: ModelSpec) -> Self {
        self.insert(spec);
        self
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ModelSpec> {
        self.models.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.models.contains_key(id)
    }

    /// Cost of `usage` on `model`; unknown models cost nothing.
    #[must_use]
    pub fn cost(&self, model: &str, usage: &Usage) -> f64 {
        self.get(model).map_or(0.0, |m| m.pricing.cost(usage))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
