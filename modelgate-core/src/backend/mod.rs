//! Generation backends.
//!
//! The gateway needs one thing from a backend: given a system prompt, a
//! tokenized user input, a model id and compatible parameters, return raw
//! output plus usage, or a failure classified as transient or terminal.
//! [`GenerationBackend`] is that contract. Backends are untrusted: their
//! output is validated, their error text is logged but never returned to
//! callers.

mod openai;
mod scripted;

pub use openai::{OpenAiBackend, OpenAiConfig};
pub use scripted::{ScriptStep, ScriptedBackend};

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// One invocation, as routed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub request_id: Uuid,
    /// Use case the request belongs to. Informational; backends may ignore it.
    pub use_case: String,
    pub model: String,
    pub system_prompt: String,
    /// Tokenized input. Never contains original sensitive values.
    pub user_input: String,
    /// Parameters the chosen model accepts.
    pub params: BTreeMap<String, Value>,
}

/// Token counts reported (or estimated) for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Usage {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Successful backend output.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    /// Raw output text, not yet validated.
    pub output: String,
    pub usage: Usage,
    pub latency: Duration,
    /// Model that actually served the call.
    pub model: String,
}

/// Backend failure classification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Network, timeout, rate limit or overload. Worth one retry.
    #[error("transient backend failure: {reason}")]
    Transient { reason: String },

    /// The request itself was rejected or the response is unusable.
    #[error("terminal backend failure: {reason}")]
    Terminal { reason: String },
}

impl BackendError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Transient { reason } | Self::Terminal { reason } => reason,
        }
    }
}

/// Generation backend contract (enables mocking in tests).
#[async_trait::async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Run one generation.
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, BackendError>;

    /// Short name for logs ("openai", "scripted").
    fn name(&self) -> &'static str;
}

/// Estimate usage from whitespace word counts, for backends that do not
/// report it.
#[must_use]
pub fn estimate_usage(system_prompt: &str, user_input: &str, output: &str) -> Usage {
    let words = |s: &str| s.split_whitespace().count() as u64;
    Usage {
        prompt_tokens: words(system_prompt) + words(user_input),
        completion_tokens: words(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_usage_counts_words() {
        let usage = estimate_usage("Classify this.", "I forgot my password", "{\"a\": 1}");
        assert_eq!(usage.prompt_tokens, 6);
        assert_eq!(usage.completion_tokens, 2);
        assert_eq!(usage.total(), 8);
    }

    #[test]
    fn test_backend_error_classification() {
        let transient = BackendError::Transient {
            reason: "HTTP 503".to_string(),
        };
        assert!(transient.is_transient());
        assert_eq!(transient.reason(), "HTTP 503");
        assert!(
            !BackendError::Terminal {
                reason: "HTTP 400".to_string()
            }
            .is_transient()
        );
    }
}
