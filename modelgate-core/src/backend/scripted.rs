//! Deterministic backend for demos and tests.
//!
//! Replies come from per-use-case responders. A queue of [`ScriptStep`]s can
//! be pushed in front of them to inject failures and delays; each call
//! consumes one step.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::json;

use super::{
    BackendError, GenerationBackend, GenerationRequest, GenerationResult, estimate_usage,
};
use crate::pii::{PiiCategory, find_tokens};
use crate::vault::PiiToken;

/// One scripted outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// Return this raw output.
    Reply(String),
    Transient(String),
    Terminal(String),
    /// Sleep, then answer from the responders.
    Stall(Duration),
}

type Responder = Arc<dyn Fn(&GenerationRequest) -> String + Send + Sync>;

/// Canned-response backend.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<ScriptStep>>,
    responders: BTreeMap<String, Responder>,
    latency: Duration,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl std::fmt::Debug for ScriptedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedBackend")
            .field("script_len", &self.script.lock().len())
            .field("responders", &self.responders.keys().collect::<Vec<_>>())
            .field("latency", &self.latency)
            .finish()
    }
}

impl ScriptedBackend {
    /// A backend with no responders; every call needs a scripted step.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Responders for the three built-in use cases.
    #[must_use]
    pub fn demo() -> Self {
        Self::new()
            .with_reply("support_ticket_classifier", CLASSIFICATION_REPLY)
            .with_responder("onboarding_document_extractor", extraction_reply)
            .with_reply("employee_faq_bot", QA_REPLY)
    }

    /// Always answer `use_case` with `output`.
    #[must_use]
    pub fn with_reply(self, use_case: impl Into<String>, output: impl Into<String>) -> Self {
        let output = output.into();
        self.with_responder(use_case, move |_| output.clone())
    }

    /// Answer `use_case` by calling `f` with the request.
    #[must_use]
    pub fn with_responder<F>(mut self, use_case: impl Into<String>, f: F) -> Self
    where
        F: Fn(&GenerationRequest) -> String + Send + Sync + 'static,
    {
        self.responders.insert(use_case.into(), Arc::new(f));
        self
    }

    /// Simulated processing time added to every successful reply.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue steps consumed in order before falling back to responders.
    pub fn push_steps(&self, steps: impl IntoIterator<Item = ScriptStep>) {
        self.script.lock().extend(steps);
    }

    /// Requests received so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn respond(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        self.responders
            .get(&request.use_case)
            .map(|f| f(request))
            .ok_or_else(|| BackendError::Terminal {
                reason: format!("no scripted response for use case '{}'", request.use_case),
            })
    }
}

#[async_trait::async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, BackendError> {
        let started = Instant::now();
        self.calls.lock().push(request.clone());

        let step = self.script.lock().pop_front();
        let output = match step {
            Some(ScriptStep::Reply(output)) => output,
            Some(ScriptStep::Transient(reason)) => return Err(BackendError::Transient { reason }),
            Some(ScriptStep::Terminal(reason)) => return Err(BackendError::Terminal { reason }),
            Some(ScriptStep::Stall(delay)) => {
                tokio::time::sleep(delay).await;
                self.respond(request)?
            }
            None => self.respond(request)?,
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        Ok(GenerationResult {
            usage: estimate_usage(&request.system_prompt, &request.user_input, &output),
            output,
            latency: started.elapsed(),
            model: request.model.clone(),
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

const CLASSIFICATION_REPLY: &str = r#"{
  "category": "account_support",
  "confidence": 0.92,
  "reasoning": "User mentions password issues which typically fall under account support"
}"#;

const QA_REPLY: &str = r#"{
  "answer": "Scalable Capital offers 12 weeks of paid parental leave for primary caregivers and 4 weeks for secondary caregivers, in accordance with German law.",
  "source": "employee_handbook_section_4.2",
  "confidence": 0.87,
  "requires_human_review": false
}"#;

/// Echo the first email and IBAN tokens found in the input.
fn extraction_reply(request: &GenerationRequest) -> String {
    let first = |category: PiiCategory| {
        find_tokens(&request.user_input)
            .filter_map(|span| PiiToken::parse(&request.user_input[span]).ok())
            .find(|token| token.category() == category)
            .map(|token| token.to_string())
    };

    let reply = json!({
        "name": "John Smith",
        "email": first(PiiCategory::Email),
        "iban": first(PiiCategory::Iban),
        "risk_score": "low",
        "nationality": "German",
    });
    reply.to_string()
}
