//! ModelGate Core: PII-safe mediation of generative-model calls.
//!
//! Every request runs one pipeline: sensitive values are swapped for
//! vault-backed tokens, a model is chosen per use-case policy, the backend is
//! invoked under a timeout, the output is validated against the use case's
//! schema, a confidence gate decides between acceptance and human review, and
//! exactly one audit entry is written.
//!
//! The pieces are usable on their own:
//! - [`vault`]: token vault trait and the in-memory store
//! - [`pii`]: category detectors and the tokenizer
//! - [`router`]: model selection and parameter filtering
//! - [`backend`]: generation backend contract and adapters
//! - [`validator`] / [`gate`]: output acceptance
//! - [`audit`]: append-only audit sink
//! - [`gateway`]: the orchestrator tying it together

pub mod audit;
pub mod backend;
pub mod config;
pub mod error;
pub mod gate;
pub mod gateway;
pub mod metrics;
pub mod models;
pub mod pii;
pub mod policy;
pub mod router;
pub mod validator;
pub mod vault;

pub use error::GatewayError;
pub use gateway::{Gateway, GatewayOutcome, GatewayResponse, ProcessOptions};
pub use policy::{UseCaseCatalog, UseCasePolicy};
