//! Errors surfaced by the CLI commands.
//!
//! Gateway outcomes (review, backend failure, ...) are not errors here: they
//! are printed and mapped to exit codes. `CliError` covers the cases where a
//! command could not run at all.

use std::path::PathBuf;

use modelgate_core::GatewayError;
use modelgate_core::audit::AuditError;
use modelgate_core::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Catalog could not be found, parsed or validated.
    #[error("catalog error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to read input from {}: {source}", path.display())]
    ReadInput {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("unknown use case '{name}' (available: {available})")]
    UnknownUseCase { name: String, available: String },

    #[error("use case '{use_case}' has no sample input")]
    NoSampleInput { use_case: String },

    /// Backend could not be constructed.
    #[error("backend setup failed: {reason}")]
    Backend { reason: String },

    #[error("audit log unavailable: {0}")]
    Audit(#[from] AuditError),

    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to encode metrics")]
    Metrics,

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
}
