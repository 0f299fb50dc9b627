//! CLI argument types for the `modelgate` subcommands.
//!
//! Defined separately from `main.rs` so integration tests can parse them
//! directly.

use std::path::PathBuf;

use clap::{ArgGroup, Args, ValueEnum};
use modelgate_core::pii::PiiCategory;

// ─────────────────────────────────────────────────────────────────────────────
// Shared Args
// ─────────────────────────────────────────────────────────────────────────────

/// Logging flags accepted by every subcommand.
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct LogArgs {
    /// Enable debug logging (overrides RUST_LOG).
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Process Subcommand Args
// ─────────────────────────────────────────────────────────────────────────────

/// Arguments for `modelgate process`.
///
/// Runs one request through the full pipeline and prints the response as
/// JSON on stdout. The audit summary goes to stderr.
#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .args(["input", "input_file", "sample"])
))]
pub struct ProcessArgs {
    /// Use case to run.
    #[arg(long)]
    pub use_case: String,

    /// Raw input text.
    #[arg(long)]
    pub input: Option<String>,

    /// Read the input from a file.
    #[arg(long)]
    pub input_file: Option<PathBuf>,

    /// Use the use case's sample input.
    #[arg(long)]
    pub sample: bool,

    /// Catalog file. Defaults to MODELGATE_CATALOG, then the standard
    /// locations, then the built-in catalog.
    #[arg(long, env = "MODELGATE_CATALOG")]
    pub catalog: Option<PathBuf>,

    /// Generation backend.
    #[arg(long, value_enum, default_value = "scripted")]
    pub backend: CliBackend,

    /// Per-call backend timeout in seconds (catalog default when omitted).
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Send the first attempt to the fallback model.
    #[arg(long)]
    pub force_fallback: bool,

    /// Also print the detokenized result.
    #[arg(long)]
    pub reveal: bool,

    /// Print Prometheus metrics to stderr after the request.
    #[arg(long)]
    pub metrics: bool,

    #[command(flatten)]
    pub log: LogArgs,
}

/// Which generation backend `process` talks to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum CliBackend {
    /// Deterministic canned responses for the built-in use cases.
    #[default]
    Scripted,
    /// OpenAI-compatible chat completions endpoint (MODELGATE_OPENAI_*).
    Openai,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tokenize Subcommand Args
// ─────────────────────────────────────────────────────────────────────────────

/// Arguments for `modelgate tokenize`.
#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .args(["input", "input_file"])
))]
pub struct TokenizeArgs {
    /// Categories to detect, comma separated. All when omitted.
    #[arg(long, value_delimiter = ',')]
    pub categories: Vec<PiiCategory>,

    #[arg(long)]
    pub input: Option<String>,

    #[arg(long)]
    pub input_file: Option<PathBuf>,

    /// Print the original value next to each token.
    #[arg(long)]
    pub show_originals: bool,

    #[command(flatten)]
    pub log: LogArgs,
}

// ─────────────────────────────────────────────────────────────────────────────
// Catalog Subcommand Args
// ─────────────────────────────────────────────────────────────────────────────

/// Arguments for `modelgate use-cases`.
#[derive(Args, Debug)]
pub struct UseCasesArgs {
    #[arg(long, env = "MODELGATE_CATALOG")]
    pub catalog: Option<PathBuf>,

    #[command(flatten)]
    pub log: LogArgs,
}

/// Arguments for `modelgate check-config`.
#[derive(Args, Debug)]
pub struct CheckConfigArgs {
    #[arg(long, env = "MODELGATE_CATALOG")]
    pub catalog: Option<PathBuf>,

    #[command(flatten)]
    pub log: LogArgs,
}
