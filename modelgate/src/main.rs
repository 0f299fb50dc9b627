//! ModelGate CLI entry point.
//!
//! Dispatches to `process` (one request through the gateway), `tokenize`
//! (PII tokenization only), `use-cases` and `check-config`.

use clap::{Parser, Subcommand};

use modelgate::cli::{CheckConfigArgs, LogArgs, ProcessArgs, TokenizeArgs, UseCasesArgs};
use modelgate::error::CliError;
use modelgate::run;

// ─────────────────────────────────────────────────────────────────────────────
// CLI Definitions
// ─────────────────────────────────────────────────────────────────────────────

/// ModelGate: PII-safe gateway for generative-model calls.
#[derive(Parser)]
#[command(name = "modelgate", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one request through tokenization, routing, validation and gating.
    Process(ProcessArgs),
    /// Replace sensitive values with vault tokens and print the mapping.
    Tokenize(TokenizeArgs),
    /// List the use cases in the catalog.
    UseCases(UseCasesArgs),
    /// Validate a catalog file and print its warnings.
    CheckConfig(CheckConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry Point
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Process(args) => {
            init_tracing(args.log);
            report("process", run::run_process(args).await)
        }
        Commands::Tokenize(args) => {
            init_tracing(args.log);
            report("tokenize", run::run_tokenize(args).await)
        }
        Commands::UseCases(args) => {
            init_tracing(args.log);
            report("use-cases", run::run_use_cases(args))
        }
        Commands::CheckConfig(args) => {
            init_tracing(args.log);
            report("check-config", run::run_check_config(args))
        }
    };

    std::process::exit(code);
}

/// Exit code for a finished command; failures are logged and printed.
fn report(command: &str, result: Result<i32, CliError>) -> i32 {
    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, command, "command failed");
            eprintln!("modelgate {command}: {e}");
            1
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tracing Init
// ─────────────────────────────────────────────────────────────────────────────

/// Initialise tracing subscriber with stderr output.
///
/// `--verbose` sets the filter to `debug`. Otherwise `RUST_LOG` is respected
/// (defaulting to no output). `--log-json` switches to JSON lines.
fn init_tracing(log: LogArgs) {
    use tracing_subscriber::EnvFilter;

    let filter = if log.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if log.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}
