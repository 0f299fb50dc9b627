//! Command bodies for the `modelgate` subcommands.
//!
//! Each returns the process exit code on success. `process` maps the gateway
//! outcome onto the code: 0 accepted, 2 needs review, 3 error outcome.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use modelgate_core::audit::{AuditSink, AuditSummary};
use modelgate_core::backend::{GenerationBackend, OpenAiBackend, OpenAiConfig, ScriptedBackend};
use modelgate_core::config::{
    ConfigError, ValidationResult, find_catalog_file, load_and_validate, load_builtin,
    load_or_builtin,
};
use modelgate_core::metrics::{GatewayMetrics, encode_registry};
use modelgate_core::pii::{DetectorSet, PiiCategory, Tokenizer};
use modelgate_core::vault::{MemoryVault, TokenVault};
use modelgate_core::{Gateway, GatewayError, GatewayOutcome, ProcessOptions, UseCaseCatalog};
use prometheus_client::registry::Registry;
use tokio_util::sync::CancellationToken;

use crate::cli::{CheckConfigArgs, CliBackend, ProcessArgs, TokenizeArgs, UseCasesArgs};
use crate::error::CliError;

/// Exit code for an accepted result.
pub const EXIT_ACCEPTED: i32 = 0;
/// Exit code when the result was routed to human review.
pub const EXIT_NEEDS_REVIEW: i32 = 2;
/// Exit code when the gateway returned an error outcome.
pub const EXIT_GATEWAY_ERROR: i32 = 3;

// ─────────────────────────────────────────────────────────────────────────────
// process
// ─────────────────────────────────────────────────────────────────────────────

/// Run one request through the gateway.
///
/// The response JSON goes to stdout; the audit summary (and metrics when
/// requested) go to stderr. Ctrl-C cancels the in-flight backend call and the
/// request still completes with an audited `cancelled` outcome.
///
/// # Errors
///
/// Fails only when the request could not be attempted: bad catalog, missing
/// sample input, backend setup failure, or output encoding failure.
pub async fn run_process(args: ProcessArgs) -> Result<i32, CliError> {
    let (catalog, _) = load_or_builtin(args.catalog.as_deref())?;

    let input = if args.sample {
        sample_input(&catalog, &args.use_case)?
    } else {
        read_input(args.input, args.input_file.as_deref())?
    };

    let backend = build_backend(args.backend)?;

    let mut registry = Registry::default();
    let mut gateway = Gateway::new(catalog, backend);
    if args.metrics {
        gateway = gateway.with_metrics(Arc::new(GatewayMetrics::new(&mut registry)));
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling in-flight request");
            on_interrupt.cancel();
        }
    });

    let opts = ProcessOptions {
        timeout: args.timeout_secs.map(Duration::from_secs),
        force_fallback: args.force_fallback,
    };
    let response = gateway
        .process_with(&args.use_case, &input, opts, &cancel)
        .await;
    interrupt.abort();

    let mut output = serde_json::to_value(&response)?;
    if args.reveal
        && let Some(value) = response.outcome.value()
    {
        let revealed = gateway.reveal(value).await?;
        if let Some(object) = output.as_object_mut() {
            object.insert("revealed".to_string(), revealed);
        }
    }
    println!("{}", serde_json::to_string_pretty(&output)?);

    let summary = gateway.audit().summary().await?;
    eprint!("{}", render_summary(&summary));

    if args.metrics {
        let text = encode_registry(&registry).map_err(|_| CliError::Metrics)?;
        eprint!("{text}");
    }

    Ok(exit_code(&response.outcome))
}

/// Map a gateway outcome to the process exit code.
#[must_use]
pub fn exit_code(outcome: &GatewayOutcome) -> i32 {
    match outcome {
        GatewayOutcome::Accepted { .. } => EXIT_ACCEPTED,
        GatewayOutcome::NeedsReview { .. } => EXIT_NEEDS_REVIEW,
        GatewayOutcome::Error { .. } => EXIT_GATEWAY_ERROR,
    }
}

fn build_backend(kind: CliBackend) -> Result<Arc<dyn GenerationBackend>, CliError> {
    match kind {
        CliBackend::Scripted => Ok(Arc::new(ScriptedBackend::demo())),
        CliBackend::Openai => {
            let config = OpenAiConfig::from_env()?;
            let backend = OpenAiBackend::new(config).map_err(|e| CliError::Backend {
                reason: e.to_string(),
            })?;
            Ok(Arc::new(backend))
        }
    }
}

fn sample_input(catalog: &UseCaseCatalog, use_case: &str) -> Result<String, CliError> {
    let policy = catalog
        .get(use_case)
        .ok_or_else(|| CliError::UnknownUseCase {
            name: use_case.to_string(),
            available: catalog.names().collect::<Vec<_>>().join(", "),
        })?;
    policy
        .sample_input
        .clone()
        .ok_or_else(|| CliError::NoSampleInput {
            use_case: use_case.to_string(),
        })
}

/// Two-line audit summary for stderr.
#[must_use]
pub fn render_summary(summary: &AuditSummary) -> String {
    let confidence = summary
        .average_confidence
        .map_or_else(|| "n/a".to_string(), |c| format!("{c:.2}"));
    format!(
        "audit: {} entries ({} accepted, {} review, {} failed, {} cancelled)\n\
         audit: total cost ${:.6}, avg confidence {}, avg latency {:.0} ms\n",
        summary.total,
        summary.accepted,
        summary.needs_review,
        summary.failed,
        summary.cancelled,
        summary.total_cost,
        confidence,
        summary.average_latency_ms,
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// tokenize
// ─────────────────────────────────────────────────────────────────────────────

/// Tokenize input with a fresh in-memory vault and print the result.
///
/// Originals are printed only with `--show-originals`.
///
/// # Errors
///
/// Input read failure or a vault error.
pub async fn run_tokenize(args: TokenizeArgs) -> Result<i32, CliError> {
    let text = read_input(args.input, args.input_file.as_deref())?;
    let categories: BTreeSet<PiiCategory> = if args.categories.is_empty() {
        PiiCategory::ALL.into_iter().collect()
    } else {
        args.categories.into_iter().collect()
    };

    let tokenizer = Tokenizer::new(DetectorSet::builtin(), Arc::new(MemoryVault::default()));
    let tokenized = tokenizer
        .tokenize(&text, &categories)
        .await
        .map_err(GatewayError::from)?;

    println!("{}", tokenized.text);

    let tokens = tokenized.distinct_tokens();
    if tokens.is_empty() {
        return Ok(0);
    }
    println!();
    for token in tokens {
        if args.show_originals {
            let original = tokenizer
                .vault()
                .resolve(token)
                .await
                .map_err(GatewayError::from)?;
            println!("{token}\t{}\t{original}", token.category());
        } else {
            println!("{token}\t{}", token.category());
        }
    }
    Ok(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// use-cases / check-config
// ─────────────────────────────────────────────────────────────────────────────

/// List the catalog's use cases.
///
/// # Errors
///
/// Catalog load failure.
pub fn run_use_cases(args: UseCasesArgs) -> Result<i32, CliError> {
    let (catalog, _) = load_or_builtin(args.catalog.as_deref())?;
    for policy in catalog.policies() {
        let route = match &policy.fallback_model {
            Some(fallback) => format!("{} -> {fallback}", policy.model),
            None => policy.model.clone(),
        };
        let pii = policy
            .pii_categories
            .iter()
            .map(PiiCategory::as_str)
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "{}\t{}\t{route}\tthreshold={:.2}\tpii=[{pii}]",
            policy.name, policy.display_name, policy.confidence_threshold
        );
    }
    Ok(0)
}

/// Validate the catalog and print its warnings.
///
/// With no explicit path and no catalog in the default locations, the
/// built-in catalog is checked.
///
/// # Errors
///
/// Any fatal validation error.
pub fn run_check_config(args: CheckConfigArgs) -> Result<i32, CliError> {
    let (source, (catalog, result)) = match find_catalog_file(args.catalog.as_deref()) {
        Ok(path) => (path.display().to_string(), load_and_validate(&path)?),
        Err(ConfigError::ConfigFileNotFound { .. }) if args.catalog.is_none() => {
            ("built-in catalog".to_string(), load_builtin()?)
        }
        Err(e) => return Err(e.into()),
    };

    print!("{}", render_check(&source, &catalog, &result));
    Ok(0)
}

fn render_check(source: &str, catalog: &UseCaseCatalog, result: &ValidationResult) -> String {
    let mut out = String::new();
    for warning in &result.warnings {
        out.push_str(&format!("warning: {warning}\n"));
    }
    out.push_str(&format!(
        "OK: {source}: {} use cases, {} models, {} warnings\n",
        catalog.use_cases.len(),
        catalog.models.len(),
        result.warnings.len(),
    ));
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Input
// ─────────────────────────────────────────────────────────────────────────────

/// Inline text wins; otherwise the file is read. Clap guarantees one is set.
fn read_input(input: Option<String>, file: Option<&Path>) -> Result<String, CliError> {
    if let Some(text) = input {
        return Ok(text);
    }
    let path = file.map(Path::to_path_buf).unwrap_or_default();
    std::fs::read_to_string(&path).map_err(|source| CliError::ReadInput {
        path: path.clone(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelgate_core::config::load_from_str;
    use serde_json::json;

    #[test]
    fn test_exit_codes() {
        let accepted = GatewayOutcome::Accepted { value: json!({}) };
        assert_eq!(exit_code(&accepted), EXIT_ACCEPTED);

        let error = GatewayOutcome::Error {
            kind: "backend_terminal".to_string(),
            message: "boom".to_string(),
            details: None,
        };
        assert_eq!(exit_code(&error), EXIT_GATEWAY_ERROR);
    }

    #[test]
    fn test_render_summary_without_confidence() {
        let summary = AuditSummary {
            total: 2,
            failed: 2,
            ..AuditSummary::default()
        };
        let text = render_summary(&summary);
        assert!(text.contains("2 entries"));
        assert!(text.contains("2 failed"));
        assert!(text.contains("avg confidence n/a"));
    }

    #[test]
    fn test_read_input_prefers_inline_text() {
        let text = read_input(Some("hello".to_string()), Some(Path::new("/nonexistent"))).unwrap();
        assert_eq!(text, "hello");
    }

    #[test]
    fn test_read_input_missing_file() {
        let err = read_input(None, Some(Path::new("/nonexistent/modelgate-input.txt"))).unwrap_err();
        assert!(matches!(err, CliError::ReadInput { .. }));
    }

    #[test]
    fn test_sample_input_unknown_use_case_lists_available() {
        let (catalog, _) = load_builtin().unwrap();
        let err = sample_input(&catalog, "nope").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("support_ticket_classifier"), "{message}");
    }

    #[test]
    fn test_render_check_counts() {
        let (catalog, result) = load_from_str(modelgate_core::config::BUILTIN_CATALOG).unwrap();
        let text = render_check("built-in catalog", &catalog, &result);
        assert!(text.contains("OK: built-in catalog: 3 use cases"));
    }
}
