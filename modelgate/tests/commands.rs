//! Command bodies driven directly, without spawning the binary.

use std::io::Write;
use std::path::PathBuf;

use modelgate::cli::{CheckConfigArgs, CliBackend, LogArgs, ProcessArgs, TokenizeArgs, UseCasesArgs};
use modelgate::error::CliError;
use modelgate::run::{
    EXIT_ACCEPTED, EXIT_GATEWAY_ERROR, EXIT_NEEDS_REVIEW, run_check_config, run_process,
    run_tokenize, run_use_cases,
};
use modelgate_core::config::{BUILTIN_CATALOG, ConfigError};
use tempfile::NamedTempFile;

fn catalog_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn process_args(catalog: &NamedTempFile, use_case: &str) -> ProcessArgs {
    ProcessArgs {
        use_case: use_case.to_string(),
        input: None,
        input_file: None,
        sample: true,
        catalog: Some(catalog.path().to_path_buf()),
        backend: CliBackend::Scripted,
        timeout_secs: None,
        force_fallback: false,
        reveal: false,
        metrics: false,
        log: LogArgs::default(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// process
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_process_sample_classifier_accepted() {
    let catalog = catalog_file(BUILTIN_CATALOG);
    let mut args = process_args(&catalog, "support_ticket_classifier");
    args.reveal = true;
    args.metrics = true;

    let code = run_process(args).await.unwrap();
    assert_eq!(code, EXIT_ACCEPTED);
}

#[tokio::test]
async fn test_process_extractor_needs_review() {
    let catalog = catalog_file(BUILTIN_CATALOG);
    let code = run_process(process_args(&catalog, "onboarding_document_extractor"))
        .await
        .unwrap();
    assert_eq!(code, EXIT_NEEDS_REVIEW);
}

#[tokio::test]
async fn test_process_unknown_use_case_is_gateway_error() {
    let catalog = catalog_file(BUILTIN_CATALOG);
    let mut args = process_args(&catalog, "weather_bot");
    args.sample = false;
    args.input = Some("Will it rain? Reply to jane@example.com".to_string());

    let code = run_process(args).await.unwrap();
    assert_eq!(code, EXIT_GATEWAY_ERROR);
}

#[tokio::test]
async fn test_process_sample_for_unknown_use_case_fails() {
    let catalog = catalog_file(BUILTIN_CATALOG);
    let err = run_process(process_args(&catalog, "weather_bot"))
        .await
        .unwrap_err();
    assert!(matches!(err, CliError::UnknownUseCase { .. }));
}

#[tokio::test]
async fn test_process_missing_input_file() {
    let catalog = catalog_file(BUILTIN_CATALOG);
    let mut args = process_args(&catalog, "employee_faq_bot");
    args.sample = false;
    args.input_file = Some(PathBuf::from("/nonexistent/modelgate/input.txt"));

    let err = run_process(args).await.unwrap_err();
    assert!(matches!(err, CliError::ReadInput { .. }));
}

// ─────────────────────────────────────────────────────────────────────────────
// tokenize
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_tokenize_from_file() {
    let input = catalog_file("Reach me at john.doe@example.com or 555-123-4567.");
    let args = TokenizeArgs {
        categories: Vec::new(),
        input: None,
        input_file: Some(input.path().to_path_buf()),
        show_originals: true,
        log: LogArgs::default(),
    };
    assert_eq!(run_tokenize(args).await.unwrap(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// use-cases / check-config
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_use_cases_lists_catalog() {
    let catalog = catalog_file(BUILTIN_CATALOG);
    let args = UseCasesArgs {
        catalog: Some(catalog.path().to_path_buf()),
        log: LogArgs::default(),
    };
    assert_eq!(run_use_cases(args).unwrap(), 0);
}

#[test]
fn test_check_config_valid_file() {
    let catalog = catalog_file(BUILTIN_CATALOG);
    let args = CheckConfigArgs {
        catalog: Some(catalog.path().to_path_buf()),
        log: LogArgs::default(),
    };
    assert_eq!(run_check_config(args).unwrap(), 0);
}

#[test]
fn test_check_config_empty_file() {
    let catalog = catalog_file("   \n");
    let args = CheckConfigArgs {
        catalog: Some(catalog.path().to_path_buf()),
        log: LogArgs::default(),
    };
    let err = run_check_config(args).unwrap_err();
    assert!(matches!(err, CliError::Config(ConfigError::EmptyConfigFile)));
}

#[test]
fn test_check_config_missing_explicit_path() {
    let args = CheckConfigArgs {
        catalog: Some(PathBuf::from("/nonexistent/modelgate/catalog.yaml")),
        log: LogArgs::default(),
    };
    let err = run_check_config(args).unwrap_err();
    assert!(matches!(
        err,
        CliError::Config(ConfigError::ConfigFileNotFound { .. })
    ));
}

#[test]
fn test_check_config_rejects_unknown_model() {
    let catalog = catalog_file(
        r#"
schema: 1
models:
  gpt-4o-mini:
    prompt_price_per_1k: 0.00015
    completion_price_per_1k: 0.0006
use_cases:
  faq:
    model: gpt-9
    system_prompt: Answer.
    output_schema:
      required: [answer]
      properties:
        answer: { type: string }
    confidence_threshold: 0.5
"#,
    );
    let args = CheckConfigArgs {
        catalog: Some(catalog.path().to_path_buf()),
        log: LogArgs::default(),
    };
    let err = run_check_config(args).unwrap_err();
    assert!(matches!(
        err,
        CliError::Config(ConfigError::UnknownModel { .. })
    ));
}
