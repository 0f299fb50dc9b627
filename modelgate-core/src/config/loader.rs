//! Catalog loading and validation.
//!
//! Flow: locate file, read, substitute `${VAR}`s, parse YAML, validate, then
//! build the typed [`UseCaseCatalog`]. Every malformed policy is rejected
//! here, before any request can use it.

use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use super::defaults::GatewayDefaults;
use super::error::{ConfigError, ValidationResult, ValidationWarning};
use super::schema::{CatalogFile, UseCaseEntry};
use crate::models::{ModelCatalog, ModelFamily, ModelSpec, Pricing};
use crate::pii::PiiCategory;
use crate::policy::{DEFAULT_CONFIDENCE_FIELD, FieldType, UseCaseCatalog, UseCasePolicy};

/// Catalog shipped with the crate.
pub const BUILTIN_CATALOG: &str = include_str!("../../catalog/use_cases.yaml");

/// Catalog file search paths (in priority order), after an explicit path.
pub fn default_catalog_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(path) = std::env::var("MODELGATE_CATALOG") {
        paths.push(PathBuf::from(path));
    }

    paths.push(PathBuf::from("/etc/modelgate/catalog.yaml"));
    paths.push(PathBuf::from("./catalog.yaml"));

    paths
}

/// Find the first existing catalog file.
///
/// An explicit path must exist; otherwise the default paths are searched.
pub fn find_catalog_file(explicit_path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit_path {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(ConfigError::ConfigFileNotFound {
            searched: vec![path.to_path_buf()],
        });
    }

    let paths = default_catalog_paths();
    for path in &paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    Err(ConfigError::ConfigFileNotFound { searched: paths })
}

/// Read and parse a catalog file without validating it.
pub fn load_catalog_file(path: &Path) -> Result<CatalogFile, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_catalog(&contents)
}

/// Parse catalog YAML (with env substitution) without validating it.
pub fn parse_catalog(contents: &str) -> Result<CatalogFile, ConfigError> {
    if contents.trim().is_empty() {
        return Err(ConfigError::EmptyConfigFile);
    }

    let contents = substitute_env_vars(contents)?;
    let file: CatalogFile = serde_saphyr::from_str(&contents)?;
    Ok(file)
}

/// Load, validate and build the catalog at `path`.
pub fn load_and_validate(path: &Path) -> Result<(UseCaseCatalog, ValidationResult), ConfigError> {
    let file = load_catalog_file(path)?;
    finish(file)
}

/// Load, validate and build a catalog from YAML text.
pub fn load_from_str(contents: &str) -> Result<(UseCaseCatalog, ValidationResult), ConfigError> {
    let file = parse_catalog(contents)?;
    finish(file)
}

/// The built-in catalog with the three reference use cases.
pub fn load_builtin() -> Result<(UseCaseCatalog, ValidationResult), ConfigError> {
    load_from_str(BUILTIN_CATALOG)
}

/// Resolve the catalog the way the CLI does: an explicit path must load; with
/// no explicit path the default locations are searched and the built-in
/// catalog is used when none exists.
pub fn load_or_builtin(
    explicit_path: Option<&Path>,
) -> Result<(UseCaseCatalog, ValidationResult), ConfigError> {
    match find_catalog_file(explicit_path) {
        Ok(path) => {
            tracing::info!(path = %path.display(), "Loading catalog");
            load_and_validate(&path)
        }
        Err(ConfigError::ConfigFileNotFound { searched }) if explicit_path.is_none() => {
            tracing::debug!(?searched, "No catalog file found, using built-in catalog");
            load_builtin()
        }
        Err(e) => Err(e),
    }
}

fn finish(file: CatalogFile) -> Result<(UseCaseCatalog, ValidationResult), ConfigError> {
    let result = validate(&file)?;
    for warning in &result.warnings {
        tracing::warn!(%warning, "Catalog validation warning");
    }
    let catalog = build_catalog(file)?;
    Ok((catalog, result))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment Variable Substitution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

// SAFETY: .expect() on LazyLock with a compile-time literal regex pattern.
// The pattern is known-valid and tested by test_env_var_pattern_compiles().
static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("BUG: ENV_VAR_PATTERN regex is invalid")
});

/// Substitute environment variables in catalog text.
///
/// # Syntax
/// - `${VAR}` - Required, fail if not set
/// - `${VAR:-default}` - Optional with default
pub fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let mut missing = None;

    let result = ENV_VAR_PATTERN.replace_all(content, |cap: &regex::Captures<'_>| {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(value) => value,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                None => {
                    missing.get_or_insert_with(|| var_name.to_string());
                    String::new()
                }
            },
        }
    });

    if let Some(var) = missing {
        return Err(ConfigError::MissingEnvVar {
            var,
            field: "catalog".to_string(),
        });
    }

    Ok(result.into_owned())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate a parsed catalog. Errors are fatal; warnings are returned.
pub fn validate(file: &CatalogFile) -> Result<ValidationResult, ConfigError> {
    let mut warnings = Vec::new();

    if file.schema != 1 {
        return Err(ConfigError::UnsupportedSchemaVersion {
            version: file.schema,
        });
    }

    if file.use_cases.is_empty() {
        return Err(ConfigError::NoUseCases);
    }

    for (id, model) in &file.models {
        let prices = [model.prompt_price_per_1k, model.completion_price_per_1k];
        if prices.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(ConfigError::InvalidPrice { model: id.clone() });
        }
    }

    let models = build_models(file);

    for (name, entry) in &file.use_cases {
        validate_use_case(name, entry, &models, &mut warnings)?;
    }

    Ok(ValidationResult::with_warnings(warnings))
}

fn validate_use_case(
    name: &str,
    entry: &UseCaseEntry,
    models: &ModelCatalog,
    warnings: &mut Vec<ValidationWarning>,
) -> Result<(), ConfigError> {
    let use_case = || name.to_string();

    // Models
    let mut routed = vec![entry.model.as_str()];
    if let Some(fallback) = &entry.fallback_model {
        routed.push(fallback.as_str());
        if *fallback == entry.model {
            warnings.push(ValidationWarning::FallbackSameAsPrimary {
                use_case: use_case(),
            });
        }
    }
    for model in &routed {
        if model.trim().is_empty() {
            return Err(ConfigError::EmptyModelId {
                use_case: use_case(),
            });
        }
        if !models.contains(model) {
            return Err(ConfigError::UnknownModel {
                use_case: use_case(),
                model: model.to_string(),
            });
        }
    }

    // Threshold and prompt
    let threshold = entry.confidence_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ConfigError::InvalidThreshold {
            use_case: use_case(),
            threshold,
        });
    }
    if entry.system_prompt.trim().is_empty() {
        return Err(ConfigError::EmptySystemPrompt {
            use_case: use_case(),
        });
    }

    // PII categories
    for category in &entry.pii_categories {
        if category.parse::<PiiCategory>().is_err() {
            return Err(ConfigError::UnknownPiiCategory {
                use_case: use_case(),
                category: category.clone(),
            });
        }
    }

    // Invocation params
    for (param, value) in &entry.invocation_params {
        if value.is_object() || value.is_array() || value.is_null() {
            return Err(ConfigError::NonScalarParam {
                use_case: use_case(),
                param: param.clone(),
            });
        }
        let supported = routed.iter().filter_map(|m| models.get(m)).any(|m| {
            m.supports(param) || (param == "max_tokens" && m.supports("max_completion_tokens"))
        });
        if !supported {
            warnings.push(ValidationWarning::ParamUnsupportedByAllModels {
                use_case: use_case(),
                param: param.clone(),
            });
        }
    }

    // Output schema
    let schema = &entry.output_schema;
    for field in &schema.required {
        if !schema.properties.contains_key(field) {
            return Err(ConfigError::UndeclaredRequiredField {
                use_case: use_case(),
                field: field.clone(),
            });
        }
    }
    for (field, spec) in &schema.properties {
        let field_err = || field.clone();
        if spec.allowed.is_some() && spec.field_type != FieldType::String {
            return Err(ConfigError::EnumOnNonString {
                use_case: use_case(),
                field: field_err(),
            });
        }
        let has_bounds = spec.minimum.is_some() || spec.maximum.is_some();
        if has_bounds && !spec.field_type.is_numeric() {
            return Err(ConfigError::BoundsOnNonNumeric {
                use_case: use_case(),
                field: field_err(),
            });
        }
        let non_finite = [spec.minimum, spec.maximum]
            .iter()
            .flatten()
            .any(|b| !b.is_finite());
        let inverted = matches!((spec.minimum, spec.maximum), (Some(lo), Some(hi)) if lo > hi);
        if non_finite || inverted {
            return Err(ConfigError::InvalidBounds {
                use_case: use_case(),
                field: field_err(),
            });
        }
    }

    let confidence_field = entry
        .confidence_field
        .as_deref()
        .unwrap_or(DEFAULT_CONFIDENCE_FIELD);
    if threshold > 0.0 && !schema.properties.contains_key(confidence_field) {
        warnings.push(ValidationWarning::ThresholdWithoutConfidenceProperty {
            use_case: use_case(),
            field: confidence_field.to_string(),
        });
    }

    if let Some(flag) = &entry.human_review_flag
        && !schema.properties.contains_key(flag)
    {
        warnings.push(ValidationWarning::ReviewFlagNotInSchema {
            use_case: use_case(),
            field: flag.clone(),
        });
    }

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Building
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn build_models(file: &CatalogFile) -> ModelCatalog {
    let mut models = ModelCatalog::new();
    for (id, entry) in &file.models {
        let family = entry.family.unwrap_or_else(|| ModelFamily::infer(id));
        let mut spec = ModelSpec::new(
            id.clone(),
            family,
            Pricing {
                prompt_per_1k: entry.prompt_price_per_1k,
                completion_per_1k: entry.completion_price_per_1k,
            },
        );
        if let Some(params) = &entry.supported_params {
            spec.supported_params = params.iter().cloned().collect();
        }
        models.insert(spec);
    }
    models
}

/// Turn a validated catalog file into the runtime catalog.
///
/// Defaults are layered: built-in, then the file's `defaults:`, then env.
pub fn build_catalog(file: CatalogFile) -> Result<UseCaseCatalog, ConfigError> {
    let models = build_models(&file);

    let mut defaults = GatewayDefaults::default();
    if let Some(timeout) = file.defaults.invocation_timeout {
        defaults.invocation_timeout = timeout;
    }
    if let Some(ttl) = file.defaults.token_ttl {
        defaults.token_ttl = (!ttl.is_zero()).then_some(ttl);
    }
    let defaults = defaults.with_env_overrides();
    defaults
        .validate()
        .map_err(|message| ConfigError::InvalidDefaults { message })?;

    let mut catalog = UseCaseCatalog::new(models, defaults);
    for (name, entry) in file.use_cases {
        let pii_categories = entry
            .pii_categories
            .iter()
            .map(|c| {
                c.parse::<PiiCategory>()
                    .map_err(|_| ConfigError::UnknownPiiCategory {
                        use_case: name.clone(),
                        category: c.clone(),
                    })
            })
            .collect::<Result<BTreeSet<_>, _>>()?;

        let policy = UseCasePolicy {
            display_name: entry.display_name.unwrap_or_else(|| name.clone()),
            model: entry.model,
            fallback_model: entry.fallback_model,
            invocation_params: entry.invocation_params,
            system_prompt: entry.system_prompt,
            output_schema: entry.output_schema,
            pii_categories,
            confidence_threshold: entry.confidence_threshold,
            confidence_field: entry
                .confidence_field
                .unwrap_or_else(|| DEFAULT_CONFIDENCE_FIELD.to_string()),
            human_review_flag: entry.human_review_flag,
            escalate_above_words: entry.escalate_above_words,
            sample_input: entry.sample_input,
            name,
        };
        catalog = catalog.with_policy(policy);
    }

    Ok(catalog)
}
