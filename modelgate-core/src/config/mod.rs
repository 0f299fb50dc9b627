//! Use-case catalog configuration.
//!
//! This module provides:
//! - YAML catalog parsing
//! - Environment variable substitution
//! - Load-time validation of models, policies and output schemas
//! - Runtime defaults (timeouts, token retention)
//!
//! # Example
//!
//! ```ignore
//! use modelgate_core::config::load_or_builtin;
//!
//! let (catalog, result) = load_or_builtin(None)?;
//! for warning in &result.warnings {
//!     eprintln!("warning: {warning}");
//! }
//! let policy = catalog.get("support_ticket_classifier");
//! ```

mod defaults;
mod duration_format;
mod error;
mod loader;
mod schema;

pub use defaults::GatewayDefaults;
pub use duration_format::parse_duration;
pub use error::{ConfigError, ValidationResult, ValidationWarning};
pub use loader::{
    BUILTIN_CATALOG, build_catalog, default_catalog_paths, find_catalog_file, load_and_validate,
    load_builtin, load_catalog_file, load_from_str, load_or_builtin, parse_catalog,
    substitute_env_vars, validate,
};
pub use schema::{CatalogFile, DefaultsSection, ModelEntry, UseCaseEntry};
