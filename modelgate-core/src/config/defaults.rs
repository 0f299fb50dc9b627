//! Runtime defaults for the gateway.
//!
//! Precedence: built-in values, then the catalog's `defaults:` section, then
//! environment variables.

use std::time::Duration;
use tracing::warn;

/// Timeouts and retention applied to every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayDefaults {
    /// Per-call budget for one backend invocation. Timing out counts as a
    /// transient failure.
    pub invocation_timeout: Duration,

    /// Lifetime of vault records. `None` keeps them for the process lifetime.
    pub token_ttl: Option<Duration>,
}

impl Default for GatewayDefaults {
    fn default() -> Self {
        Self {
            invocation_timeout: Duration::from_secs(30),
            token_ttl: Some(Duration::from_secs(86400)), // 24 hours
        }
    }
}

impl GatewayDefaults {
    /// Built-in defaults with environment overrides applied.
    ///
    /// # Environment Variables
    /// - `MODELGATE_INVOCATION_TIMEOUT_SECS`
    /// - `MODELGATE_TOKEN_TTL_SECS` (`0` disables expiry)
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply environment overrides on top of `self`.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        let invocation_timeout = Duration::from_secs(parse_env_warn(
            "MODELGATE_INVOCATION_TIMEOUT_SECS",
            self.invocation_timeout.as_secs(),
        ));

        let current_ttl = self.token_ttl.map_or(0, |d| d.as_secs());
        let ttl_secs = parse_env_warn("MODELGATE_TOKEN_TTL_SECS", current_ttl);
        let token_ttl = (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs));

        Self {
            invocation_timeout,
            token_ttl,
        }
    }

    /// Validate the defaults satisfy invariants.
    ///
    /// # Invariants
    /// 1. `invocation_timeout` > 0
    /// 2. `token_ttl`, when set, is > 0
    pub fn validate(&self) -> Result<(), String> {
        if self.invocation_timeout.is_zero() {
            return Err("invocation_timeout must be greater than zero".to_string());
        }

        if self.token_ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err("token_ttl must be greater than zero when set".to_string());
        }

        Ok(())
    }
}

/// Parse an environment variable with a warning on invalid values.
fn parse_env_warn<T: std::str::FromStr + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(val) => match val.parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(
                    env_var = name,
                    value = %val,
                    default = %default,
                    "Invalid value for environment variable, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}
