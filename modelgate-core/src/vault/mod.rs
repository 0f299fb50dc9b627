//! Sensitive-data vault.
//!
//! The vault owns every mapping from an opaque [`PiiToken`] to the value it
//! replaced. Callers only ever see tokens; originals leave the vault through
//! [`TokenVault::resolve`] alone.
//!
//! The trait is the storage seam: [`MemoryVault`] keeps records for the
//! process lifetime (with optional TTL), and a durable backend can implement
//! the same contract without the tokenizer or gateway noticing.

mod memory;
mod token;

pub use memory::MemoryVault;
pub use token::{PiiToken, TOKEN_ID_LEN, TOKEN_PREFIX, TokenError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::pii::PiiCategory;

// ============================================================================
// Records
// ============================================================================

/// One stored mapping. Owned by the vault.
#[derive(Debug, Clone, Serialize)]
pub struct TokenRecord {
    pub token: PiiToken,
    /// Never serialized and not readable outside the crate; originals leave
    /// the vault only through `resolve`.
    #[serde(skip)]
    pub(crate) original: String,
    pub category: PiiCategory,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    /// Returns true once the record's TTL has elapsed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Vault operation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VaultError {
    /// The token is unknown, expired or evicted. Never swallowed: it means
    /// either a forged token or a record past its retention.
    #[error("token '{token}' not found in vault")]
    NotFound { token: String },

    /// Could not mint a token that is unique among live records.
    #[error("could not mint a unique token for category '{category}'")]
    Collision { category: PiiCategory },

    /// Backend storage failure.
    #[error("vault storage error: {details}")]
    Storage { details: String },
}

// ============================================================================
// Trait
// ============================================================================

/// Storage contract for token records.
///
/// Implementations must serialize writes per record and keep token strings
/// unique across live records, while letting reads proceed concurrently.
#[async_trait::async_trait]
pub trait TokenVault: Send + Sync {
    /// Store `original` under a token for `category` and return the token.
    ///
    /// Storing the same value twice may return the same token or a new one;
    /// either way every returned token resolves back to `original`.
    async fn store(&self, category: PiiCategory, original: &str) -> Result<PiiToken, VaultError>;

    /// Resolve a token to its original value.
    async fn resolve(&self, token: &PiiToken) -> Result<String, VaultError>;

    /// Remove a record. Returns whether it existed.
    async fn evict(&self, token: &PiiToken) -> Result<bool, VaultError>;

    /// Drop every record whose TTL has elapsed. Returns the number removed.
    async fn purge_expired(&self) -> Result<usize, VaultError>;

    /// Number of stored records, expired ones included until purged.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serialization_omits_original() {
        let record = TokenRecord {
            token: PiiToken::mint(PiiCategory::Iban),
            original: "DE89370400440532013000".to_string(),
            category: PiiCategory::Iban,
            created_at: Utc::now(),
            expires_at: None,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("DE89370400440532013000"), "{json}");
        assert!(json.contains(record.token.as_str()));
    }
}
