//! In-memory token vault with concurrent access support.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{PiiToken, TokenRecord, TokenVault, VaultError};
use crate::pii::PiiCategory;

/// Attempts at drawing a fresh token before reporting a collision.
const MAX_MINT_ATTEMPTS: usize = 8;

type Fingerprint = [u8; 32];

/// In-memory vault.
///
/// Records live in a sharded map keyed by token string, so unrelated
/// requests never contend on one lock. A second index keyed by a salted
/// SHA-256 fingerprint of `(category, value)` gives each distinct value a
/// single live token, which keeps tokenized text stable across requests.
/// The salt is drawn per vault, so fingerprints are useless outside it.
///
/// Lock order is always fingerprint index, then records.
pub struct MemoryVault {
    records: DashMap<String, TokenRecord>,
    by_fingerprint: DashMap<Fingerprint, PiiToken>,
    salt: [u8; 32],
    ttl: Option<Duration>,
    minted: AtomicU64,
}

impl std::fmt::Debug for MemoryVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryVault")
            .field("records", &self.records.len())
            .field("ttl", &self.ttl)
            .field("minted", &self.minted.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for MemoryVault {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MemoryVault {
    /// Creates a vault. `ttl = None` keeps records until evicted.
    #[must_use]
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            records: DashMap::new(),
            by_fingerprint: DashMap::new(),
            salt: rand::rng().random(),
            ttl,
            minted: AtomicU64::new(0),
        }
    }

    /// Creates a vault whose records expire after `ttl`.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self::new(Some(ttl))
    }

    /// Total tokens minted since creation (reused tokens not counted).
    #[must_use]
    pub fn minted_count(&self) -> u64 {
        self.minted.load(Ordering::Acquire)
    }

    fn fingerprint(&self, category: PiiCategory, original: &str) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(self.salt);
        hasher.update(category.tag().as_bytes());
        hasher.update([0u8]);
        hasher.update(original.as_bytes());
        hasher.finalize().into()
    }

    /// Mint a token and insert its record, retrying on collision with a live
    /// record.
    fn insert_fresh(&self, category: PiiCategory, original: &str) -> Result<PiiToken, VaultError> {
        let now = Utc::now();
        let expires_at = self
            .ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| now + ttl);

        for _ in 0..MAX_MINT_ATTEMPTS {
            let token = PiiToken::mint(category);
            match self.records.entry(token.as_str().to_string()) {
                Entry::Occupied(_) => {
                    warn!(category = %category, "Token collision on mint, redrawing");
                    continue;
                }
                Entry::Vacant(slot) => {
                    slot.insert(TokenRecord {
                        token: token.clone(),
                        original: original.to_string(),
                        category,
                        created_at: now,
                        expires_at,
                    });
                    self.minted.fetch_add(1, Ordering::AcqRel);
                    return Ok(token);
                }
            }
        }

        Err(VaultError::Collision { category })
    }

    fn is_live(&self, token: &PiiToken) -> bool {
        let now = Utc::now();
        self.records
            .get(token.as_str())
            .is_some_and(|record| !record.is_expired(now))
    }
}

#[async_trait::async_trait]
impl TokenVault for MemoryVault {
    async fn store(&self, category: PiiCategory, original: &str) -> Result<PiiToken, VaultError> {
        let fingerprint = self.fingerprint(category, original);

        // The fingerprint entry guard serializes concurrent stores of the same
        // value, so two requests never mint two tokens for it at once.
        match self.by_fingerprint.entry(fingerprint) {
            Entry::Occupied(mut existing) => {
                if self.is_live(existing.get()) {
                    debug!(category = %category, token = %existing.get(), "Reusing vault token");
                    return Ok(existing.get().clone());
                }
                let token = self.insert_fresh(category, original)?;
                existing.insert(token.clone());
                Ok(token)
            }
            Entry::Vacant(slot) => {
                let token = self.insert_fresh(category, original)?;
                slot.insert(token.clone());
                Ok(token)
            }
        }
    }

    async fn resolve(&self, token: &PiiToken) -> Result<String, VaultError> {
        let now = Utc::now();
        match self.records.get(token.as_str()) {
            Some(record) if !record.is_expired(now) => Ok(record.original.clone()),
            Some(_) => {
                debug!(token = %token, "Vault token expired");
                Err(VaultError::NotFound {
                    token: token.to_string(),
                })
            }
            None => Err(VaultError::NotFound {
                token: token.to_string(),
            }),
        }
    }

    async fn evict(&self, token: &PiiToken) -> Result<bool, VaultError> {
        let Some((_, record)) = self.records.remove(token.as_str()) else {
            return Ok(false);
        };
        let fingerprint = self.fingerprint(record.category, &record.original);
        self.by_fingerprint
            .remove_if(&fingerprint, |_, indexed| indexed == token);
        Ok(true)
    }

    async fn purge_expired(&self) -> Result<usize, VaultError> {
        let now = Utc::now();
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        let removed = before.saturating_sub(self.records.len());

        if removed > 0 {
            self.by_fingerprint
                .retain(|_, token| self.records.contains_key(token.as_str()));
            debug!(removed, remaining = self.records.len(), "Purged expired vault records");
        }

        Ok(removed)
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}
