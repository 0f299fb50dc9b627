//! Token value object.
//!
//! Token format: `PII_{CATEGORY}_{id}`
//! Example:      `PII_EMAIL_3f9a0c5e7b1d2a4c6e8f0a1b`
//!
//! `id` is 24 lower-case hex characters (96 bits drawn from the thread-local
//! CSPRNG), so tokens cannot be guessed from the value they stand for.

use std::fmt;
use std::fmt::Write as _;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pii::PiiCategory;

/// Prefix shared by every token.
pub const TOKEN_PREFIX: &str = "PII_";

/// Length of the random hex suffix.
pub const TOKEN_ID_LEN: usize = 24;

/// Errors produced when parsing a [`PiiToken`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token must start with 'PII_'")]
    MissingPrefix,

    #[error("token must have format PII_{{CATEGORY}}_{{id}}")]
    MissingSeparator,

    #[error("unknown token category '{0}'")]
    UnknownCategory(String),

    #[error("token id must be 24 characters, found {0}")]
    InvalidIdLength(usize),

    #[error("token id contains invalid character: {0:?}")]
    InvalidIdCharacter(char),
}

/// A validated vault token.
///
/// The category is kept next to the string so it never has to be re-parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PiiToken {
    value: String,
    category: PiiCategory,
}

impl PiiToken {
    /// Mint a fresh token for `category` with a random id.
    #[must_use]
    pub fn mint(category: PiiCategory) -> Self {
        let bytes: [u8; TOKEN_ID_LEN / 2] = rand::rng().random();
        let mut id = String::with_capacity(TOKEN_ID_LEN);
        for b in bytes {
            let _ = write!(id, "{b:02x}");
        }
        Self {
            value: format!("{TOKEN_PREFIX}{}_{id}", category.tag()),
            category,
        }
    }

    /// Parse and validate a raw token string.
    pub fn parse(s: &str) -> Result<Self, TokenError> {
        let rest = s
            .strip_prefix(TOKEN_PREFIX)
            .ok_or(TokenError::MissingPrefix)?;

        let (tag, id) = rest
            .rsplit_once('_')
            .ok_or(TokenError::MissingSeparator)?;

        let category = PiiCategory::from_tag(tag)
            .ok_or_else(|| TokenError::UnknownCategory(tag.to_string()))?;

        if id.len() != TOKEN_ID_LEN {
            return Err(TokenError::InvalidIdLength(id.len()));
        }

        if let Some(bad) = id
            .chars()
            .find(|c| !matches!(c, '0'..='9' | 'a'..='f'))
        {
            return Err(TokenError::InvalidIdCharacter(bad));
        }

        Ok(Self {
            value: s.to_string(),
            category,
        })
    }

    /// The category encoded in the token.
    #[must_use]
    pub fn category(&self) -> PiiCategory {
        self.category
    }

    /// The random suffix.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.value[self.value.len() - TOKEN_ID_LEN..]
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for PiiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl TryFrom<String> for PiiToken {
    type Error = TokenError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PiiToken> for String {
    fn from(token: PiiToken) -> Self {
        token.value
    }
}

impl AsRef<str> for PiiToken {
    fn as_ref(&self) -> &str {
        &self.value
    }
}
