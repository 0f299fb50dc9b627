//! Sensitive-data categories.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A class of sensitive value the tokenizer can detect.
///
/// Ordered by declaration so `BTreeSet<PiiCategory>` iterates
/// deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiCategory {
    Email,
    Phone,
    Iban,
    CreditCard,
}

impl PiiCategory {
    /// Every built-in category.
    pub const ALL: [PiiCategory; 4] = [
        PiiCategory::Email,
        PiiCategory::Phone,
        PiiCategory::Iban,
        PiiCategory::CreditCard,
    ];

    /// Configuration name (`email`, `credit_card`, ...).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Iban => "iban",
            Self::CreditCard => "credit_card",
        }
    }

    /// Upper-case tag embedded in token strings.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Email => "EMAIL",
            Self::Phone => "PHONE",
            Self::Iban => "IBAN",
            Self::CreditCard => "CREDIT_CARD",
        }
    }

    /// Inverse of [`PiiCategory::tag`].
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.tag() == tag)
    }

    /// Overlap priority. When two detectors claim the same span, the
    /// category with the higher value wins.
    ///
    /// Checksum-validated grammars outrank free-form ones, and phone numbers
    /// (the loosest digit grammar) rank last.
    #[must_use]
    pub fn specificity(&self) -> u8 {
        match self {
            Self::Iban => 40,
            Self::CreditCard => 30,
            Self::Email => 20,
            Self::Phone => 10,
        }
    }
}

impl fmt::Display for PiiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown category name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown PII category '{0}'")]
pub struct UnknownCategory(pub String);

impl FromStr for PiiCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "email" => Ok(Self::Email),
            "phone" => Ok(Self::Phone),
            "iban" => Ok(Self::Iban),
            "credit_card" | "creditcard" => Ok(Self::CreditCard),
            _ => Err(UnknownCategory(s.to_string())),
        }
    }
}
