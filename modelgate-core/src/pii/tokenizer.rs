//! Reversible PII tokenization.

use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{DetectorSet, PiiCategory};
use crate::vault::{PiiToken, TokenVault, VaultError};

// SAFETY: .expect() on LazyLock with a pattern assembled from the fixed
// category tags; covered by test_token_pattern_compiles().
static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    let tags: Vec<&str> = PiiCategory::ALL.iter().map(PiiCategory::tag).collect();
    Regex::new(&format!("PII_(?:{})_[0-9a-f]{{24}}", tags.join("|")))
        .expect("BUG: TOKEN_PATTERN regex is invalid")
});

/// One token occurrence in tokenized text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenUse {
    pub token: PiiToken,
    pub category: PiiCategory,
    /// Byte span of the token in the tokenized text.
    pub span: Range<usize>,
}

/// Result of [`Tokenizer::tokenize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenizedText {
    pub text: String,
    /// Occurrences in left-to-right order. A value seen twice appears twice.
    pub tokens: Vec<TokenUse>,
}

impl TokenizedText {
    /// Distinct tokens in first-occurrence order.
    #[must_use]
    pub fn distinct_tokens(&self) -> Vec<&PiiToken> {
        let mut seen = BTreeSet::new();
        self.tokens
            .iter()
            .filter(|u| seen.insert(&u.token))
            .map(|u| &u.token)
            .collect()
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    span: Range<usize>,
    category: PiiCategory,
    specificity: u8,
}

/// Detects sensitive values and swaps them for vault tokens.
///
/// Detection is pure CPU work over the caller's text; only `store`/`resolve`
/// touch the shared vault.
#[derive(Clone)]
pub struct Tokenizer {
    detectors: DetectorSet,
    vault: Arc<dyn TokenVault>,
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("detectors", &self.detectors)
            .field("vault_records", &self.vault.len())
            .finish()
    }
}

impl Tokenizer {
    #[must_use]
    pub fn new(detectors: DetectorSet, vault: Arc<dyn TokenVault>) -> Self {
        Self { detectors, vault }
    }

    #[must_use]
    pub fn vault(&self) -> &Arc<dyn TokenVault> {
        &self.vault
    }

    #[must_use]
    pub fn detectors(&self) -> &DetectorSet {
        &self.detectors
    }

    /// Replace every detected value of the enabled categories with a token.
    ///
    /// Candidates from all detectors are collected first; overlaps are
    /// resolved in favour of the more specific category (then the earlier,
    /// then the longer span), the winner's span grows to cover every
    /// candidate it overlapped, and the survivors are replaced in one
    /// left-to-right pass that copies surrounding text verbatim.
    pub async fn tokenize(
        &self,
        text: &str,
        categories: &BTreeSet<PiiCategory>,
    ) -> Result<TokenizedText, VaultError> {
        let spans = self.detect(text, categories);

        let mut out = String::with_capacity(text.len());
        let mut tokens = Vec::with_capacity(spans.len());
        let mut cursor = 0;

        for candidate in spans {
            out.push_str(&text[cursor..candidate.span.start]);
            let token = self
                .vault
                .store(candidate.category, &text[candidate.span.clone()])
                .await?;
            let start = out.len();
            out.push_str(token.as_str());
            tokens.push(TokenUse {
                category: candidate.category,
                span: start..out.len(),
                token,
            });
            cursor = candidate.span.end;
        }
        out.push_str(&text[cursor..]);

        debug!(
            tokens = tokens.len(),
            categories = ?categories.iter().map(PiiCategory::as_str).collect::<Vec<_>>(),
            "Tokenized input"
        );

        Ok(TokenizedText { text: out, tokens })
    }

    /// Tokenize with every category any registered detector covers.
    pub async fn tokenize_all(&self, text: &str) -> Result<TokenizedText, VaultError> {
        let categories: BTreeSet<PiiCategory> =
            self.detectors.iter().map(|d| d.category()).collect();
        self.tokenize(text, &categories).await
    }

    /// Replace every token substring with its original value.
    ///
    /// Fails on the first token the vault cannot resolve; nothing is passed
    /// through unresolved.
    pub async fn detokenize(&self, text: &str) -> Result<String, VaultError> {
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;

        for m in TOKEN_PATTERN.find_iter(text) {
            let token = PiiToken::parse(m.as_str()).map_err(|_| VaultError::NotFound {
                token: m.as_str().to_string(),
            })?;
            let original = self.vault.resolve(&token).await?;
            out.push_str(&text[cursor..m.start()]);
            out.push_str(&original);
            cursor = m.end();
        }
        out.push_str(&text[cursor..]);

        Ok(out)
    }

    /// Detokenize every string inside a JSON value, keys untouched.
    pub async fn detokenize_value(&self, value: &Value) -> Result<Value, VaultError> {
        // Iterative walk; async recursion would need boxing.
        let mut root = value.clone();
        let mut stack: Vec<&mut Value> = vec![&mut root];
        while let Some(node) = stack.pop() {
            match node {
                Value::String(s) => {
                    if TOKEN_PATTERN.is_match(s) {
                        *s = self.detokenize(s).await?;
                    }
                }
                Value::Array(items) => stack.extend(items.iter_mut()),
                Value::Object(map) => stack.extend(map.values_mut()),
                _ => {}
            }
        }
        Ok(root)
    }

    /// Non-overlapping candidate spans in ascending order.
    fn detect(&self, text: &str, categories: &BTreeSet<PiiCategory>) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = categories
            .iter()
            .flat_map(|&category| self.detectors.for_category(category))
            .flat_map(|detector| {
                let category = detector.category();
                let specificity = detector.specificity();
                detector
                    .find(text)
                    .into_iter()
                    .filter(|span| !span.is_empty())
                    .map(move |span| Candidate {
                        span,
                        category,
                        specificity,
                    })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.specificity
                .cmp(&a.specificity)
                .then(a.span.start.cmp(&b.span.start))
                .then(b.span.len().cmp(&a.span.len()))
        });

        // A losing candidate widens the winner it overlaps to the union of
        // both spans, so no part of the loser stays in clear text.
        let mut accepted: Vec<Candidate> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let mut union = candidate.span.clone();
            let mut winner: Option<Candidate> = None;
            accepted.retain(|a| {
                let overlaps =
                    candidate.span.start < a.span.end && a.span.start < candidate.span.end;
                if overlaps {
                    union = union.start.min(a.span.start)..union.end.max(a.span.end);
                    if winner
                        .as_ref()
                        .is_none_or(|w| a.specificity > w.specificity)
                    {
                        winner = Some(a.clone());
                    }
                }
                !overlaps
            });
            accepted.push(match winner {
                Some(winner) => Candidate {
                    span: union,
                    ..winner
                },
                None => candidate,
            });
        }

        accepted.sort_by_key(|c| c.span.start);
        accepted
    }
}

/// Byte ranges of token-shaped substrings in `text`.
pub fn find_tokens(text: &str) -> impl Iterator<Item = Range<usize>> + '_ {
    TOKEN_PATTERN.find_iter(text).map(|m| m.range())
}
