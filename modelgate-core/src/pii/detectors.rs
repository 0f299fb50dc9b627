//! Built-in category detectors.
//!
//! Each detector knows one category's grammar and reports byte ranges. Misses
//! leak data to the model, so the grammars lean towards over-matching and rely
//! on checksums (IBAN mod-97, Luhn) only where a false positive would swallow
//! ordinary numbers.
//!
//! Greedy grammars run into neighbouring words and numbers. A rejected match
//! is never dropped as a whole: the checksum detectors retry shorter prefixes
//! that end on a group boundary and then resume the search one character
//! later, and the phone detector splits an over-long run at its separators.

use std::ops::Range;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::PiiCategory;

// SAFETY: .expect() on LazyLock with compile-time literal patterns, covered by
// the detector tests below.
static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[a-z0-9._%+\-]+@[a-z0-9\-]+(?:\.[a-z0-9\-]+)*\.[a-z]{2,}")
        .expect("BUG: EMAIL_PATTERN regex is invalid")
});

static PHONE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\+?\(?[0-9][0-9 \t().\-/]{5,}[0-9]")
        .expect("BUG: PHONE_PATTERN regex is invalid")
});

static IBAN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z]{2}[0-9]{2}(?: ?[A-Za-z0-9]){11,30}")
        .expect("BUG: IBAN_PATTERN regex is invalid")
});

static CARD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[0-9](?:[ \-]?[0-9]){12,18}\b").expect("BUG: CARD_PATTERN regex is invalid")
});

/// Digits a phone number may carry (E.164 allows up to 15).
const PHONE_DIGITS: std::ops::RangeInclusive<usize> = 7..=15;

/// Compact IBAN length bounds.
const IBAN_LEN: std::ops::RangeInclusive<usize> = 15..=34;

/// Payment card number length bounds.
const CARD_DIGITS: std::ops::RangeInclusive<usize> = 13..=19;

// ============================================================================
// Trait
// ============================================================================

/// Detection capability for one sensitive-data category.
///
/// New categories plug in by implementing this trait and registering the
/// detector in a [`DetectorSet`]; the tokenizer loop stays unchanged.
pub trait PiiDetector: Send + Sync {
    fn category(&self) -> PiiCategory;

    /// Overlap priority, see [`PiiCategory::specificity`].
    fn specificity(&self) -> u8 {
        self.category().specificity()
    }

    /// Byte ranges of every match in `text`, in ascending order. Ranges from
    /// one detector never overlap.
    fn find(&self, text: &str) -> Vec<Range<usize>>;
}

// ============================================================================
// Detector Set
// ============================================================================

/// Registered detectors, consulted per enabled category.
#[derive(Clone)]
pub struct DetectorSet {
    detectors: Vec<Arc<dyn PiiDetector>>,
}

impl std::fmt::Debug for DetectorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.detectors.iter().map(|d| d.category()))
            .finish()
    }
}

impl Default for DetectorSet {
    fn default() -> Self {
        Self::builtin()
    }
}

impl DetectorSet {
    /// No detectors registered.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            detectors: Vec::new(),
        }
    }

    /// Email, phone, IBAN and credit card detectors.
    #[must_use]
    pub fn builtin() -> Self {
        let mut set = Self::empty();
        set.register(Arc::new(EmailDetector));
        set.register(Arc::new(PhoneDetector));
        set.register(Arc::new(IbanDetector));
        set.register(Arc::new(CreditCardDetector));
        set
    }

    /// Add a detector. Several detectors may serve the same category.
    pub fn register(&mut self, detector: Arc<dyn PiiDetector>) {
        self.detectors.push(detector);
    }

    /// Detectors serving `category`.
    pub fn for_category(&self, category: PiiCategory) -> impl Iterator<Item = &Arc<dyn PiiDetector>> {
        self.detectors
            .iter()
            .filter(move |d| d.category() == category)
    }

    /// Whether any detector serves `category`.
    #[must_use]
    pub fn covers(&self, category: PiiCategory) -> bool {
        self.for_category(category).next().is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn PiiDetector>> {
        self.detectors.iter()
    }
}

/// Whether a value starting at `start` is not glued to a preceding letter or
/// digit.
fn starts_group(text: &str, start: usize) -> bool {
    start == 0 || !text.as_bytes()[start - 1].is_ascii_alphanumeric()
}

/// Whether a value ending at `end` is not glued to a following letter or digit.
fn ends_group(text: &str, end: usize) -> bool {
    !text
        .as_bytes()
        .get(end)
        .is_some_and(u8::is_ascii_alphanumeric)
}

// ============================================================================
// Email
// ============================================================================

/// RFC 5322-ish addresses; accepts anything shaped `local@domain.tld`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmailDetector;

impl PiiDetector for EmailDetector {
    fn category(&self) -> PiiCategory {
        PiiCategory::Email
    }

    fn find(&self, text: &str) -> Vec<Range<usize>> {
        EMAIL_PATTERN
            .find_iter(text)
            .map(|m| {
                // Sentence punctuation after the TLD is not part of the address.
                let trimmed = m.as_str().trim_end_matches(['.', '-']);
                m.start()..m.start() + trimmed.len()
            })
            .collect()
    }
}

// ============================================================================
// Phone
// ============================================================================

/// Phone numbers: 7 to 15 digits with the usual separators, optional `+`
/// country prefix and parenthesized area code.
///
/// The regex crate has no look-around, so digit boundaries are checked by
/// hand: a run glued to letters or further digits is not a phone number.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhoneDetector;

impl PiiDetector for PhoneDetector {
    fn category(&self) -> PiiCategory {
        PiiCategory::Phone
    }

    fn find(&self, text: &str) -> Vec<Range<usize>> {
        PHONE_PATTERN
            .find_iter(text)
            .flat_map(|m| phone_groups(text, m.range()))
            .filter_map(|group| phone_span(text, group))
            .collect()
    }
}

/// Split a match into runs of at most 15 digits.
///
/// Whitespace and `/` separate chunks; consecutive chunks are joined while
/// the digit total fits, so "555-123-4567 / 555-987-6543" yields two numbers
/// instead of one 20-digit run.
fn phone_groups(text: &str, span: Range<usize>) -> Vec<Range<usize>> {
    let mut chunks: Vec<(Range<usize>, usize)> = Vec::new();
    let mut current: Option<(Range<usize>, usize)> = None;
    for (i, c) in text[span.clone()].char_indices() {
        let at = span.start + i;
        if c.is_whitespace() || c == '/' {
            chunks.extend(current.take());
            continue;
        }
        let digit = usize::from(c.is_ascii_digit());
        match current.as_mut() {
            Some((range, digits)) => {
                range.end = at + c.len_utf8();
                *digits += digit;
            }
            None => current = Some((at..at + c.len_utf8(), digit)),
        }
    }
    chunks.extend(current);

    // A chunk glued to a letter or digit outside the match is part of some
    // other word ("AB12 555-123-4567").
    if chunks
        .first()
        .is_some_and(|(range, _)| !starts_group(text, range.start))
    {
        chunks.remove(0);
    }
    if chunks
        .last()
        .is_some_and(|(range, _)| !ends_group(text, range.end))
    {
        chunks.pop();
    }

    let mut groups = Vec::new();
    let mut group: Option<(Range<usize>, usize)> = None;
    for (range, digits) in chunks {
        if let Some((joined, total)) = group.as_mut()
            && *total + digits <= *PHONE_DIGITS.end()
        {
            joined.end = range.end;
            *total += digits;
            continue;
        }
        groups.extend(group.replace((range, digits)).map(|(joined, _)| joined));
    }
    groups.extend(group.map(|(joined, _)| joined));
    groups
}

/// Trim a group to its number and check its boundaries and digit count.
fn phone_span(text: &str, group: Range<usize>) -> Option<Range<usize>> {
    let raw = &text[group.clone()];
    let lead = raw.find(|c: char| c.is_ascii_digit() || c == '+' || c == '(')?;
    let tail = raw.rfind(|c: char| c.is_ascii_digit())? + 1;
    let mut start = group.start + lead;
    let end = group.start + tail;
    let body = &text[start..end];

    // An unmatched opening parenthesis is punctuation, not an area code.
    if body.starts_with('(') && !body.contains(')') {
        start += 1;
    }

    if !starts_group(text, start) || !ends_group(text, end) {
        return None;
    }

    let digits = text[start..end].bytes().filter(u8::is_ascii_digit).count();
    PHONE_DIGITS.contains(&digits).then_some(start..end)
}

// ============================================================================
// IBAN
// ============================================================================

/// International bank account numbers, compact or space-grouped, validated
/// with the ISO 13616 mod-97 checksum.
///
/// The grammar can run into neighbouring words on either side ("Ref XY34 from
/// DE89..." or "... 0130 00 and"), so only prefixes ending on a group boundary
/// are checksummed, and a match with no valid prefix is searched again from its
/// next character.
#[derive(Debug, Clone, Copy, Default)]
pub struct IbanDetector;

impl PiiDetector for IbanDetector {
    fn category(&self) -> PiiCategory {
        PiiCategory::Iban
    }

    fn find(&self, text: &str) -> Vec<Range<usize>> {
        let mut found = Vec::new();
        let mut pos = 0;
        while let Some(m) = IBAN_PATTERN.find_at(text, pos) {
            match longest_valid_iban(text, m.range()) {
                Some(end) => {
                    found.push(m.start()..end);
                    pos = end;
                }
                // Matches start on an ASCII letter, so +1 stays on a char
                // boundary.
                None => pos = m.start() + 1,
            }
        }
        found
    }
}

/// End of the longest checksum-valid prefix of `span` that stops on a group
/// boundary.
fn longest_valid_iban(text: &str, span: Range<usize>) -> Option<usize> {
    let mut compact = String::with_capacity(span.len());
    // (byte end, compact length) at each group boundary
    let mut ends = Vec::new();
    for (i, c) in text[span.clone()].char_indices() {
        if c == ' ' {
            continue;
        }
        compact.push(c.to_ascii_uppercase());
        let end = span.start + i + c.len_utf8();
        if ends_group(text, end) {
            ends.push((end, compact.len()));
        }
    }
    ends.into_iter()
        .rev()
        .find(|&(_, len)| IBAN_LEN.contains(&len) && iban_checksum_valid(&compact[..len]))
        .map(|(end, _)| end)
}

/// ISO 13616 mod-97 check on a compact, upper-case IBAN.
#[must_use]
pub fn iban_checksum_valid(iban: &str) -> bool {
    if !IBAN_LEN.contains(&iban.len()) || !iban.is_ascii() {
        return false;
    }
    let (head, tail) = iban.split_at(4);
    let mut remainder: u32 = 0;
    for c in tail.chars().chain(head.chars()) {
        let value = match c {
            '0'..='9' => c as u32 - '0' as u32,
            'A'..='Z' => c as u32 - 'A' as u32 + 10,
            _ => return false,
        };
        remainder = if value >= 10 {
            (remainder * 100 + value) % 97
        } else {
            (remainder * 10 + value) % 97
        };
    }
    remainder == 1
}

// ============================================================================
// Credit Card
// ============================================================================

/// Payment card numbers: 13 to 19 digits, optionally grouped with spaces or
/// dashes, validated with the Luhn checksum.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreditCardDetector;

impl PiiDetector for CreditCardDetector {
    fn category(&self) -> PiiCategory {
        PiiCategory::CreditCard
    }

    fn find(&self, text: &str) -> Vec<Range<usize>> {
        let mut found = Vec::new();
        let mut pos = 0;
        while let Some(m) = CARD_PATTERN.find_at(text, pos) {
            match longest_luhn_prefix(text, m.range()) {
                Some(end) => {
                    found.push(m.start()..end);
                    pos = end;
                }
                None => pos = m.start() + 1,
            }
        }
        found
    }
}

/// End of the longest Luhn-valid prefix of `span` that stops on a group
/// boundary, so a trailing expiry or reference number does not hide the card.
fn longest_luhn_prefix(text: &str, span: Range<usize>) -> Option<usize> {
    let mut digits = Vec::with_capacity(*CARD_DIGITS.end());
    let mut ends = Vec::new();
    for (i, c) in text[span.clone()].char_indices() {
        let Some(d) = c.to_digit(10) else { continue };
        digits.push(d);
        let end = span.start + i + 1;
        if ends_group(text, end) {
            ends.push((end, digits.len()));
        }
    }
    ends.into_iter()
        .rev()
        .find(|&(_, n)| CARD_DIGITS.contains(&n) && luhn_valid(&digits[..n]))
        .map(|(end, _)| end)
}

/// Luhn checksum over a digit sequence.
#[must_use]
pub fn luhn_valid(digits: &[u32]) -> bool {
    if digits.len() < 13 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}
