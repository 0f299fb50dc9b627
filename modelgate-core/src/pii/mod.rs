//! Sensitive-data detection and tokenization.
//!
//! Detection is a capability set: one [`PiiDetector`] per category, held in a
//! [`DetectorSet`]. The [`Tokenizer`] runs the enabled detectors, resolves
//! overlaps and swaps matches for vault tokens.

mod category;
mod detectors;
mod tokenizer;

pub use category::{PiiCategory, UnknownCategory};
pub use detectors::{
    CreditCardDetector, DetectorSet, EmailDetector, IbanDetector, PhoneDetector, PiiDetector,
    iban_checksum_valid, luhn_valid,
};
pub use tokenizer::{TokenUse, TokenizedText, Tokenizer, find_tokens};
