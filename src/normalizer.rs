//! Canonical comparison keys for vocabulary items.
//!
//! Every uniqueness decision in the crate (deduplication, conflict checks and
//! the storage index) goes through [`key_of`], so two items are "the same
//! card" exactly when their keys are equal.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Flashcard, VocabularyItem};

/// Version of the identity-key contract. Stored in the database so a change
/// to normalization cannot silently alter uniqueness of existing rows.
pub const IDENTITY_KEY_VERSION: i64 = 1;

/// Normalized (source_word, source_language, native_language) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey {
    pub word: String,
    pub source_language: String,
    pub native_language: String,
}

impl IdentityKey {
    pub fn new(word: &str, source_language: &str, native_language: &str) -> Self {
        Self {
            word: normalize(word),
            source_language: normalize(source_language),
            native_language: normalize(native_language),
        }
    }

    /// Same word and source language, relabeled to another native language.
    pub fn with_native_language(&self, native_language: &str) -> Self {
        Self {
            word: self.word.clone(),
            source_language: self.source_language.clone(),
            native_language: normalize(native_language),
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' ({} -> {})",
            self.word, self.source_language, self.native_language
        )
    }
}

/// Trim and case-fold.
pub fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

pub fn key_of(item: &VocabularyItem) -> IdentityKey {
    IdentityKey::new(&item.source_word, &item.source_language, &item.native_language)
}

pub fn key_of_card(card: &Flashcard) -> IdentityKey {
    IdentityKey::new(&card.source_word, &card.source_language, &card.native_language)
}

/// Case- and whitespace-insensitive equality, used for quiz answers and
/// language comparisons.
pub fn same_text(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_trimmed_and_casefolded() {
        let a = VocabularyItem::new("  Hola ", "ES", "cześć", "PL");
        let b = VocabularyItem::new("hola", "es", "something else", "pl");
        assert_eq!(key_of(&a), key_of(&b));
        assert_eq!(key_of(&a).word, "hola");
    }

    #[test]
    fn test_key_handles_non_ascii_case() {
        let upper = IdentityKey::new("ÉCOLE", "fr", "pl");
        let lower = IdentityKey::new("école", "FR", "Pl");
        assert_eq!(upper, lower);

        let polish = IdentityKey::new("ŻÓŁW", "pl", "en");
        assert_eq!(polish.word, "żółw");
    }

    #[test]
    fn test_native_language_participates_in_key() {
        let pl = IdentityKey::new("hola", "es", "pl");
        let en = IdentityKey::new("hola", "es", "en");
        assert_ne!(pl, en);
        assert_eq!(en.with_native_language(" PL "), pl);
    }

    #[test]
    fn test_normalize_is_total_on_empty_input() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
        assert!(same_text(" Gracias", "gracias "));
    }
}
