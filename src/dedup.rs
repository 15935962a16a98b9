use std::collections::HashMap;

use crate::models::VocabularyItem;
use crate::normalizer::{IdentityKey, key_of};

/// Collapses candidates sharing an identity key into one item.
///
/// The first occurrence keeps its position. Later duplicates may only fill
/// `translated_word`, `example_sentence` and `example_sentence_translated`
/// when the earlier value is blank; a non-blank value is never overwritten.
pub fn deduplicate(candidates: Vec<VocabularyItem>) -> Vec<VocabularyItem> {
    let mut positions: HashMap<IdentityKey, usize> = HashMap::with_capacity(candidates.len());
    let mut unique: Vec<VocabularyItem> = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let key = key_of(&candidate);
        match positions.get(&key) {
            Some(&index) => merge_into(&mut unique[index], candidate),
            None => {
                positions.insert(key, unique.len());
                unique.push(candidate);
            }
        }
    }

    unique
}

fn merge_into(kept: &mut VocabularyItem, later: VocabularyItem) {
    if is_blank(&kept.translated_word) && !is_blank(&later.translated_word) {
        kept.translated_word = later.translated_word;
    }
    fill_optional(&mut kept.example_sentence, later.example_sentence);
    fill_optional(&mut kept.example_sentence_translated, later.example_sentence_translated);
}

fn fill_optional(kept: &mut Option<String>, later: Option<String>) {
    let kept_blank = kept.as_deref().is_none_or(is_blank);
    let later_present = later.as_deref().is_some_and(|v| !is_blank(v));
    if kept_blank && later_present {
        *kept = later;
    }
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}
