use async_trait::async_trait;
use sqlx::SqliteConnection;
use std::collections::HashSet;
use std::time::Instant;
use uuid::Uuid;

use crate::conflict::find_conflict;
use crate::database::{Database, is_unique_violation};
use crate::errors::ApiError;
use crate::models::{Flashcard, SwitchResult, VocabularyItem};
use crate::normalizer::{key_of_card, same_text};
use crate::{log_service_start, log_service_success, log_service_warn};

/// Produces learner-facing text for cards moving to another native language.
///
/// Best-effort: an error or a mismatched response makes the switch fall back
/// to relabeling `native_language` only.
#[async_trait]
pub trait FlashcardTranslator: Send + Sync {
    async fn translate(
        &self,
        items: &[VocabularyItem],
        target_language: &str,
    ) -> anyhow::Result<Vec<VocabularyItem>>;
}

#[derive(Debug, thiserror::Error)]
pub enum SwitchError {
    #[error("{0}")]
    Validation(String),

    #[error(
        "Switching '{source_word}' ({source_language}) to {target_language} would create a duplicate flashcard"
    )]
    Conflict {
        source_word: String,
        source_language: String,
        target_language: String,
    },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<SwitchError> for ApiError {
    fn from(err: SwitchError) -> Self {
        match err {
            SwitchError::Validation(message) => ApiError::ValidationError(message),
            conflict @ SwitchError::Conflict { .. } => ApiError::DuplicateResource(conflict.to_string()),
            SwitchError::Storage(e) => ApiError::DatabaseError(e),
        }
    }
}

/// Moves flashcards to a new native language without ever creating two
/// cards with the same identity key.
pub struct LanguageSwitcher<'a> {
    db: &'a Database,
    translator: &'a dyn FlashcardTranslator,
}

impl<'a> LanguageSwitcher<'a> {
    pub fn new(db: &'a Database, translator: &'a dyn FlashcardTranslator) -> Self {
        Self { db, translator }
    }

    /// Switch the listed cards (or every card when `card_ids` is `None`) to
    /// `target_language`. Unknown ids are ignored. Cards already in the target
    /// language are skipped unless `force` is set.
    pub async fn switch(
        &self,
        card_ids: Option<&[Uuid]>,
        target_language: &str,
        force: bool,
    ) -> Result<SwitchResult, SwitchError> {
        let started = Instant::now();
        let cards = match card_ids {
            Some(ids) => self.db.get_flashcards_by_ids(ids).await?,
            None => self.db.get_all_flashcards().await?,
        };

        // Nothing selected means nothing to switch, whatever the target.
        let mut result = SwitchResult {
            force_retranslate: force,
            ..Default::default()
        };
        if cards.is_empty() {
            return Ok(result);
        }

        let target_language = target_language.trim();
        if target_language.is_empty() {
            return Err(SwitchError::Validation("target_language is required".to_string()));
        }

        let (candidates, unchanged): (Vec<Flashcard>, Vec<Flashcard>) = cards
            .into_iter()
            .partition(|card| force || !same_text(&card.native_language, target_language));
        result.skipped_count = unchanged.len();
        if candidates.is_empty() {
            return Ok(result);
        }

        log_service_start!("language_switcher", "switch", item_count = candidates.len());

        // Phase 1: reject the whole switch before any external call or write.
        {
            let mut tx = self.db.begin().await?;
            check_conflicts(&mut tx, &candidates, target_language).await?;
            tx.rollback().await.map_err(anyhow::Error::from)?;
        }

        // Phase 2: translate best-effort, then apply every update atomically.
        let (updated, fallback) = self.translated_cards(candidates, target_language).await;
        result.translation_fallback = fallback;

        let mut tx = self.db.begin().await?;
        check_conflicts(&mut tx, &updated, target_language).await?;
        for card in &updated {
            if let Err(e) = Database::update_flashcard_on(&mut tx, card).await {
                if is_unique_violation(&e) {
                    // Dropping the transaction rolls back the earlier updates.
                    return Err(conflict_for(card, target_language));
                }
                return Err(SwitchError::Storage(e));
            }
        }
        tx.commit().await.map_err(anyhow::Error::from)?;

        result.translated_count = updated.len();
        result.affected = updated;
        log_service_success!(
            "language_switcher",
            "switch",
            created = result.translated_count,
            skipped = result.skipped_count,
            duration_ms = started.elapsed().as_millis() as u64
        );
        Ok(result)
    }

    /// Returns the cards with the target language and, when translation
    /// succeeded, the new learner-facing text. The flag is true on fallback.
    async fn translated_cards(&self, candidates: Vec<Flashcard>, target_language: &str) -> (Vec<Flashcard>, bool) {
        let items: Vec<VocabularyItem> = candidates.iter().map(Flashcard::to_vocabulary_item).collect();

        let translations = match self.translator.translate(&items, target_language).await {
            Ok(translated) if matches_request(&items, &translated) => Some(translated),
            Ok(_) => {
                log_service_warn!("language_switcher", "translate", "translation response did not match request; relabeling only");
                None
            }
            Err(e) => {
                log_service_warn!("language_switcher", "translate", format!("translation failed, relabeling only: {}", e));
                None
            }
        };

        let fallback = translations.is_none();
        let updated = candidates
            .into_iter()
            .enumerate()
            .map(|(i, mut card)| {
                card.native_language = target_language.to_string();
                if let Some(translated) = translations.as_ref().map(|t| &t[i]) {
                    apply_translation(&mut card, translated);
                }
                card
            })
            .collect();

        (updated, fallback)
    }
}

fn matches_request(requested: &[VocabularyItem], translated: &[VocabularyItem]) -> bool {
    requested.len() == translated.len()
        && requested
            .iter()
            .zip(translated)
            .all(|(a, b)| same_text(&a.source_word, &b.source_word))
}

fn apply_translation(card: &mut Flashcard, translated: &VocabularyItem) {
    if !translated.translated_word.trim().is_empty() {
        card.translated_word = translated.translated_word.trim().to_string();
    }
    if let Some(sentence) = non_blank(&translated.example_sentence) {
        card.example_sentence = Some(sentence);
    }
    if let Some(sentence) = non_blank(&translated.example_sentence_translated) {
        card.example_sentence_translated = Some(sentence);
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Fails on the first candidate whose new key is held by another stored card
/// or by another candidate in the same switch.
async fn check_conflicts(
    conn: &mut SqliteConnection,
    candidates: &[Flashcard],
    target_language: &str,
) -> Result<(), SwitchError> {
    let mut new_keys = HashSet::with_capacity(candidates.len());
    for card in candidates {
        let key = key_of_card(card).with_native_language(target_language);
        if !new_keys.insert(key.clone()) || find_conflict(conn, &key, Some(card.id)).await?.is_some() {
            return Err(conflict_for(card, target_language));
        }
    }
    Ok(())
}

fn conflict_for(card: &Flashcard, target_language: &str) -> SwitchError {
    SwitchError::Conflict {
        source_word: card.source_word.clone(),
        source_language: card.source_language.clone(),
        target_language: target_language.to_string(),
    }
}
