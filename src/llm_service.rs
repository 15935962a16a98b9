use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use crate::config::LLMConfig;
use crate::language_switch::FlashcardTranslator;
use crate::llm_providers::{ImageInput, JsonResponseParser, LLMProvider, LLMProviderFactory};
use crate::models::{Flashcard, GeneratedQuizQuestion, QuizHint, VocabularyItem};
use crate::normalizer::same_text;
use crate::response_cache::ResponseCache;
use crate::{log_llm_operation, log_service_warn};

/// Largest number of cards sent to the model in one request.
pub const MAX_AI_BATCH: usize = 50;

/// Quizzes up to this size never call the model.
pub const LOCAL_QUIZ_LIMIT: usize = 5;

#[derive(Debug, Deserialize)]
struct HintPayload {
    hint: Option<String>,
    example_sentence: Option<String>,
    #[serde(alias = "example_translation")]
    example_sentence_translated: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EnrichmentPayload {
    #[serde(default)]
    items: Vec<EnrichedItem>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EnrichedItem {
    #[serde(default)]
    source_word: String,
    example_sentence: Option<String>,
    #[serde(alias = "example_translation")]
    example_sentence_translated: Option<String>,
    difficulty_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuizPayload {
    #[serde(default)]
    questions: Vec<GeneratedQuizQuestion>,
}

#[derive(Debug, Deserialize)]
struct ExtractionPayload {
    #[serde(default)]
    items: Vec<ExtractedItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExtractedItem {
    #[serde(default)]
    source_word: String,
    #[serde(default)]
    source_language: String,
    #[serde(default)]
    translated_word: String,
    #[serde(default)]
    native_language: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct TranslationPayload {
    #[serde(default)]
    flashcards: Vec<TranslatedItem>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TranslatedItem {
    #[serde(default)]
    source_word: String,
    #[serde(default)]
    translated_word: String,
    example_sentence: Option<String>,
    #[serde(alias = "example_translation")]
    example_sentence_translated: Option<String>,
}

/// AI collaborator for hints, enrichment, quizzes, extraction and translation.
///
/// Every public operation is best-effort: when no API key is configured or the
/// provider fails, callers get a documented fallback instead of an error. The
/// one exception is [`LLMService::translate_items`], whose error tells the
/// language switcher to relabel only.
#[derive(Clone)]
pub struct LLMService {
    provider: Option<LLMProvider>,
    json_parser: JsonResponseParser,
    cache: ResponseCache,
}

impl LLMService {
    pub fn new(config: &LLMConfig, cache: ResponseCache) -> Self {
        let provider = config.api_key.clone().map(|api_key| {
            LLMProviderFactory::create_provider(
                config.provider,
                api_key,
                config.base_url.clone(),
                config.model.clone(),
                config.vision_model.clone(),
            )
        });

        Self {
            provider,
            json_parser: JsonResponseParser,
            cache,
        }
    }

    /// Service with AI turned off; every operation uses its local fallback.
    pub fn disabled(cache: ResponseCache) -> Self {
        Self {
            provider: None,
            json_parser: JsonResponseParser,
            cache,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.as_ref().map_or("disabled", LLMProvider::provider_name)
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    fn provider(&self) -> Result<&LLMProvider> {
        self.provider
            .as_ref()
            .ok_or_else(|| anyhow!("AI features are disabled: no API key configured"))
    }

    async fn request_json<T: DeserializeOwned>(&self, operation: &str, system: &str, prompt: &str) -> Result<T> {
        let provider = self.provider()?;
        let started = Instant::now();

        let response = provider.make_request(Some(system), prompt).await.inspect_err(|e| {
            log_llm_operation!(error, operation, provider = provider.provider_name(), error = e);
        })?;
        debug!(operation = operation, response = %response, "Raw LLM response");

        let parsed = self.json_parser.parse_json_response::<T>(&response)?;
        log_llm_operation!(
            success,
            operation,
            provider = provider.provider_name(),
            duration_ms = started.elapsed().as_millis() as u64,
            item_count = 1
        );
        Ok(parsed)
    }

    async fn cached<T, F>(&self, cache_key: String, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: std::future::Future<Output = Result<T>>,
    {
        if let Some(value) = self.cache.get(&cache_key).await {
            if let Ok(hit) = serde_json::from_value::<T>(value) {
                return Ok(hit);
            }
        }

        let fresh = fetch.await?;
        self.cache.insert(cache_key, serde_json::to_value(&fresh)?).await;
        Ok(fresh)
    }

    /// Short mnemonic and an example sentence for a quiz card.
    pub async fn generate_hint(&self, card: &Flashcard, native_language: &str) -> Option<QuizHint> {
        if !self.is_enabled() {
            return None;
        }

        let key = ResponseCache::key_for(
            "hint",
            &[&card.source_word, &card.translated_word, native_language, &card.source_language],
        );
        let prompt = format!(
            "The learner's native language is {native}. For the {source_lang} word '{word}' \
             (meaning '{translation}') give a short hint and one simple example sentence in {source_lang}, \
             translated into {native}. Respond with a JSON object with keys: hint, example_sentence, \
             example_sentence_translated.",
            native = native_language,
            source_lang = card.source_language,
            word = card.source_word,
            translation = card.translated_word,
        );

        let fetched = self
            .cached(key, async {
                let payload: HintPayload = self
                    .request_json("generate_hint", "You help language learners with short hints.", &prompt)
                    .await?;
                Ok(QuizHint {
                    hint: payload.hint,
                    example_sentence: payload.example_sentence,
                    example_sentence_translated: payload.example_sentence_translated,
                })
            })
            .await;

        match fetched {
            Ok(hint) if hint.hint.is_some() || hint.example_sentence.is_some() => Some(hint),
            Ok(_) => None,
            Err(e) => {
                log_service_warn!("llm_service", "generate_hint", format!("hint unavailable: {}", e));
                None
            }
        }
    }

    /// Adds example sentences and a difficulty level where they are missing.
    /// Items come back in input order; a failed batch is returned unchanged.
    pub async fn enrich_flashcards(&self, items: Vec<VocabularyItem>, native_language: &str) -> Vec<VocabularyItem> {
        if !self.is_enabled() || items.is_empty() {
            return items;
        }

        log_llm_operation!(start, "enrich_flashcards", provider = self.provider_name(), item_count = items.len());

        let batches: Vec<&[VocabularyItem]> = items.chunks(MAX_AI_BATCH).collect();
        let responses = join_all(batches.iter().map(|batch| self.enrich_batch(batch, native_language))).await;

        let mut enriched = Vec::with_capacity(items.len());
        for (batch, response) in batches.into_iter().zip(responses) {
            match response {
                Ok(payload) => enriched.extend(merge_enrichment(batch, payload)),
                Err(e) => {
                    log_service_warn!("llm_service", "enrich_flashcards", format!("batch left unchanged: {}", e));
                    enriched.extend_from_slice(batch);
                }
            }
        }
        enriched
    }

    async fn enrich_batch(&self, batch: &[VocabularyItem], native_language: &str) -> Result<EnrichmentPayload> {
        let listing = batch
            .iter()
            .map(|item| {
                format!(
                    "- {} ({}) -> {} ({})",
                    item.source_word, item.source_language, item.translated_word, item.native_language
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Native language: {native_language}.\nItems:\n{listing}\n\nReturn a JSON object with an 'items' array \
             in the same order. Each item has keys: source_word, example_sentence (simple A1/A2 sentence in the \
             source language), example_sentence_translated (in the native language), difficulty_level (A1, A2 or B1)."
        );

        let key = ResponseCache::key_for("enrich", &[&prompt]);
        self.cached(key, self.request_json("enrich_flashcards", "You enrich vocabulary flashcards.", &prompt))
            .await
    }

    /// Quiz questions for the given cards. Small quizzes, a disabled service
    /// and model failures all use [`fallback_quiz`].
    pub async fn generate_quiz_questions(&self, cards: &[Flashcard], num_questions: usize) -> Vec<GeneratedQuizQuestion> {
        if num_questions <= LOCAL_QUIZ_LIMIT || !self.is_enabled() || cards.is_empty() {
            return fallback_quiz(cards, num_questions);
        }

        let selected = &cards[..cards.len().min(num_questions)];
        let listing = selected
            .iter()
            .map(|c| format!("- {} ({}) -> {} ({})", c.source_word, c.source_language, c.translated_word, c.native_language))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Create a mixed quiz (translation, multiple_choice, fill_in) for these flashcards:\n{listing}\n\n\
             Return a JSON object with a 'questions' array; each question has keys: question, type, answer, \
             and options (array, only for multiple_choice)."
        );

        match self
            .request_json::<QuizPayload>("generate_quiz", "You generate concise quiz questions.", &prompt)
            .await
        {
            Ok(payload) if !payload.questions.is_empty() => {
                payload.questions.into_iter().take(num_questions).collect()
            }
            Ok(_) => fallback_quiz(cards, num_questions),
            Err(e) => {
                log_service_warn!("llm_service", "generate_quiz", format!("using local quiz: {}", e));
                fallback_quiz(cards, num_questions)
            }
        }
    }

    /// Vocabulary pairs found in free text; empty when AI is unavailable.
    pub async fn extract_vocabulary(&self, text: &str, native_language: &str) -> Vec<VocabularyItem> {
        if !self.is_enabled() || text.trim().is_empty() {
            return Vec::new();
        }

        let key = ResponseCache::key_for("interpret", &[text, native_language]);
        let prompt = format!("{}\n\nText:\n{}", extraction_instructions(native_language, "text"), text);

        let fetched = self
            .cached(key, async {
                let payload: ExtractionPayload = self
                    .request_json("extract_vocabulary", "You extract vocabulary for language learners.", &prompt)
                    .await?;
                Ok(filter_extracted(payload.items, native_language))
            })
            .await;

        finish_extraction(fetched, native_language, "extract_vocabulary")
    }

    /// Same as [`LLMService::extract_vocabulary`] for a photo or scan.
    pub async fn extract_vocabulary_from_image(
        &self,
        image: &[u8],
        mime_type: &str,
        native_language: &str,
    ) -> Vec<VocabularyItem> {
        let Some(provider) = self.provider.as_ref() else {
            return Vec::new();
        };

        let key = ResponseCache::key_for("vision", &[&ResponseCache::hash_bytes(image), native_language]);
        let prompt = extraction_instructions(native_language, "image");

        let fetched = self
            .cached(key, async {
                let started = Instant::now();
                let response = provider
                    .make_vision_request(&prompt, ImageInput { bytes: image, mime_type })
                    .await?;
                let payload: ExtractionPayload = self.json_parser.parse_json_response(&response)?;
                log_llm_operation!(
                    success,
                    "extract_vocabulary_from_image",
                    provider = provider.provider_name(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    item_count = payload.items.len()
                );
                Ok(filter_extracted(payload.items, native_language))
            })
            .await;

        finish_extraction(fetched, native_language, "extract_vocabulary_from_image")
    }

    /// Translates learner-facing fields into `target_language`, in batches.
    /// Fails as a whole if any batch fails or comes back misaligned.
    pub async fn translate_items(&self, items: &[VocabularyItem], target_language: &str) -> Result<Vec<VocabularyItem>> {
        self.provider()?;
        log_llm_operation!(start, "translate_flashcards", provider = self.provider_name(), item_count = items.len());

        let mut translated = Vec::with_capacity(items.len());
        for batch in items.chunks(MAX_AI_BATCH) {
            let cards = batch
                .iter()
                .map(|item| {
                    serde_json::json!({
                        "source_word": item.source_word,
                        "source_language": item.source_language,
                        "translated_word": item.translated_word,
                        "example_sentence": item.example_sentence,
                        "example_sentence_translated": item.example_sentence_translated,
                    })
                })
                .collect::<Vec<_>>();
            let prompt = format!(
                "Target language: {target_language}.\nCards: {}\n\nTranslate translated_word and \
                 example_sentence_translated into the target language. Keep source_word and example_sentence \
                 unchanged. Return a JSON object with a 'flashcards' array in the same order.",
                serde_json::Value::Array(cards)
            );

            let key = ResponseCache::key_for("translate", &[&prompt]);
            let payload: TranslationPayload = self
                .cached(
                    key,
                    self.request_json(
                        "translate_flashcards",
                        "You are a multilingual flashcard translator.",
                        &prompt,
                    ),
                )
                .await?;

            if payload.flashcards.len() != batch.len() {
                return Err(anyhow!(
                    "Translation returned {} cards for a batch of {}",
                    payload.flashcards.len(),
                    batch.len()
                ));
            }

            for (original, result) in batch.iter().zip(payload.flashcards) {
                if !result.source_word.trim().is_empty() && !same_text(&original.source_word, &result.source_word) {
                    return Err(anyhow!("Translation reordered cards ('{}')", original.source_word));
                }
                translated.push(VocabularyItem {
                    source_word: original.source_word.clone(),
                    source_language: original.source_language.clone(),
                    translated_word: result.translated_word,
                    native_language: target_language.to_string(),
                    example_sentence: result.example_sentence.or_else(|| original.example_sentence.clone()),
                    example_sentence_translated: result.example_sentence_translated,
                    difficulty_level: original.difficulty_level.clone(),
                });
            }
        }
        Ok(translated)
    }
}

#[async_trait]
impl FlashcardTranslator for LLMService {
    async fn translate(&self, items: &[VocabularyItem], target_language: &str) -> Result<Vec<VocabularyItem>> {
        self.translate_items(items, target_language).await
    }
}

/// Deterministic translation questions, one per card.
pub fn fallback_quiz(cards: &[Flashcard], num_questions: usize) -> Vec<GeneratedQuizQuestion> {
    cards
        .iter()
        .take(num_questions)
        .map(|card| GeneratedQuizQuestion {
            question: format!("Translate '{}' to {}", card.source_word, card.native_language),
            question_type: "translation".to_string(),
            answer: card.translated_word.clone(),
            options: None,
        })
        .collect()
}

fn extraction_instructions(native_language: &str, medium: &str) -> String {
    format!(
        "Extract vocabulary from the {medium}. Keep translation pairs that appear in it (e.g. 'si - yes'). \
         Merge duplicates. Translate every word into {native_language}. Only extract words that are NOT in \
         {native_language}. Return a JSON object with an 'items' array; each item has keys: source_word, \
         source_language (ISO 639-1 code), translated_word, native_language."
    )
}

/// Drops items already in the learner's language or left untranslated.
fn filter_extracted(items: Vec<ExtractedItem>, native_language: &str) -> Vec<ExtractedItem> {
    items
        .into_iter()
        .filter(|item| !item.source_word.trim().is_empty())
        .filter(|item| !same_text(&item.source_language, native_language))
        .filter(|item| !same_text(&item.source_word, &item.translated_word))
        .collect()
}

fn finish_extraction(
    fetched: Result<Vec<ExtractedItem>>,
    native_language: &str,
    operation: &str,
) -> Vec<VocabularyItem> {
    match fetched {
        Ok(items) => items
            .into_iter()
            .map(|item| {
                let native = if item.native_language.trim().is_empty() {
                    native_language.to_string()
                } else {
                    item.native_language
                };
                VocabularyItem::new(item.source_word, item.source_language, item.translated_word, native).trimmed()
            })
            .collect(),
        Err(e) => {
            log_service_warn!("llm_service", operation, format!("extraction unavailable: {}", e));
            Vec::new()
        }
    }
}

/// Fills missing example and difficulty fields from the model's answer,
/// matching by source word first and by position second.
fn merge_enrichment(batch: &[VocabularyItem], payload: EnrichmentPayload) -> Vec<VocabularyItem> {
    batch
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let extra = payload
                .items
                .iter()
                .find(|e| same_text(&e.source_word, &item.source_word))
                .or_else(|| payload.items.get(i).filter(|e| e.source_word.trim().is_empty()));

            let mut merged = item.clone();
            if let Some(extra) = extra {
                fill(&mut merged.example_sentence, &extra.example_sentence);
                fill(&mut merged.example_sentence_translated, &extra.example_sentence_translated);
                fill(&mut merged.difficulty_level, &extra.difficulty_level);
            }
            merged
        })
        .collect()
}

fn fill(target: &mut Option<String>, value: &Option<String>) {
    let missing = target.as_deref().is_none_or(|v| v.trim().is_empty());
    let incoming = value.as_deref().map(str::trim).filter(|v| !v.is_empty());
    if let (true, Some(v)) = (missing, incoming) {
        *target = Some(v.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn card(word: &str, translation: &str) -> Flashcard {
        Flashcard {
            id: Uuid::new_v4(),
            user_id: None,
            source_word: word.to_string(),
            source_language: "es".to_string(),
            translated_word: translation.to_string(),
            native_language: "pl".to_string(),
            example_sentence: None,
            example_sentence_translated: None,
            difficulty_level: None,
            is_manual: true,
            correct_count: 0,
            incorrect_count: 0,
            created_at: Utc::now(),
        }
    }

    fn disabled() -> LLMService {
        LLMService::disabled(ResponseCache::new(10, 60))
    }

    #[test]
    fn test_fallback_quiz_format() {
        let quiz = fallback_quiz(&[card("perro", "pies"), card("gato", "kot")], 5);
        assert_eq!(quiz.len(), 2);
        assert_eq!(quiz[0].question, "Translate 'perro' to pl");
        assert_eq!(quiz[0].question_type, "translation");
        assert_eq!(quiz[0].answer, "pies");
        assert!(quiz[0].options.is_none());

        assert_eq!(fallback_quiz(&[card("perro", "pies"), card("gato", "kot")], 1).len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_service_degrades() {
        let service = disabled();
        assert!(!service.is_enabled());
        assert_eq!(service.provider_name(), "disabled");

        let items = vec![VocabularyItem::new("hola", "es", "cześć", "pl")];
        assert_eq!(service.enrich_flashcards(items.clone(), "pl").await, items);
        assert!(service.extract_vocabulary("hola amigo", "pl").await.is_empty());
        assert!(service.extract_vocabulary_from_image(b"png", "image/png", "pl").await.is_empty());
        assert!(service.generate_hint(&card("hola", "cześć"), "pl").await.is_none());
        assert!(service.translate_items(&items, "en").await.is_err());

        let quiz = service.generate_quiz_questions(&[card("hola", "cześć")], 10).await;
        assert_eq!(quiz.len(), 1);
    }

    #[test]
    fn test_extracted_items_are_filtered() {
        let raw = vec![
            ExtractedItem {
                source_word: "hola".into(),
                source_language: "es".into(),
                translated_word: "cześć".into(),
                native_language: "pl".into(),
            },
            ExtractedItem {
                source_word: "dom".into(),
                source_language: "PL".into(),
                translated_word: "house".into(),
                native_language: "pl".into(),
            },
            ExtractedItem {
                source_word: "Taxi".into(),
                source_language: "es".into(),
                translated_word: "taxi".into(),
                native_language: "pl".into(),
            },
        ];

        let kept = filter_extracted(raw, "pl");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].source_word, "hola");
    }

    #[tokio::test]
    async fn test_cached_extraction_skips_provider() {
        let service = disabled();
        let items = vec![ExtractedItem {
            source_word: "gracias".into(),
            source_language: "es".into(),
            translated_word: "dzięki".into(),
            native_language: String::new(),
        }];
        let key = ResponseCache::key_for("interpret", &["gracias", "pl"]);
        service.cache().insert(key.clone(), serde_json::to_value(&items).unwrap()).await;

        let result: Vec<ExtractedItem> = service
            .cached(key, async { Err(anyhow!("provider must not be called")) })
            .await
            .unwrap();
        let vocabulary = finish_extraction(Ok(result), "pl", "test");
        assert_eq!(vocabulary[0].native_language, "pl");
        assert_eq!(vocabulary[0].translated_word, "dzięki");
    }

    #[test]
    fn test_merge_enrichment_fills_only_missing_fields() {
        let mut with_example = VocabularyItem::new("gato", "es", "kot", "pl");
        with_example.example_sentence = Some("El gato duerme.".to_string());
        let batch = vec![VocabularyItem::new("perro", "es", "pies", "pl"), with_example];

        let payload = EnrichmentPayload {
            items: vec![
                EnrichedItem {
                    source_word: "GATO".into(),
                    example_sentence: Some("Otro gato.".into()),
                    example_sentence_translated: Some("Kot śpi.".into()),
                    difficulty_level: Some("A1".into()),
                },
                EnrichedItem {
                    source_word: "perro".into(),
                    example_sentence: Some("Mi perro.".into()),
                    example_sentence_translated: None,
                    difficulty_level: Some("A2".into()),
                },
            ],
        };

        let merged = merge_enrichment(&batch, payload);
        assert_eq!(merged[0].example_sentence.as_deref(), Some("Mi perro."));
        assert_eq!(merged[0].difficulty_level.as_deref(), Some("A2"));
        assert_eq!(merged[1].example_sentence.as_deref(), Some("El gato duerme."));
        assert_eq!(merged[1].example_sentence_translated.as_deref(), Some("Kot śpi."));
    }

    #[test]
    fn test_hint_payload_accepts_short_field_name() {
        let payload: HintPayload =
            serde_json::from_str(r#"{"hint": "h", "example_sentence": "e", "example_translation": "t"}"#).unwrap();
        assert_eq!(payload.example_sentence_translated.as_deref(), Some("t"));
    }
}
