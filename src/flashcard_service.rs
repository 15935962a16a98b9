use anyhow::Result;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::Instant;
use uuid::Uuid;

use crate::conflict::find_conflict;
use crate::database::{Database, is_unique_violation};
use crate::dedup::deduplicate;
use crate::errors::ApiError;
use crate::language_switch::{LanguageSwitcher, SwitchError};
use crate::llm_service::LLMService;
use crate::models::*;
use crate::normalizer::key_of;
use crate::reconciler::reconcile;
use crate::{log_service_error, log_service_start, log_service_success, log_service_warn, log_validation};

pub const DUPLICATE_FLASHCARD_MESSAGE: &str = "Flashcard already exists for this language pair.";

static WORD_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\p{Alphabetic}+").expect("valid word regex"));

#[derive(Clone)]
pub struct FlashcardService {
    db: Database,
    llm: LLMService,
    defaults: LanguageDefaults,
}

impl FlashcardService {
    pub fn new(db: Database, llm: LLMService, defaults: LanguageDefaults) -> Self {
        Self { db, llm, defaults }
    }

    pub fn defaults(&self) -> &LanguageDefaults {
        &self.defaults
    }

    pub async fn list_flashcards(&self, filter: &FlashcardFilter) -> Result<Vec<Flashcard>> {
        self.db.list_flashcards(filter).await
    }

    pub async fn get_flashcard(&self, id: Uuid) -> Result<Option<Flashcard>> {
        self.db.get_flashcard(id).await
    }

    pub async fn delete_flashcard(&self, id: Uuid) -> Result<bool> {
        self.db.delete_flashcard(id).await
    }

    /// Single manual create. The conflict check and insert share one
    /// transaction; a lost race still surfaces as a duplicate.
    pub async fn create_flashcard(&self, request: CreateFlashcardRequest) -> Result<Flashcard, ApiError> {
        let started = Instant::now();
        let is_manual = request.is_manual.unwrap_or(true);
        let user_id = request.user_id;
        let item = request.into_vocabulary_item(&self.defaults);
        if let Err(reason) = item.validate() {
            log_validation!(failure, "create_flashcard", error = reason);
            return Err(ApiError::ValidationError(reason));
        }

        let key = key_of(&item);
        let mut tx = self.db.begin().await?;
        if find_conflict(&mut tx, &key, None).await?.is_some() {
            return Err(ApiError::DuplicateResource(DUPLICATE_FLASHCARD_MESSAGE.to_string()));
        }

        let card = match Database::insert_flashcard(&mut tx, &item, is_manual, user_id).await {
            Ok(card) => card,
            Err(e) if is_unique_violation(&e) => {
                return Err(ApiError::DuplicateResource(DUPLICATE_FLASHCARD_MESSAGE.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        tx.commit().await?;

        log_service_success!(
            "flashcard_service",
            "create_flashcard",
            flashcard_id = card.id,
            duration_ms = started.elapsed().as_millis() as u64
        );
        Ok(card)
    }

    /// Partial update. Blank optional fields clear the stored value; the new
    /// identity key is checked against every card except this one.
    pub async fn update_flashcard(
        &self,
        id: Uuid,
        request: UpdateFlashcardRequest,
    ) -> Result<Option<Flashcard>, ApiError> {
        let Some(mut card) = self.db.get_flashcard(id).await? else {
            return Ok(None);
        };

        if let Some(word) = request.source_word {
            card.source_word = word.trim().to_string();
        }
        if let Some(word) = request.translated_word {
            card.translated_word = word.trim().to_string();
        }
        if let Some(language) = request.source_language {
            card.source_language = language.trim().to_string();
        }
        if let Some(language) = request.native_language {
            card.native_language = language.trim().to_string();
        }
        if request.example_sentence.is_some() {
            card.example_sentence = trim_optional(&request.example_sentence);
        }
        if request.example_sentence_translated.is_some() {
            card.example_sentence_translated = trim_optional(&request.example_sentence_translated);
        }
        if request.difficulty_level.is_some() {
            card.difficulty_level = trim_optional(&request.difficulty_level);
        }
        if let Some(is_manual) = request.is_manual {
            card.is_manual = is_manual;
        }

        let item = card.to_vocabulary_item();
        if let Err(reason) = item.validate() {
            log_validation!(failure, "update_flashcard", error = reason);
            return Err(ApiError::ValidationError(reason));
        }

        let mut tx = self.db.begin().await?;
        if find_conflict(&mut tx, &key_of(&item), Some(id)).await?.is_some() {
            return Err(ApiError::DuplicateResource(DUPLICATE_FLASHCARD_MESSAGE.to_string()));
        }
        match Database::update_flashcard_on(&mut tx, &card).await {
            Ok(()) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(ApiError::DuplicateResource(DUPLICATE_FLASHCARD_MESSAGE.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        tx.commit().await?;

        Ok(Some(card))
    }

    /// Bulk create; every candidate is checked against the stored set.
    pub async fn bulk_create(&self, requests: Vec<CreateFlashcardRequest>) -> Result<ReconciliationResult> {
        let items = requests
            .into_iter()
            .map(|request| request.into_vocabulary_item(&self.defaults))
            .collect();
        let mut existing_keys = self.db.existing_keys().await?;
        reconcile(&self.db, items, &mut existing_keys).await
    }

    /// Saves reviewed interpret results: merged duplicates first, then bulk insert.
    pub async fn save_interpreted(&self, requests: Vec<CreateFlashcardRequest>) -> Result<ReconciliationResult> {
        let items: Vec<VocabularyItem> = requests
            .into_iter()
            .map(|request| request.into_vocabulary_item(&self.defaults))
            .collect();
        let unique = deduplicate(items);
        let mut existing_keys = self.db.existing_keys().await?;
        reconcile(&self.db, unique, &mut existing_keys).await
    }

    pub async fn enrich_candidates(
        &self,
        requests: Vec<CreateFlashcardRequest>,
        native_language: Option<&str>,
    ) -> Vec<VocabularyItem> {
        let defaults = self.defaults_with_native(native_language);
        let items = requests
            .into_iter()
            .map(|request| request.into_vocabulary_item(&defaults))
            .collect();
        self.llm.enrich_flashcards(items, &defaults.native_language).await
    }

    /// Fills missing examples and difficulty on stored cards and persists them.
    pub async fn enrich_stored(&self, ids: &[Uuid], native_language: Option<&str>) -> Result<Vec<Flashcard>> {
        let started = Instant::now();
        let cards = self.db.get_flashcards_by_ids(ids).await?;
        let (needs, complete): (Vec<Flashcard>, Vec<Flashcard>) = cards
            .into_iter()
            .partition(|card| card.example_sentence.as_deref().is_none_or(|s| s.trim().is_empty()));

        if needs.is_empty() {
            return Ok(complete);
        }

        let native = native_language
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(self.defaults.native_language.as_str())
            .to_string();
        let items = needs.iter().map(Flashcard::to_vocabulary_item).collect();
        let enriched = self.llm.enrich_flashcards(items, &native).await;

        let mut updated = complete;
        for (mut card, item) in needs.into_iter().zip(enriched) {
            let changed = card.example_sentence != item.example_sentence
                || card.example_sentence_translated != item.example_sentence_translated
                || card.difficulty_level != item.difficulty_level;
            if changed {
                card.example_sentence = item.example_sentence;
                card.example_sentence_translated = item.example_sentence_translated;
                card.difficulty_level = item.difficulty_level;
                self.db.update_flashcard(&card).await?;
            }
            updated.push(card);
        }

        log_service_success!(
            "flashcard_service",
            "enrich_stored",
            format!("{} cards in {}ms", updated.len(), started.elapsed().as_millis())
        );
        Ok(updated)
    }

    pub async fn switch_language(&self, request: SwitchLanguageRequest) -> Result<SwitchResult, SwitchError> {
        LanguageSwitcher::new(&self.db, &self.llm)
            .switch(request.flashcard_ids.as_deref(), &request.target_language, request.force)
            .await
    }

    /// Turns text or an image into reviewed-ready candidates and records the job.
    pub async fn interpret(
        &self,
        request: InterpretRequest,
        content_type: Option<&str>,
    ) -> Result<InterpretResponse, ApiError> {
        let input = if let Some(encoded) = request.image_base64.as_deref().filter(|v| !v.trim().is_empty()) {
            let image = BASE64
                .decode(strip_data_url(encoded.trim()))
                .map_err(|e| ApiError::BadRequest(format!("image_base64 is not valid base64: {}", e)))?;
            InterpretInput::Image {
                data: image,
                mime_type: request.mime_type.unwrap_or_else(|| "image/png".to_string()),
            }
        } else {
            InterpretInput::Text(request.text.unwrap_or_default())
        };

        self.run_interpret(input, request.native_language.as_deref(), None, content_type)
            .await
    }

    /// Interprets an uploaded file: `text/*` is read as UTF-8, images and PDFs
    /// go to the vision extractor. Other types are rejected.
    pub async fn interpret_upload(
        &self,
        upload: InterpretUpload,
        native_language: Option<&str>,
    ) -> Result<InterpretResponse, ApiError> {
        let mime_type = upload_mime_type(&upload);
        let input = if mime_type.starts_with("text/") {
            InterpretInput::Text(String::from_utf8_lossy(&upload.data).into_owned())
        } else if VISION_MIME_TYPES.contains(&mime_type.as_str()) {
            InterpretInput::Image {
                data: upload.data,
                mime_type: mime_type.clone(),
            }
        } else {
            return Err(ApiError::BadRequest(format!("Unsupported file type: {}", mime_type)));
        };

        self.run_interpret(input, native_language, upload.filename.as_deref(), Some(&mime_type))
            .await
    }

    async fn run_interpret(
        &self,
        input: InterpretInput,
        native_language: Option<&str>,
        filename: Option<&str>,
        content_type: Option<&str>,
    ) -> Result<InterpretResponse, ApiError> {
        let defaults = self.defaults_with_native(native_language);
        let native = defaults.native_language.clone();

        let candidates = match input {
            InterpretInput::Image { data, mime_type } => {
                if data.is_empty() {
                    return Err(ApiError::ValidationError("No text or image provided".to_string()));
                }
                log_service_start!("flashcard_service", "interpret_image");
                self.llm.extract_vocabulary_from_image(&data, &mime_type, &native).await
            }
            InterpretInput::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(ApiError::ValidationError("No text or image provided".to_string()));
                }
                log_service_start!("flashcard_service", "interpret_text");

                let extracted = self.llm.extract_vocabulary(text, &native).await;
                if extracted.is_empty() {
                    if self.llm.is_enabled() {
                        log_service_warn!("flashcard_service", "interpret", "AI extraction empty, tokenizing locally");
                    }
                    tokenize_candidates(text, &defaults)
                } else {
                    extracted
                }
            }
        };

        let unique = deduplicate(candidates);
        let items = self.llm.enrich_flashcards(unique, &native).await;

        let summary = serde_json::to_string(&items).ok();
        let job = self
            .db
            .create_interpret_job(filename, content_type, summary)
            .await
            .inspect_err(|e| {
                log_service_error!("flashcard_service", "interpret", error = e);
            })?;

        Ok(InterpretResponse {
            items,
            job_id: Some(job.id),
            original_filename: job.original_filename,
        })
    }

    fn defaults_with_native(&self, native_language: Option<&str>) -> LanguageDefaults {
        match native_language.map(str::trim).filter(|v| !v.is_empty()) {
            Some(native) => LanguageDefaults {
                source_language: self.defaults.source_language.clone(),
                native_language: native.to_string(),
            },
            None => self.defaults.clone(),
        }
    }
}

/// Local fallback: unique lowercase alphabetic tokens, sorted, with the word
/// itself as a placeholder translation until the learner edits it.
pub fn tokenize_candidates(text: &str, defaults: &LanguageDefaults) -> Vec<VocabularyItem> {
    let words: BTreeSet<String> = WORD_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect();

    words
        .into_iter()
        .map(|word| {
            VocabularyItem::new(
                word.clone(),
                defaults.source_language.clone(),
                word,
                defaults.native_language.clone(),
            )
        })
        .collect()
}

enum InterpretInput {
    Text(String),
    Image { data: Vec<u8>, mime_type: String },
}

const VISION_MIME_TYPES: &[&str] = &["image/png", "image/jpeg", "image/webp", "application/pdf"];

/// Declared content type without parameters, or a guess from the file extension.
fn upload_mime_type(upload: &InterpretUpload) -> String {
    let declared = upload
        .content_type
        .as_deref()
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_lowercase())
        .filter(|ct| !ct.is_empty() && ct != "application/octet-stream");
    if let Some(declared) = declared {
        return declared;
    }

    let extension = upload
        .filename
        .as_deref()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "txt" | "md" => "text/plain",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
    .to_string()
}

fn strip_data_url(encoded: &str) -> &str {
    match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response_cache::ResponseCache;

    async fn create_test_service() -> FlashcardService {
        let db = Database::new("sqlite::memory:").await.unwrap();
        FlashcardService::new(
            db,
            LLMService::disabled(ResponseCache::new(10, 60)),
            LanguageDefaults::default(),
        )
    }

    fn request(word: &str, translation: &str) -> CreateFlashcardRequest {
        CreateFlashcardRequest {
            source_word: word.to_string(),
            translated_word: translation.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_applies_defaults_and_rejects_duplicates() {
        let service = create_test_service().await;
        let card = service.create_flashcard(request(" Hola ", "cześć")).await.unwrap();
        assert_eq!(card.source_word, "Hola");
        assert_eq!(card.source_language, "es");
        assert_eq!(card.native_language, "pl");
        assert!(card.is_manual);

        let err = service.create_flashcard(request("hola", "witaj")).await.unwrap_err();
        assert!(matches!(err, ApiError::DuplicateResource(ref m) if m == DUPLICATE_FLASHCARD_MESSAGE));
    }

    #[tokio::test]
    async fn test_create_validates_input() {
        let service = create_test_service().await;
        let err = service.create_flashcard(request("", "cześć")).await.unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));

        let mut long_language = request("hola", "cześć");
        long_language.source_language = Some("x".repeat(11));
        let err = service.create_flashcard(long_language).await.unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_update_checks_conflicts_excluding_self() {
        let service = create_test_service().await;
        let hola = service.create_flashcard(request("hola", "cześć")).await.unwrap();
        let adios = service.create_flashcard(request("adiós", "do widzenia")).await.unwrap();

        let same_key = service
            .update_flashcard(
                hola.id,
                UpdateFlashcardRequest {
                    source_word: Some("HOLA".to_string()),
                    example_sentence: Some("¡Hola!".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(same_key.source_word, "HOLA");
        assert_eq!(same_key.example_sentence.as_deref(), Some("¡Hola!"));

        let err = service
            .update_flashcard(
                adios.id,
                UpdateFlashcardRequest {
                    source_word: Some("hola".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::DuplicateResource(_)));

        let missing = service
            .update_flashcard(Uuid::new_v4(), UpdateFlashcardRequest::default())
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_save_interpreted_merges_before_insert() {
        let service = create_test_service().await;
        let mut with_example = request("casa", "");
        with_example.example_sentence = Some("Mi casa.".to_string());

        let result = service
            .save_interpreted(vec![request("casa", "dom"), with_example, request("perro", "pies")])
            .await
            .unwrap();

        assert_eq!(result.created_count, 2);
        assert_eq!(result.skipped_count, 0);
        let casa = result.created.iter().find(|c| c.source_word == "casa").unwrap();
        assert_eq!(casa.example_sentence.as_deref(), Some("Mi casa."));
        assert!(!casa.is_manual);
    }

    #[tokio::test]
    async fn test_interpret_falls_back_to_tokenizing() {
        let service = create_test_service().await;
        let response = service
            .interpret(
                InterpretRequest {
                    text: Some("Hola amigo, hola!".to_string()),
                    ..Default::default()
                },
                Some("application/json"),
            )
            .await
            .unwrap();

        let words: Vec<&str> = response.items.iter().map(|i| i.source_word.as_str()).collect();
        assert_eq!(words, vec!["amigo", "hola"]);
        assert_eq!(response.items[0].translated_word, "amigo");
        assert!(response.job_id.is_some());
    }

    #[tokio::test]
    async fn test_interpret_rejects_empty_and_bad_image() {
        let service = create_test_service().await;
        let err = service
            .interpret(InterpretRequest { text: Some("   ".into()), ..Default::default() }, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));

        let err = service
            .interpret(
                InterpretRequest {
                    image_base64: Some("***".into()),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn test_tokenize_candidates_handles_accents() {
        let items = tokenize_candidates("¿Qué tal? Año, año 2024.", &LanguageDefaults::default());
        let words: Vec<&str> = items.iter().map(|i| i.source_word.as_str()).collect();
        assert_eq!(words, vec!["año", "qué", "tal"]);
        assert!(items.iter().all(|i| i.source_language == "es" && i.native_language == "pl"));
    }

    #[test]
    fn test_strip_data_url() {
        assert_eq!(strip_data_url("data:image/png;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_url("QUJD"), "QUJD");
    }

    #[tokio::test]
    async fn test_enrich_stored_without_ai_returns_cards_unchanged() {
        let service = create_test_service().await;
        let card = service.create_flashcard(request("gato", "kot")).await.unwrap();
        let result = service.enrich_stored(&[card.id], None).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].example_sentence, None);
    }

    fn upload(filename: &str, content_type: Option<&str>, data: &[u8]) -> InterpretUpload {
        InterpretUpload {
            filename: Some(filename.to_string()),
            content_type: content_type.map(str::to_string),
            data: data.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_interpret_upload_reads_text_files() {
        let service = create_test_service().await;

        let response = service
            .interpret_upload(upload("notes.txt", Some("text/plain; charset=utf-8"), "Perro gato".as_bytes()), None)
            .await
            .unwrap();
        let words: Vec<&str> = response.items.iter().map(|i| i.source_word.as_str()).collect();
        assert_eq!(words, vec!["gato", "perro"]);
        assert_eq!(response.original_filename.as_deref(), Some("notes.txt"));

        let guessed = service
            .interpret_upload(upload("list.md", Some("application/octet-stream"), b"casa"), Some("en"))
            .await
            .unwrap();
        assert_eq!(guessed.items.len(), 1);
        assert_eq!(guessed.items[0].native_language, "en");
    }

    #[tokio::test]
    async fn test_interpret_upload_rejects_unsupported_and_empty_files() {
        let service = create_test_service().await;

        let docx = service
            .interpret_upload(upload("essay.docx", None, b"PK\x03\x04"), None)
            .await
            .unwrap_err();
        assert!(matches!(docx, ApiError::BadRequest(ref m) if m.contains("Unsupported")));

        let empty_image = service
            .interpret_upload(upload("photo.png", Some("image/png"), b""), None)
            .await
            .unwrap_err();
        assert!(matches!(empty_image, ApiError::ValidationError(_)));

        let image = service
            .interpret_upload(upload("photo.jpg", None, &[0xff, 0xd8, 0xff]), None)
            .await
            .unwrap();
        assert!(image.items.is_empty());
        assert_eq!(image.original_filename.as_deref(), Some("photo.jpg"));
    }

    #[tokio::test]
    async fn test_enrich_candidates_applies_requested_native_language() {
        let service = create_test_service().await;
        let items = service
            .enrich_candidates(vec![request(" libro ", "book")], Some("en"))
            .await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source_word, "libro");
        assert_eq!(items[0].source_language, "es");
        assert_eq!(items[0].native_language, "en");
    }
}
