use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_WORD_LENGTH: usize = 255;
pub const MAX_LANGUAGE_LENGTH: usize = 10;
pub const MAX_SENTENCE_LENGTH: usize = 512;
pub const MAX_DIFFICULTY_LENGTH: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// A vocabulary pair as it travels between the interpret flow, bulk creation
/// and the AI collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyItem {
    pub source_word: String,
    pub source_language: String,
    #[serde(default)]
    pub translated_word: String,
    pub native_language: String,
    #[serde(default)]
    pub example_sentence: Option<String>,
    #[serde(default)]
    pub example_sentence_translated: Option<String>,
    #[serde(default)]
    pub difficulty_level: Option<String>,
}

impl VocabularyItem {
    pub fn new(
        source_word: impl Into<String>,
        source_language: impl Into<String>,
        translated_word: impl Into<String>,
        native_language: impl Into<String>,
    ) -> Self {
        Self {
            source_word: source_word.into(),
            source_language: source_language.into(),
            translated_word: translated_word.into(),
            native_language: native_language.into(),
            example_sentence: None,
            example_sentence_translated: None,
            difficulty_level: None,
        }
    }

    /// Checks required fields and the column limits of the flashcards table.
    pub fn validate(&self) -> Result<(), String> {
        if self.source_word.trim().is_empty() {
            return Err("source_word is required".to_string());
        }
        if self.translated_word.trim().is_empty() {
            return Err(format!("translated_word is required for '{}'", self.source_word.trim()));
        }
        if self.source_language.trim().is_empty() || self.native_language.trim().is_empty() {
            return Err(format!("languages are required for '{}'", self.source_word.trim()));
        }
        check_length("source_word", &self.source_word, MAX_WORD_LENGTH)?;
        check_length("translated_word", &self.translated_word, MAX_WORD_LENGTH)?;
        check_length("source_language", &self.source_language, MAX_LANGUAGE_LENGTH)?;
        check_length("native_language", &self.native_language, MAX_LANGUAGE_LENGTH)?;
        if let Some(sentence) = &self.example_sentence {
            check_length("example_sentence", sentence, MAX_SENTENCE_LENGTH)?;
        }
        if let Some(sentence) = &self.example_sentence_translated {
            check_length("example_sentence_translated", sentence, MAX_SENTENCE_LENGTH)?;
        }
        if let Some(level) = &self.difficulty_level {
            check_length("difficulty_level", level, MAX_DIFFICULTY_LENGTH)?;
        }
        Ok(())
    }

    /// Trimmed copy; blank optional fields become `None`.
    pub fn trimmed(&self) -> Self {
        Self {
            source_word: self.source_word.trim().to_string(),
            source_language: self.source_language.trim().to_string(),
            translated_word: self.translated_word.trim().to_string(),
            native_language: self.native_language.trim().to_string(),
            example_sentence: trim_optional(&self.example_sentence),
            example_sentence_translated: trim_optional(&self.example_sentence_translated),
            difficulty_level: trim_optional(&self.difficulty_level),
        }
    }
}

fn check_length(field: &str, value: &str, max: usize) -> Result<(), String> {
    let len = value.trim().chars().count();
    if len > max {
        return Err(format!("{} must be at most {} characters (got {})", field, max, len));
    }
    Ok(())
}

pub(crate) fn trim_optional(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flashcard {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub source_word: String,
    pub source_language: String,
    pub translated_word: String,
    pub native_language: String,
    pub example_sentence: Option<String>,
    pub example_sentence_translated: Option<String>,
    pub difficulty_level: Option<String>,
    pub is_manual: bool,
    pub correct_count: i64,
    pub incorrect_count: i64,
    pub created_at: DateTime<Utc>,
}

impl Flashcard {
    pub fn to_vocabulary_item(&self) -> VocabularyItem {
        VocabularyItem {
            source_word: self.source_word.clone(),
            source_language: self.source_language.clone(),
            translated_word: self.translated_word.clone(),
            native_language: self.native_language.clone(),
            example_sentence: self.example_sentence.clone(),
            example_sentence_translated: self.example_sentence_translated.clone(),
            difficulty_level: self.difficulty_level.clone(),
        }
    }
}

/// Incoming flashcard payload; missing languages fall back to the configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateFlashcardRequest {
    #[serde(default)]
    pub source_word: String,
    #[serde(default)]
    pub translated_word: String,
    pub source_language: Option<String>,
    pub native_language: Option<String>,
    pub example_sentence: Option<String>,
    pub example_sentence_translated: Option<String>,
    pub difficulty_level: Option<String>,
    pub is_manual: Option<bool>,
    pub user_id: Option<Uuid>,
}

impl CreateFlashcardRequest {
    pub fn into_vocabulary_item(self, defaults: &LanguageDefaults) -> VocabularyItem {
        let source_language = trim_optional(&self.source_language)
            .unwrap_or_else(|| defaults.source_language.clone());
        let native_language = trim_optional(&self.native_language)
            .unwrap_or_else(|| defaults.native_language.clone());

        VocabularyItem {
            source_word: self.source_word,
            source_language,
            translated_word: self.translated_word,
            native_language,
            example_sentence: self.example_sentence,
            example_sentence_translated: self.example_sentence_translated,
            difficulty_level: self.difficulty_level,
        }
        .trimmed()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateFlashcardRequest {
    pub source_word: Option<String>,
    pub translated_word: Option<String>,
    pub source_language: Option<String>,
    pub native_language: Option<String>,
    pub example_sentence: Option<String>,
    pub example_sentence_translated: Option<String>,
    pub difficulty_level: Option<String>,
    pub is_manual: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashcardFilter {
    pub source_language: Option<String>,
    pub native_language: Option<String>,
    pub difficulty_level: Option<String>,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkCreateFlashcardsRequest {
    pub flashcards: Vec<CreateFlashcardRequest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub created: Vec<Flashcard>,
    pub created_count: usize,
    pub skipped_count: usize,
    pub error_details: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchLanguageRequest {
    #[serde(default)]
    pub target_language: String,
    pub flashcard_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchResult {
    pub affected: Vec<Flashcard>,
    pub translated_count: usize,
    pub skipped_count: usize,
    pub force_retranslate: bool,
    pub translation_fallback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichCandidatesRequest {
    pub candidates: Vec<CreateFlashcardRequest>,
    pub native_language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichFlashcardsRequest {
    pub ids: Vec<Uuid>,
    pub native_language: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizMode {
    /// Learner types the native-language translation.
    #[default]
    Translation,
    /// Learner types the source word.
    Reverse,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuizQuery {
    pub source_language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizAnswerRequest {
    pub flashcard_id: Option<Uuid>,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub mode: QuizMode,
    pub native_language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuizHint {
    pub hint: Option<String>,
    pub example_sentence: Option<String>,
    pub example_sentence_translated: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizAnswerResponse {
    pub correct: bool,
    pub correct_answer: String,
    pub flashcard: Flashcard,
    pub hint: Option<QuizHint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateQuizRequest {
    pub num_questions: Option<usize>,
    pub source_language: Option<String>,
    pub native_language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedQuizQuestion {
    pub question: String,
    #[serde(rename = "type")]
    pub question_type: String,
    pub answer: String,
    #[serde(default)]
    pub options: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedQuiz {
    pub questions: Vec<GeneratedQuizQuestion>,
    pub native_language: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterpretRequest {
    pub text: Option<String>,
    pub image_base64: Option<String>,
    pub mime_type: Option<String>,
    pub native_language: Option<String>,
}

/// A file received as a multipart upload.
#[derive(Debug, Clone, Default)]
pub struct InterpretUpload {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpretResponse {
    pub items: Vec<VocabularyItem>,
    pub job_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveInterpretedRequest {
    pub flashcards: Vec<CreateFlashcardRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpretJob {
    pub id: Uuid,
    pub original_filename: Option<String>,
    pub content_type: Option<String>,
    pub status: String,
    pub result_summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Language {
    pub code: String,
    pub label: String,
}

/// Languages fallback when a request leaves them out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LanguageDefaults {
    pub source_language: String,
    pub native_language: String,
}

impl Default for LanguageDefaults {
    fn default() -> Self {
        Self {
            source_language: "es".to_string(),
            native_language: "pl".to_string(),
        }
    }
}

pub fn supported_languages() -> Vec<Language> {
    [
        ("pl", "Polish"),
        ("en", "English"),
        ("es", "Spanish"),
        ("de", "German"),
        ("fr", "French"),
        ("nl", "Dutch"),
    ]
    .into_iter()
    .map(|(code, label)| Language {
        code: code.to_string(),
        label: label.to_string(),
    })
    .collect()
}
