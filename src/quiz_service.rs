use anyhow::Result;

use crate::database::Database;
use crate::errors::ApiError;
use crate::llm_service::LLMService;
use crate::models::*;
use crate::normalizer::same_text;

pub const MAX_QUIZ_QUESTIONS: usize = 50;
pub const DEFAULT_QUIZ_QUESTIONS: usize = 5;

#[derive(Clone)]
pub struct QuizService {
    db: Database,
    llm: LLMService,
    defaults: LanguageDefaults,
}

impl QuizService {
    pub fn new(db: Database, llm: LLMService, defaults: LanguageDefaults) -> Self {
        Self { db, llm, defaults }
    }

    pub async fn next_flashcard(&self, source_language: Option<&str>) -> Result<Option<Flashcard>> {
        Ok(self.db.random_flashcards(source_language, 1).await?.into_iter().next())
    }

    /// Grades an answer, bumps the matching counter and attaches a hint when
    /// the AI collaborator has one. `Ok(None)` means the card does not exist.
    pub async fn submit_answer(&self, request: QuizAnswerRequest) -> Result<Option<QuizAnswerResponse>, ApiError> {
        let flashcard_id = request
            .flashcard_id
            .ok_or_else(|| ApiError::ValidationError("flashcard_id is required".to_string()))?;

        let Some(card) = self.db.get_flashcard(flashcard_id).await? else {
            return Ok(None);
        };

        let expected = match request.mode {
            QuizMode::Translation => card.translated_word.clone(),
            QuizMode::Reverse => card.source_word.clone(),
        };
        let correct = same_text(&request.answer, &expected);

        let Some(updated) = self.db.record_quiz_answer(flashcard_id, correct).await? else {
            return Ok(None);
        };

        let native_language = request
            .native_language
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(self.defaults.native_language.as_str());
        let hint = self.llm.generate_hint(&updated, native_language).await;

        Ok(Some(QuizAnswerResponse {
            correct,
            correct_answer: expected,
            flashcard: updated,
            hint,
        }))
    }

    /// Random cards turned into questions. `Ok(None)` when no card matches.
    pub async fn generate_quiz(&self, request: GenerateQuizRequest) -> Result<Option<GeneratedQuiz>, ApiError> {
        let num_questions = request.num_questions.unwrap_or(DEFAULT_QUIZ_QUESTIONS);
        if !(1..=MAX_QUIZ_QUESTIONS).contains(&num_questions) {
            return Err(ApiError::ValidationError(format!(
                "num_questions must be between 1 and {}",
                MAX_QUIZ_QUESTIONS
            )));
        }

        let cards = self
            .db
            .random_flashcards(request.source_language.as_deref(), num_questions)
            .await?;
        if cards.is_empty() {
            return Ok(None);
        }

        let questions = self.llm.generate_quiz_questions(&cards, num_questions).await;
        let native_language = request
            .native_language
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.defaults.native_language.clone());

        Ok(Some(GeneratedQuiz {
            questions,
            native_language,
        }))
    }
}
