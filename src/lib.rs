pub mod api;
pub mod config;
pub mod conflict;
pub mod database;
pub mod dedup;
pub mod errors;
pub mod flashcard_service;
pub mod language_switch;
pub mod llm_providers;
pub mod llm_service;
pub mod logging;
pub mod models;
pub mod normalizer;
pub mod quiz_service;
pub mod reconciler;
pub mod response_cache;
pub mod user_service;

pub use database::Database;
pub use errors::*;
pub use flashcard_service::FlashcardService;
pub use language_switch::{FlashcardTranslator, LanguageSwitcher, SwitchError};
pub use llm_providers::{JsonResponseParser, LLMProvider, LLMProviderFactory, LLMProviderType};
pub use llm_service::LLMService;
pub use models::*;
pub use quiz_service::QuizService;
pub use response_cache::ResponseCache;
pub use user_service::UserService;
