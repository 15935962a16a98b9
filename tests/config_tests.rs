use std::env;
use std::sync::Mutex;

use bolmate::LLMProviderType;
use bolmate::config::Config;

// Environment variables are process-wide; tests touching them run one at a time.
static ENV_LOCK: Mutex<()> = Mutex::new(());

const VARS: &[&str] = &[
    "DATABASE_URL",
    "LLM_API_KEY",
    "LLM_PROVIDER",
    "LLM_MODEL",
    "PORT",
    "DEFAULT_SOURCE_LANGUAGE",
    "DEFAULT_NATIVE_LANGUAGE",
    "AI_CACHE_MAX_ENTRIES",
    "AI_CACHE_TTL_MINUTES",
];

fn clear_env() {
    for var in VARS {
        unsafe { env::remove_var(var) };
    }
}

fn set(var: &str, value: &str) {
    unsafe { env::set_var(var, value) };
}

#[test]
fn test_defaults_without_environment() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.url, "sqlite:bolmate.db");
    assert_eq!(config.server.port, 5000);
    assert!(config.llm.api_key.is_none());
    assert_eq!(config.llm.provider, LLMProviderType::OpenAI);
    assert_eq!(config.languages.source_language, "es");
    assert_eq!(config.languages.native_language, "pl");
    assert_eq!(config.cache.max_entries, 1000);
    assert_eq!(config.cache.ttl_minutes, 60);
    assert!(config.validate().is_ok());
}

#[test]
fn test_placeholder_api_key_disables_ai() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    set("LLM_API_KEY", "your-api-key");
    assert!(Config::from_env().unwrap().llm.api_key.is_none());

    set("LLM_API_KEY", "   ");
    assert!(Config::from_env().unwrap().llm.api_key.is_none());

    set("LLM_API_KEY", "sk-real-key");
    set("LLM_PROVIDER", "Google");
    let config = Config::from_env().unwrap();
    assert_eq!(config.llm.api_key.as_deref(), Some("sk-real-key"));
    assert_eq!(config.llm.provider, LLMProviderType::Gemini);

    clear_env();
}

#[test]
fn test_language_defaults_from_environment() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    set("DEFAULT_SOURCE_LANGUAGE", " DE ");
    set("DEFAULT_NATIVE_LANGUAGE", "EN");
    let config = Config::from_env().unwrap();
    assert_eq!(config.languages.source_language, "de");
    assert_eq!(config.languages.native_language, "en");

    set("DEFAULT_SOURCE_LANGUAGE", "");
    assert_eq!(Config::from_env().unwrap().languages.source_language, "es");

    clear_env();
}

#[test]
fn test_invalid_values_are_rejected() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    set("PORT", "not-a-port");
    assert!(Config::from_env().is_err());
    set("PORT", "70000");
    assert!(Config::from_env().is_err());
    unsafe { env::remove_var("PORT") };

    set("AI_CACHE_MAX_ENTRIES", "-5");
    assert!(Config::from_env().is_err());
    unsafe { env::remove_var("AI_CACHE_MAX_ENTRIES") };

    set("DATABASE_URL", "postgres://localhost/bolmate");
    let config = Config::from_env().unwrap();
    assert!(config.validate().is_err());

    clear_env();
}
