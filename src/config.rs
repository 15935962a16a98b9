use anyhow::{Result, anyhow};
use serde::Deserialize;
use std::env;
use tracing::{info, warn};

use crate::llm_providers::LLMProviderType;
use crate::models::LanguageDefaults;

use crate::{log_system_event, log_validation};

/// Placeholder shipped in sample `.env` files; treated as "no key".
pub const PLACEHOLDER_API_KEY: &str = "your-api-key";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub llm: LLMConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub languages: LanguageDefaults,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    /// `None` disables every AI feature.
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub provider: LLMProviderType,
    pub model: Option<String>,
    pub vision_model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub console_enabled: bool,
    pub log_directory: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub ttl_minutes: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        log_system_event!(config, "Loading application configuration from environment variables");

        let config = Config {
            database: DatabaseConfig::from_env()?,
            llm: LLMConfig::from_env()?,
            server: ServerConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            languages: language_defaults_from_env(),
            cache: CacheConfig::from_env()?,
        };

        log_system_event!(config, "Configuration loaded successfully");
        config.log_configuration_summary();

        Ok(config)
    }

    /// Summary without secrets
    fn log_configuration_summary(&self) {
        info!(
            database_url_masked = %mask_sensitive_data(&self.database.url),
            llm_provider = %self.llm.provider,
            llm_model = ?self.llm.model,
            llm_enabled = self.llm.api_key.is_some(),
            server_address = %format!("{}:{}", self.server.host, self.server.port),
            log_level = %self.logging.level,
            default_source_language = %self.languages.source_language,
            default_native_language = %self.languages.native_language,
            cache_max_entries = self.cache.max_entries,
            "Configuration summary"
        );
    }

    pub fn validate(&self) -> Result<()> {
        if !self.database.url.starts_with("sqlite:") {
            return Err(anyhow!("DATABASE_URL must start with 'sqlite:'"));
        }

        if self.server.port == 0 {
            return Err(anyhow!("Server port must be greater than 0"));
        }

        if self.languages.source_language.trim().is_empty() || self.languages.native_language.trim().is_empty() {
            return Err(anyhow!("Default languages must not be empty"));
        }

        if self.llm.api_key.is_none() {
            warn!("LLM API key not configured - AI features disabled, local fallbacks in use");
        }

        let level = self.logging.level.to_lowercase();
        let base_level = level.split(',').next().unwrap_or_default();
        if !["trace", "debug", "info", "warn", "error"].contains(&base_level) {
            warn!("Invalid log level '{}', using 'info' as fallback", self.logging.level);
        }

        log_validation!(success, "configuration", "Configuration validation completed successfully");
        Ok(())
    }
}

impl DatabaseConfig {
    fn from_env() -> Result<Self> {
        let url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:bolmate.db".to_string());
        Ok(DatabaseConfig { url })
    }
}

impl LLMConfig {
    fn from_env() -> Result<Self> {
        let api_key = env::var("LLM_API_KEY")
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty() && key != PLACEHOLDER_API_KEY);

        let provider_str = env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let provider = parse_provider(&provider_str);

        Ok(LLMConfig {
            api_key,
            base_url: env::var("LLM_BASE_URL").ok(),
            provider,
            model: env::var("LLM_MODEL").ok(),
            vision_model: env::var("LLM_VISION_MODEL").ok(),
        })
    }
}

fn parse_provider(value: &str) -> LLMProviderType {
    match value.to_lowercase().as_str() {
        "gemini" | "google" => LLMProviderType::Gemini,
        "openai" | "chatgpt" | "gpt" => LLMProviderType::OpenAI,
        _ => {
            info!("Unknown LLM provider '{}', defaulting to OpenAI", value);
            LLMProviderType::OpenAI
        }
    }
}

impl ServerConfig {
    fn from_env() -> Result<Self> {
        let port_str = env::var("PORT").unwrap_or_else(|_| "5000".to_string());
        let port = port_str
            .parse::<u16>()
            .map_err(|_| anyhow!("Invalid PORT value: '{}'. Must be a number between 1-65535", port_str))?;

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        Ok(ServerConfig { port, host })
    }
}

impl LoggingConfig {
    fn from_env() -> Result<Self> {
        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info,bolmate=debug".to_string());

        let file_enabled = env::var("LOG_FILE_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let console_enabled = env::var("LOG_CONSOLE_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let log_directory = env::var("LOG_DIRECTORY").unwrap_or_else(|_| "logs".to_string());

        Ok(LoggingConfig {
            level,
            file_enabled,
            console_enabled,
            log_directory,
        })
    }
}

impl CacheConfig {
    fn from_env() -> Result<Self> {
        let max_entries = parse_env("AI_CACHE_MAX_ENTRIES", 1000usize)?;
        let ttl_minutes = parse_env("AI_CACHE_TTL_MINUTES", 60i64)?;
        Ok(CacheConfig { max_entries, ttl_minutes })
    }
}

fn language_defaults_from_env() -> LanguageDefaults {
    let defaults = LanguageDefaults::default();
    LanguageDefaults {
        source_language: non_empty_env("DEFAULT_SOURCE_LANGUAGE").unwrap_or(defaults.source_language),
        native_language: non_empty_env("DEFAULT_NATIVE_LANGUAGE").unwrap_or(defaults.native_language),
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| anyhow!("Invalid {} value: '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

/// Mask secrets for logging
fn mask_sensitive_data(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}***{}", head, tail)
    }
}
