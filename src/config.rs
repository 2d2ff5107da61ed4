//! Runtime configuration from the environment (`.env` supported).

use crate::error::{AssistantError, Result};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// API key for the chat-completions endpoint.
    pub api_key: String,
    /// Base URL of the endpoint, without the `/chat/completions` suffix.
    pub base_url: String,
    /// Model name sent with every request.
    pub model: String,
    /// Postgres connection string; the in-memory backend is used when unset.
    pub database_url: Option<String>,
    /// Location of the sqlite audit log.
    pub log_path: PathBuf,
    /// Timeout applied to every language-model call.
    pub llm_timeout: Duration,
    /// Timeout applied to every database call.
    pub db_timeout: Duration,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(Self {
            api_key: std::env::var("LLM_API_KEY").unwrap_or_else(|_| "dummy-api-key".to_string()),
            base_url: std::env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4".to_string()),
            database_url: std::env::var("DATABASE_URL").ok(),
            log_path: std::env::var("QUERY_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("query_logs.sqlite")),
            llm_timeout: Duration::from_secs(env_secs("LLM_TIMEOUT_SECS", 30)?),
            db_timeout: Duration::from_secs(env_secs("DB_TIMEOUT_SECS", 10)?),
        })
    }
}

fn env_secs(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|_| AssistantError::Config(format!("{} must be a whole number of seconds, got '{}'", name, raw))),
        Err(_) => Ok(default),
    }
}
