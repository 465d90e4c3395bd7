use dotenvy::dotenv;
use std::env;

use crate::error::ConfigError;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_SEARCH_URL: &str = "https://html.duckduckgo.com/html/";
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";

#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub search_url: String,
    pub allowed_origin: String,
    pub fetch_concurrency: usize,
}

impl Config {
    /// Reads configuration from the process environment, loading `.env` first if present.
    pub fn from_env() -> Result<Config, ConfigError> {
        dotenv().ok();
        Ok(Config {
            openai_api_key: get_env("OPENAI_API_KEY")?,
            openai_base_url: get_env_or_default("OPENAI_BASE_URL", DEFAULT_OPENAI_BASE_URL),
            search_url: get_env_or_default("SEARCH_URL", DEFAULT_SEARCH_URL),
            allowed_origin: get_env_or_default("ALLOWED_ORIGIN", DEFAULT_ALLOWED_ORIGIN),
            fetch_concurrency: parse_concurrency(&get_env_or_default("FETCH_CONCURRENCY", "1"))?,
        })
    }
}

fn get_env(key: &str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::Missing(key.to_string()))
}

fn get_env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_concurrency(value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(ConfigError::Invalid {
            key: "FETCH_CONCURRENCY".to_string(),
            value: value.to_string(),
        }),
    }
}
