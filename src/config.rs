//! Runtime configuration
//!
//! Read once from the environment into an explicit immutable struct.
//! No process-wide mutable singletons; everything downstream receives
//! its configuration through constructors.

use crate::error::{CoreError, Result};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// API key for the model gateway
    pub model_api_key: String,
    /// Base URL for the chat-completions endpoint
    pub model_api_base: String,
    /// Base URL for the market-data collaborator service, if configured
    pub market_api_base: Option<String>,
    /// Maximum model consultations per session within the sliding window
    pub ops_per_min: usize,
    /// Maximum rounds (model consultations) per turn
    pub max_rounds: u32,
    /// Per external call timeout (gateway and each tool)
    pub call_timeout: Duration,
    /// Directory of markdown corpus documents to index at startup
    pub knowledge_dir: Option<std::path::PathBuf>,
    /// JSON file overriding the built-in model price table
    pub price_table_path: Option<std::path::PathBuf>,
    /// Whether the web_search tool is registered
    pub enable_web_search: bool,
    /// HTTP port for the presentation boundary
    pub port: u16,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            model_api_key: String::new(),
            model_api_base: "https://api.openai.com/v1/chat/completions".to_string(),
            market_api_base: None,
            knowledge_dir: None,
            price_table_path: None,
            ops_per_min: 20,
            max_rounds: 6,
            call_timeout: Duration::from_secs(30),
            enable_web_search: false,
            port: 8080,
        }
    }
}

impl CoreConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for everything except the model API key.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let model_api_key = env::var("MODEL_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .map_err(|_| {
                CoreError::ConfigError("MODEL_API_KEY (or OPENAI_API_KEY) is not set".to_string())
            })?;

        let ops_per_min = parse_env("OPS_PER_MIN", defaults.ops_per_min)?;
        let max_rounds = parse_env("MAX_ROUNDS", defaults.max_rounds)?;
        let timeout_secs = parse_env("CALL_TIMEOUT_SECS", 30u64)?;
        let port = parse_env("PORT", defaults.port)?;

        Ok(Self {
            model_api_key,
            model_api_base: env::var("MODEL_API_BASE").unwrap_or(defaults.model_api_base),
            market_api_base: env::var("MARKET_API_BASE_URL")
                .ok()
                .map(|u| u.trim_end_matches('/').to_string()),
            knowledge_dir: env::var("KNOWLEDGE_DIR").ok().map(Into::into),
            price_table_path: env::var("PRICE_TABLE_PATH").ok().map(Into::into),
            ops_per_min,
            max_rounds,
            call_timeout: Duration::from_secs(timeout_secs),
            enable_web_search: env::var("ENABLE_WEB_SEARCH")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            port,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| CoreError::ConfigError(format!("Invalid value for {}: {}", key, raw))),
        Err(_) => Ok(default),
    }
}
