//! Error types for the market intelligence core

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {

    // =============================
    // Safety Gate (terminal, zero cost)
    // =============================

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Prompt injection detected: {0}")]
    InjectionDetected(String),

    #[error("Content policy violation: {0}")]
    ModerationViolation(String),

    // =============================
    // Tool conditions (recoverable inside the loop)
    // =============================

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidToolArgs(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("No sector mapping for '{0}'")]
    NoMapping(String),

    // =============================
    // Terminal round conditions
    // =============================

    #[error("Model unavailable after retries: {0}")]
    ModelUnavailable(String),

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Round limit of {0} exceeded")]
    RoundLimitExceeded(u32),

    #[error("No pricing for model: {0}")]
    UnknownModelPricing(String),

    #[error("Session is busy with another turn")]
    SessionBusy,

    #[error("Session not found: {0}")]
    SessionNotFound(uuid::Uuid),

    #[error("Index error: {0}")]
    IndexError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CoreError {
    /// Machine-readable kind, stable across message wording changes.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::InvalidInput(_) => "invalid_input",
            CoreError::InjectionDetected(_) => "injection_detected",
            CoreError::ModerationViolation(_) => "moderation_violation",
            CoreError::ToolNotFound(_) => "tool_not_found",
            CoreError::InvalidToolArgs(_) => "invalid_tool_args",
            CoreError::ToolExecutionFailed(_) => "tool_execution_failed",
            CoreError::NoMapping(_) => "no_mapping",
            CoreError::ModelUnavailable(_) => "model_unavailable",
            CoreError::RateLimited { .. } => "rate_limited",
            CoreError::RoundLimitExceeded(_) => "round_limit_exceeded",
            CoreError::UnknownModelPricing(_) => "unknown_model_pricing",
            CoreError::SessionBusy => "session_busy",
            CoreError::SessionNotFound(_) => "session_not_found",
            CoreError::IndexError(_) => "index_error",
            CoreError::ConfigError(_) => "config_error",
            CoreError::SerializationError(_) => "serialization_error",
            CoreError::HttpError(_) => "http_error",
            CoreError::IoError(_) => "io_error",
        }
    }

    /// User-facing message for terminal conditions. Internal detail is kept
    /// out of anything shown to the end user.
    pub fn user_message(&self) -> String {
        match self {
            CoreError::InvalidInput(m) => m.clone(),
            CoreError::InjectionDetected(_) => {
                "Re-type your answer.\nSuspected prompt-injection phrasing in the input."
                    .to_string()
            }
            // Moderation fires on both user input and model output, so the
            // wording stays neutral about who produced the text.
            CoreError::ModerationViolation(_) => {
                "The content could not be processed because it violates usage guidelines."
                    .to_string()
            }
            CoreError::ModelUnavailable(_) => {
                "The analysis service is temporarily degraded. Please try again shortly."
                    .to_string()
            }
            CoreError::RateLimited { retry_after_secs } => format!(
                "Rate limit exceeded. Please wait {}s before retrying.",
                retry_after_secs
            ),
            CoreError::RoundLimitExceeded(_) => {
                "Unable to complete the request within the allowed number of analysis rounds."
                    .to_string()
            }
            CoreError::SessionBusy => {
                "Another request for this session is still in progress.".to_string()
            }
            _ => "The request could not be completed.".to_string(),
        }
    }

    /// True for conditions the Safety Gate raises on the input side.
    pub fn is_gate_rejection(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidInput(_)
                | CoreError::InjectionDetected(_)
                | CoreError::ModerationViolation(_)
        )
    }
}
