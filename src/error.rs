//! Error types for the chat backend

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for chat backend operations
pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Error, Debug)]
pub enum ChatError {

    // =============================
    // Domain Errors
    // =============================

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Upstream LLM error: {message}")]
    Upstream { message: String, retryable: bool },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Upstream error worth retrying (rate limits, transient server errors)
    pub fn upstream_retryable(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            retryable: true,
        }
    }

    /// Upstream error that should surface immediately
    pub fn upstream_fatal(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream { retryable: true, .. })
    }
}
