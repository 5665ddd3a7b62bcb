// src/translate/types.rs
// Translation error definitions with retry classification

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Authentication failed")]
    Auth,

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Invalid response from translation provider")]
    InvalidResponse,
}

impl TranslateError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TranslateError::Network(_) | TranslateError::Timeout | TranslateError::RateLimit
        )
    }
}
