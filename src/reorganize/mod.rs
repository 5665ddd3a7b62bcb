// src/reorganize/mod.rs — AI regrouping of recorded utterance history

pub mod gemini;

pub use gemini::GeminiRegrouper;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One utterance as presented to the grouping service, oldest first.
#[derive(Debug, Clone, Serialize)]
pub struct SourceUtterance {
    pub index: usize,
    pub text: String,
}

/// One group returned by the service: which source indices it merges, and
/// the merged text.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RegroupedUtterance {
    pub merged_from: Vec<usize>,
    pub text: String,
}

#[derive(Debug, Error)]
pub enum ReorganizeError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Invalid regrouping response")]
    InvalidResponse,

    #[error("Nothing to regroup")]
    Empty,
}

impl ReorganizeError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReorganizeError::Network(_) | ReorganizeError::Timeout
        )
    }
}

/// Trait for AI regrouping adapters
#[async_trait]
pub trait ReorganizeProvider: Send + Sync {
    /// Regroup the given utterances. An implementation must return at least
    /// one group or fail; an empty response is an error, never a wipe.
    async fn regroup(
        &self,
        utterances: &[SourceUtterance],
    ) -> Result<Vec<RegroupedUtterance>, ReorganizeError>;

    fn name(&self) -> &str;
}

/// Reject group lists that are empty or reference indices out of range.
pub(crate) fn validate_groups(
    groups: &[RegroupedUtterance],
    source_len: usize,
) -> Result<(), ReorganizeError> {
    if groups.is_empty() {
        return Err(ReorganizeError::InvalidResponse);
    }
    for group in groups {
        if group.text.trim().is_empty() {
            return Err(ReorganizeError::InvalidResponse);
        }
        if group.merged_from.iter().any(|&i| i >= source_len) {
            return Err(ReorganizeError::InvalidResponse);
        }
    }
    Ok(())
}
