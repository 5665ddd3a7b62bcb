// src/storage/mod.rs — durable storage backend trait

pub mod memory;
pub mod rest;

pub use memory::MemoryStore;
pub use rest::RestStore;

use crate::model::{
    NewSession, NewTranslation, NewUtterance, Session, SessionPatch, Translation, Utterance,
    UtteranceDraft,
};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Offline")]
    Offline,

    #[error("Authentication failed")]
    Auth,

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Backend error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),
}

impl StorageError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::Network(_) | StorageError::Timeout | StorageError::RateLimit
        )
    }
}

/// CRUD surface of the durable storage backend.
///
/// `replace_utterances` is a single transactional call: the backend removes
/// `remove_ids` and inserts `inserts` atomically, so a crash mid-operation
/// can never leave a session with neither the old nor the new rows.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, new: NewSession) -> Result<Session, StorageError>;

    async fn update_session(&self, id: &str, patch: SessionPatch) -> Result<(), StorageError>;

    async fn insert_utterance(&self, new: NewUtterance) -> Result<Utterance, StorageError>;

    /// Insert or replace the translation for (utterance_id, target_language).
    async fn upsert_translation(&self, new: NewTranslation) -> Result<Translation, StorageError>;

    async fn delete_utterance(&self, id: &str) -> Result<(), StorageError>;

    /// All utterances of a session in creation order.
    async fn list_utterances(&self, session_id: &str) -> Result<Vec<Utterance>, StorageError>;

    /// Atomically swap `remove_ids` for `inserts` within one session.
    /// Returns the inserted utterances with their server ids.
    async fn replace_utterances(
        &self,
        session_id: &str,
        remove_ids: &[String],
        inserts: Vec<UtteranceDraft>,
    ) -> Result<Vec<Utterance>, StorageError>;
}
