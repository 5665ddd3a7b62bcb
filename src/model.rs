// src/model.rs
// Core data model: sessions, utterances, translations, outbox items

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a session. Active and Paused can alternate freely;
/// Completed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
}

/// A spoken-language session as stored by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub source_language: String,
    pub target_languages: Vec<String>,
    pub status: SessionStatus,
    #[serde(rename = "total_utterances")]
    pub utterance_count: u32,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewSession {
    pub title: String,
    pub source_language: String,
    pub target_languages: Vec<String>,
}

/// Partial update for a session record. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(rename = "total_utterances", skip_serializing_if = "Option::is_none")]
    pub utterance_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
}

/// One finalized, timestamped unit of recognized speech text.
///
/// Owned by its session; mutated only through edit/merge/reorganize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    pub id: String,
    pub session_id: String,
    pub speaker_id: String,
    pub original_text: String,
    pub original_language: String,
    /// Recognition-engine supplied time offsets, when available.
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewUtterance {
    pub session_id: String,
    pub speaker_id: String,
    pub original_text: String,
    pub original_language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// A stored translation. At most one current row per
/// (utterance_id, target_language) — writes for the same pair replace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Translation {
    pub id: String,
    pub utterance_id: String,
    pub translated_text: String,
    pub target_language: String,
    #[serde(rename = "translation_provider")]
    pub provider: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewTranslation {
    pub utterance_id: String,
    pub translated_text: String,
    pub target_language: String,
    #[serde(rename = "translation_provider")]
    pub provider: String,
}

/// An utterance plus its optional translation, inserted together by the
/// atomic-replace operation before server ids exist.
#[derive(Debug, Clone, Serialize)]
pub struct UtteranceDraft {
    pub utterance: NewUtterance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<TranslationDraft>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranslationDraft {
    pub translated_text: String,
    pub target_language: String,
    #[serde(rename = "translation_provider")]
    pub provider: String,
}

/// A write that has not yet been confirmed persisted. Survives restarts via
/// the durable outbox file; removed once the backend accepts it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxItem {
    pub local_id: String,
    pub session_id: String,
    pub original_text: String,
    pub original_language: String,
    pub translated_text: String,
    pub target_language: String,
    pub enqueued_at: DateTime<Utc>,
    pub attempt_count: u32,
}

/// One row of the visible transcript list.
///
/// `utterance_id == None` means the write is still pending in the outbox
/// under the same `local_id`.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntry {
    pub local_id: String,
    pub utterance_id: Option<String>,
    pub translation_id: Option<String>,
    pub original: String,
    pub translated: String,
    pub source_language: String,
    pub target_language: String,
    pub timestamp: DateTime<Utc>,
}
