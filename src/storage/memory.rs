// src/storage/memory.rs
// In-memory storage backend, used by tests and backend-less runs

use super::{SessionStore, StorageError};
use crate::model::{
    NewSession, NewTranslation, NewUtterance, Session, SessionPatch, SessionStatus, Translation,
    Utterance, UtteranceDraft,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct MemoryInner {
    sessions: HashMap<String, Session>,
    utterances: Vec<Utterance>,
    translations: Vec<Translation>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn session(&self, id: &str) -> Option<Session> {
        self.inner.lock().await.sessions.get(id).cloned()
    }

    pub async fn translations_for(&self, utterance_id: &str) -> Vec<Translation> {
        self.inner
            .lock()
            .await
            .translations
            .iter()
            .filter(|t| t.utterance_id == utterance_id)
            .cloned()
            .collect()
    }
}

fn insert_utterance_locked(inner: &mut MemoryInner, new: NewUtterance) -> Utterance {
    let utterance = Utterance {
        id: Uuid::new_v4().to_string(),
        session_id: new.session_id,
        speaker_id: new.speaker_id,
        original_text: new.original_text,
        original_language: new.original_language,
        started_at: new.started_at,
        ended_at: new.ended_at,
        created_at: Utc::now(),
    };
    inner.utterances.push(utterance.clone());
    utterance
}

fn upsert_translation_locked(inner: &mut MemoryInner, new: NewTranslation) -> Translation {
    if let Some(existing) = inner
        .translations
        .iter_mut()
        .find(|t| t.utterance_id == new.utterance_id && t.target_language == new.target_language)
    {
        existing.translated_text = new.translated_text;
        existing.provider = new.provider;
        return existing.clone();
    }

    let translation = Translation {
        id: Uuid::new_v4().to_string(),
        utterance_id: new.utterance_id,
        translated_text: new.translated_text,
        target_language: new.target_language,
        provider: new.provider,
    };
    inner.translations.push(translation.clone());
    translation
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, new: NewSession) -> Result<Session, StorageError> {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            title: new.title,
            source_language: new.source_language,
            target_languages: new.target_languages,
            status: SessionStatus::Active,
            utterance_count: 0,
            created_at: Utc::now(),
            ended_at: None,
            duration_seconds: 0,
        };
        self.inner
            .lock()
            .await
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn update_session(&self, id: &str, patch: SessionPatch) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        let session = inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        if let Some(title) = patch.title {
            session.title = title;
        }
        if let Some(status) = patch.status {
            session.status = status;
        }
        if let Some(count) = patch.utterance_count {
            session.utterance_count = count;
        }
        if let Some(ended_at) = patch.ended_at {
            session.ended_at = Some(ended_at);
        }
        if let Some(duration) = patch.duration_seconds {
            session.duration_seconds = duration;
        }
        Ok(())
    }

    async fn insert_utterance(&self, new: NewUtterance) -> Result<Utterance, StorageError> {
        let mut inner = self.inner.lock().await;
        Ok(insert_utterance_locked(&mut inner, new))
    }

    async fn upsert_translation(&self, new: NewTranslation) -> Result<Translation, StorageError> {
        let mut inner = self.inner.lock().await;
        Ok(upsert_translation_locked(&mut inner, new))
    }

    async fn delete_utterance(&self, id: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        inner.utterances.retain(|u| u.id != id);
        inner.translations.retain(|t| t.utterance_id != id);
        Ok(())
    }

    async fn list_utterances(&self, session_id: &str) -> Result<Vec<Utterance>, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .utterances
            .iter()
            .filter(|u| u.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn replace_utterances(
        &self,
        session_id: &str,
        remove_ids: &[String],
        inserts: Vec<UtteranceDraft>,
    ) -> Result<Vec<Utterance>, StorageError> {
        // Single lock scope: readers never observe the intermediate state.
        let mut inner = self.inner.lock().await;

        inner
            .utterances
            .retain(|u| !(u.session_id == session_id && remove_ids.contains(&u.id)));
        inner
            .translations
            .retain(|t| !remove_ids.contains(&t.utterance_id));

        let mut inserted = Vec::with_capacity(inserts.len());
        for draft in inserts {
            let utterance = insert_utterance_locked(&mut inner, draft.utterance);
            if let Some(translation) = draft.translation {
                upsert_translation_locked(
                    &mut inner,
                    NewTranslation {
                        utterance_id: utterance.id.clone(),
                        translated_text: translation.translated_text,
                        target_language: translation.target_language,
                        provider: translation.provider,
                    },
                );
            }
            inserted.push(utterance);
        }

        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TranslationDraft;

    fn new_utterance(session_id: &str, text: &str) -> NewUtterance {
        NewUtterance {
            session_id: session_id.to_string(),
            speaker_id: "speaker".to_string(),
            original_text: text.to_string(),
            original_language: "ko".to_string(),
            started_at: None,
            ended_at: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_pair() {
        let store = MemoryStore::new();
        let utterance = store
            .insert_utterance(new_utterance("s1", "hello"))
            .await
            .unwrap();

        let first = store
            .upsert_translation(NewTranslation {
                utterance_id: utterance.id.clone(),
                translated_text: "안녕".to_string(),
                target_language: "ko".to_string(),
                provider: "google".to_string(),
            })
            .await
            .unwrap();

        let second = store
            .upsert_translation(NewTranslation {
                utterance_id: utterance.id.clone(),
                translated_text: "안녕하세요".to_string(),
                target_language: "ko".to_string(),
                provider: "google".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        let rows = store.translations_for(&utterance.id).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].translated_text, "안녕하세요");
    }

    #[tokio::test]
    async fn test_replace_swaps_old_for_new() {
        let store = MemoryStore::new();
        let a = store
            .insert_utterance(new_utterance("s1", "first half"))
            .await
            .unwrap();
        let b = store
            .insert_utterance(new_utterance("s1", "second half"))
            .await
            .unwrap();

        let inserted = store
            .replace_utterances(
                "s1",
                &[a.id.clone(), b.id.clone()],
                vec![UtteranceDraft {
                    utterance: new_utterance("s1", "first half second half"),
                    translation: Some(TranslationDraft {
                        translated_text: "combined".to_string(),
                        target_language: "en".to_string(),
                        provider: "google".to_string(),
                    }),
                }],
            )
            .await
            .unwrap();

        assert_eq!(inserted.len(), 1);
        let remaining = store.list_utterances("s1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].original_text, "first half second half");
        assert!(store.translations_for(&a.id).await.is_empty());
        assert_eq!(store.translations_for(&inserted[0].id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_replace_only_touches_named_session() {
        let store = MemoryStore::new();
        let other = store
            .insert_utterance(new_utterance("s2", "keep me"))
            .await
            .unwrap();
        let target = store
            .insert_utterance(new_utterance("s1", "replace me"))
            .await
            .unwrap();

        store
            .replace_utterances(
                "s1",
                &[target.id.clone(), other.id.clone()],
                vec![UtteranceDraft {
                    utterance: new_utterance("s1", "replaced"),
                    translation: None,
                }],
            )
            .await
            .unwrap();

        assert_eq!(store.list_utterances("s2").await.unwrap().len(), 1);
    }
}
