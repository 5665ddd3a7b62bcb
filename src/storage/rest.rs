// src/storage/rest.rs
// REST storage adapter (PostgREST-style backend)

use super::{SessionStore, StorageError};
use crate::model::{
    NewSession, NewTranslation, NewUtterance, Session, SessionPatch, Translation, Utterance,
    UtteranceDraft,
};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;
use std::time::Duration;

const TIMEOUT_SECS: u64 = 10;

#[derive(Serialize)]
struct ReplacePayload<'a> {
    p_session_id: &'a str,
    p_remove_ids: &'a [String],
    p_inserts: Vec<UtteranceDraft>,
}

pub struct RestStore {
    base_url: String,
    api_key: String,
    client: Client,
}

impl RestStore {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        let base_url = base_url.into().trim_end_matches('/').to_string();
        tracing::info!("REST store initialized: {}", base_url);

        Self {
            base_url,
            api_key: api_key.into(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    fn transport_error(e: reqwest::Error) -> StorageError {
        if e.is_timeout() {
            StorageError::Timeout
        } else {
            StorageError::Network(e.to_string())
        }
    }

    async fn check(response: Response) -> Result<Response, StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        match status.as_u16() {
            401 | 403 => Err(StorageError::Auth),
            429 => Err(StorageError::RateLimit),
            code => {
                let message = response.text().await.unwrap_or_default();
                Err(StorageError::Api { status: code, message })
            }
        }
    }

    /// POST with `Prefer: return=representation`, expecting the inserted rows back.
    async fn insert_returning<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        prefer: &str,
        body: &B,
    ) -> Result<Vec<T>, StorageError> {
        let response = self
            .request(self.client.post(self.url(path)))
            .header("Prefer", prefer)
            .json(body)
            .send()
            .await
            .map_err(Self::transport_error)?;

        Self::check(response)
            .await?
            .json::<Vec<T>>()
            .await
            .map_err(|e| StorageError::InvalidResponse(e.to_string()))
    }
}

fn first_row<T>(rows: Vec<T>, what: &str) -> Result<T, StorageError> {
    rows.into_iter()
        .next()
        .ok_or_else(|| StorageError::InvalidResponse(format!("empty {} insert response", what)))
}

#[async_trait]
impl SessionStore for RestStore {
    async fn create_session(&self, new: NewSession) -> Result<Session, StorageError> {
        let rows = self
            .insert_returning("sessions", "return=representation", &new)
            .await?;
        first_row(rows, "session")
    }

    async fn update_session(&self, id: &str, patch: SessionPatch) -> Result<(), StorageError> {
        let url = format!("{}?id=eq.{}", self.url("sessions"), id);
        let response = self
            .request(self.client.patch(url))
            .json(&patch)
            .send()
            .await
            .map_err(Self::transport_error)?;
        Self::check(response).await.map(|_| ())
    }

    async fn insert_utterance(&self, new: NewUtterance) -> Result<Utterance, StorageError> {
        let rows = self
            .insert_returning("utterances", "return=representation", &new)
            .await?;
        first_row(rows, "utterance")
    }

    async fn upsert_translation(&self, new: NewTranslation) -> Result<Translation, StorageError> {
        let rows = self
            .insert_returning(
                "translations?on_conflict=utterance_id,target_language",
                "resolution=merge-duplicates,return=representation",
                &new,
            )
            .await?;
        first_row(rows, "translation")
    }

    async fn delete_utterance(&self, id: &str) -> Result<(), StorageError> {
        let url = format!("{}?id=eq.{}", self.url("utterances"), id);
        let response = self
            .request(self.client.delete(url))
            .send()
            .await
            .map_err(Self::transport_error)?;
        Self::check(response).await.map(|_| ())
    }

    async fn list_utterances(&self, session_id: &str) -> Result<Vec<Utterance>, StorageError> {
        let url = format!(
            "{}?session_id=eq.{}&order=created_at.asc",
            self.url("utterances"),
            session_id
        );
        let response = self
            .request(self.client.get(url))
            .send()
            .await
            .map_err(Self::transport_error)?;

        Self::check(response)
            .await?
            .json::<Vec<Utterance>>()
            .await
            .map_err(|e| StorageError::InvalidResponse(e.to_string()))
    }

    async fn replace_utterances(
        &self,
        session_id: &str,
        remove_ids: &[String],
        inserts: Vec<UtteranceDraft>,
    ) -> Result<Vec<Utterance>, StorageError> {
        // One RPC so the backend runs delete + insert inside a transaction.
        let payload = ReplacePayload {
            p_session_id: session_id,
            p_remove_ids: remove_ids,
            p_inserts: inserts,
        };

        let response = self
            .request(self.client.post(self.url("rpc/replace_utterances")))
            .json(&payload)
            .send()
            .await
            .map_err(Self::transport_error)?;

        Self::check(response)
            .await?
            .json::<Vec<Utterance>>()
            .await
            .map_err(|e| StorageError::InvalidResponse(e.to_string()))
    }
}
