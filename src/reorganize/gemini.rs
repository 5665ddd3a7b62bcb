// src/reorganize/gemini.rs — Gemini regrouping adapter

use super::{validate_groups, RegroupedUtterance, ReorganizeError, ReorganizeProvider, SourceUtterance};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MODEL: &str = "gemini-2.0-flash";

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: String,
}

pub struct GeminiRegrouper {
    client: Client,
    api_key: String,
}

impl GeminiRegrouper {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();

        Self { client, api_key }
    }

    fn build_prompt(utterances: &[SourceUtterance]) -> String {
        let listing = utterances
            .iter()
            .map(|u| format!("[{}] {}", u.index, u.text))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "You restructure live-interpretation transcripts.\n\n\
            Below are utterances captured in real time, each prefixed with its\n\
            [index]. Fragmented or run-on lines should be regrouped into\n\
            natural, complete sentences.\n\n\
            Rules:\n\
            1. Lines whose meaning continues may be merged into one sentence\n\
            2. Keep every sentence in its original language\n\
            3. Preserve the original meaning; only smooth the phrasing\n\
            4. Respond with a JSON array only, nothing else\n\n\
            Input:\n{}\n\n\
            Response format (JSON array only):\n\
            [\n  {{\"merged_from\": [0, 1], \"text\": \"merged sentence\"}},\n  {{\"merged_from\": [2], \"text\": \"standalone sentence\"}}\n]",
            listing
        )
    }

    /// Pull the first JSON array out of the model's reply.
    fn extract_groups(text: &str) -> Result<Vec<RegroupedUtterance>, ReorganizeError> {
        let start = text.find('[').ok_or(ReorganizeError::InvalidResponse)?;
        let end = text.rfind(']').ok_or(ReorganizeError::InvalidResponse)?;
        if end <= start {
            return Err(ReorganizeError::InvalidResponse);
        }

        serde_json::from_str(&text[start..=end]).map_err(|_| ReorganizeError::InvalidResponse)
    }
}

#[async_trait]
impl ReorganizeProvider for GeminiRegrouper {
    async fn regroup(
        &self,
        utterances: &[SourceUtterance],
    ) -> Result<Vec<RegroupedUtterance>, ReorganizeError> {
        if utterances.is_empty() {
            return Err(ReorganizeError::Empty);
        }

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            MODEL, self.api_key
        );

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: Self::build_prompt(utterances),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.3,
                max_output_tokens: 4096,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ReorganizeError::Timeout
                } else {
                    ReorganizeError::Network(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ReorganizeError::Provider(format!(
                "Gemini {}: {}",
                status, body
            )));
        }

        let gemini: GeminiResponse = response
            .json()
            .await
            .map_err(|e| ReorganizeError::Provider(format!("Gemini parse: {}", e)))?;

        let reply = gemini
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or(ReorganizeError::InvalidResponse)?;

        let groups = Self::extract_groups(&reply)?;
        validate_groups(&groups, utterances.len())?;

        tracing::info!("Gemini regrouped {} utterances into {} groups", utterances.len(), groups.len());
        Ok(groups)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
