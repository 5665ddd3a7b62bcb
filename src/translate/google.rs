// src/translate/google.rs
// Google Cloud Translation v2 adapter

use super::{TranslateError, TranslateProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const TRANSLATE_API_URL: &str = "https://translation.googleapis.com/language/translate/v2";
const TIMEOUT_SECS: u64 = 10;

#[derive(Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
}

#[derive(Deserialize)]
struct TranslateResponse {
    data: TranslateData,
}

#[derive(Deserialize)]
struct TranslateData {
    translations: Vec<TranslatedItem>,
}

#[derive(Deserialize)]
struct TranslatedItem {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

pub struct GoogleTranslateAdapter {
    api_key: String,
    client: Client,
}

impl GoogleTranslateAdapter {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        tracing::info!("Google translate adapter initialized");

        Self { api_key, client }
    }

    /// Map internal language codes to the codes the API expects.
    fn api_language_code(lang: &str) -> &str {
        match lang {
            "zh" => "zh-CN",
            other => other,
        }
    }
}

#[async_trait]
impl TranslateProvider for GoogleTranslateAdapter {
    async fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> Result<String, TranslateError> {
        let url = format!("{}?key={}", TRANSLATE_API_URL, self.api_key);

        let request = TranslateRequest {
            q: text,
            source: Self::api_language_code(source),
            target: Self::api_language_code(target),
            format: "text",
        };

        let response = self.client.post(&url).json(&request).send().await;

        match response {
            Ok(resp) => {
                let status = resp.status();

                if status.is_success() {
                    let body: TranslateResponse = resp
                        .json()
                        .await
                        .map_err(|e| TranslateError::Provider(format!("parse: {}", e)))?;

                    body.data
                        .translations
                        .into_iter()
                        .next()
                        .map(|t| t.translated_text)
                        .ok_or(TranslateError::InvalidResponse)
                } else if status.as_u16() == 401 || status.as_u16() == 403 {
                    Err(TranslateError::Auth)
                } else if status.as_u16() == 429 {
                    Err(TranslateError::RateLimit)
                } else {
                    let error_text = resp.text().await.unwrap_or_default();
                    Err(TranslateError::Provider(format!(
                        "HTTP {}: {}",
                        status, error_text
                    )))
                }
            }
            Err(e) => {
                if e.is_timeout() {
                    Err(TranslateError::Timeout)
                } else {
                    Err(TranslateError::Network(e.to_string()))
                }
            }
        }
    }

    fn name(&self) -> &str {
        "google"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_code_mapping() {
        assert_eq!(GoogleTranslateAdapter::api_language_code("zh"), "zh-CN");
        assert_eq!(GoogleTranslateAdapter::api_language_code("zh-TW"), "zh-TW");
        assert_eq!(GoogleTranslateAdapter::api_language_code("ko"), "ko");
    }
}
