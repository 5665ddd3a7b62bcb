// src/translate/mod.rs — translation provider trait + dispatch policy

pub mod google;
mod types;

pub use google::GoogleTranslateAdapter;
pub use types::TranslateError;

use async_trait::async_trait;
use std::sync::Arc;

/// Target-language value that disables translation: record the original only.
pub const TARGET_NONE: &str = "none";

/// Trait for translation service adapters
#[async_trait]
pub trait TranslateProvider: Send + Sync {
    /// Translate `text` from `source` into `target`
    async fn translate(&self, text: &str, source: &str, target: &str)
        -> Result<String, TranslateError>;

    /// Provider tag stored alongside translations
    fn name(&self) -> &str;
}

/// Applies the session language policy before touching the network:
/// `"none"` targets produce an empty translation, identical source/target
/// pass the text through, everything else goes to the provider.
pub struct TranslationDispatcher {
    provider: Arc<dyn TranslateProvider>,
}

impl TranslationDispatcher {
    pub fn new(provider: Arc<dyn TranslateProvider>) -> Self {
        Self { provider }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> Result<String, TranslateError> {
        if target == TARGET_NONE {
            return Ok(String::new());
        }

        if source == target {
            return Ok(text.to_string());
        }

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(String::new());
        }

        self.provider.translate(trimmed, source, target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoProvider;

    #[async_trait]
    impl TranslateProvider for EchoProvider {
        async fn translate(
            &self,
            text: &str,
            _source: &str,
            target: &str,
        ) -> Result<String, TranslateError> {
            Ok(format!("{}:{}", target, text))
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl TranslateProvider for FailingProvider {
        async fn translate(
            &self,
            _text: &str,
            _source: &str,
            _target: &str,
        ) -> Result<String, TranslateError> {
            Err(TranslateError::Provider("boom".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_none_target_skips_provider() {
        let dispatcher = TranslationDispatcher::new(Arc::new(FailingProvider));
        let out = dispatcher.translate("안녕하세요", "ko", TARGET_NONE).await.unwrap();
        assert_eq!(out, "");
    }

    #[tokio::test]
    async fn test_same_language_passes_through() {
        let dispatcher = TranslationDispatcher::new(Arc::new(FailingProvider));
        let out = dispatcher.translate("hello there", "en", "en").await.unwrap();
        assert_eq!(out, "hello there");
    }

    #[tokio::test]
    async fn test_empty_text_is_ignored() {
        let dispatcher = TranslationDispatcher::new(Arc::new(FailingProvider));
        let out = dispatcher.translate("   ", "ko", "en").await.unwrap();
        assert_eq!(out, "");
    }

    #[tokio::test]
    async fn test_dispatch_reaches_provider() {
        let dispatcher = TranslationDispatcher::new(Arc::new(EchoProvider));
        let out = dispatcher.translate("안녕하세요", "ko", "en").await.unwrap();
        assert_eq!(out, "en:안녕하세요");
    }

    #[tokio::test]
    async fn test_provider_error_surfaces() {
        let dispatcher = TranslationDispatcher::new(Arc::new(FailingProvider));
        let err = dispatcher.translate("hello", "en", "ko").await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
