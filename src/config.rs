use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::translate::TARGET_NONE;

const API_KEY_XOR_KEY: &[u8] = b"lingobridge-local-key-v1";

pub const DEFAULT_SOURCE_LANGUAGE: &str = "ko";
pub const DEFAULT_TARGET_LANGUAGE: &str = "en";
pub const DEFAULT_DATA_DIR: &str = "data";

const KNOWN_LANGUAGES: [&str; 13] = [
    "ko", "en", "ja", "zh", "zh-TW", "es", "fr", "de", "th", "vi", "ru", "pt", "ar",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Stable per-user id; also namespaces the durable outbox file.
    pub speaker_id: String,
    pub source_language: String,
    pub target_language: String,
    /// Write utterances through to the remote backend.
    pub persist_remote: bool,
    /// Run reorganize → document → summary automatically on finalize.
    pub auto_finalize_pipeline: bool,
    pub translate_api_key_obfuscated: Option<String>,
    pub gemini_api_key_obfuscated: Option<String>,
    pub backend_url: Option<String>,
    pub backend_api_key_obfuscated: Option<String>,
    pub data_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            speaker_id: String::new(),
            source_language: DEFAULT_SOURCE_LANGUAGE.to_string(),
            target_language: DEFAULT_TARGET_LANGUAGE.to_string(),
            persist_remote: true,
            auto_finalize_pipeline: true,
            translate_api_key_obfuscated: None,
            gemini_api_key_obfuscated: None,
            backend_url: None,
            backend_api_key_obfuscated: None,
            data_dir: DEFAULT_DATA_DIR.to_string(),
        }
    }
}

pub fn normalize_source_language(input: &str) -> String {
    let trimmed = input.trim();
    if KNOWN_LANGUAGES.contains(&trimmed) {
        trimmed.to_string()
    } else {
        DEFAULT_SOURCE_LANGUAGE.to_string()
    }
}

pub fn normalize_target_language(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed == TARGET_NONE || KNOWN_LANGUAGES.contains(&trimmed) {
        trimmed.to_string()
    } else {
        DEFAULT_TARGET_LANGUAGE.to_string()
    }
}

pub fn load_or_create(path: &Path) -> Result<AppConfig, String> {
    if !path.exists() {
        let mut config = AppConfig::default();
        normalize_config(&mut config);
        save_raw(path, &config)?;
        return Ok(config);
    }

    let raw = fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;
    match serde_json::from_str::<AppConfig>(&raw) {
        Ok(mut config) => {
            let before = raw.clone();
            normalize_config(&mut config);
            // Keep the file in sync when normalization changed anything.
            if serde_json::to_string_pretty(&config).ok().as_deref() != Some(before.as_str()) {
                save_raw(path, &config)?;
            }
            Ok(config)
        }
        Err(_) => {
            let backup = path.with_extension("json.bak");
            let _ = fs::copy(path, backup);
            let mut config = AppConfig::default();
            normalize_config(&mut config);
            save_raw(path, &config)?;
            Ok(config)
        }
    }
}

pub fn save(path: &Path, config: &AppConfig) -> Result<(), String> {
    save_raw(path, config)
}

pub fn set_translate_api_key(config: &mut AppConfig, api_key: &str) {
    config.translate_api_key_obfuscated = obfuscate_optional(api_key);
}

pub fn set_gemini_api_key(config: &mut AppConfig, api_key: &str) {
    config.gemini_api_key_obfuscated = obfuscate_optional(api_key);
}

pub fn set_backend_api_key(config: &mut AppConfig, api_key: &str) {
    config.backend_api_key_obfuscated = obfuscate_optional(api_key);
}

pub fn decode_translate_api_key(config: &AppConfig) -> Option<String> {
    config
        .translate_api_key_obfuscated
        .as_deref()
        .and_then(deobfuscate_api_key)
}

pub fn decode_gemini_api_key(config: &AppConfig) -> Option<String> {
    config
        .gemini_api_key_obfuscated
        .as_deref()
        .and_then(deobfuscate_api_key)
}

pub fn decode_backend_api_key(config: &AppConfig) -> Option<String> {
    config
        .backend_api_key_obfuscated
        .as_deref()
        .and_then(deobfuscate_api_key)
}

pub fn mask_api_key(api_key: &str) -> String {
    if api_key.len() <= 10 {
        return "******".to_string();
    }

    let prefix = &api_key[..6];
    let suffix = &api_key[api_key.len().saturating_sub(4)..];
    format!("{}********{}", prefix, suffix)
}

pub fn outbox_dir(config: &AppConfig) -> PathBuf {
    PathBuf::from(&config.data_dir)
}

fn save_raw(path: &Path, config: &AppConfig) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config dir: {}", e))?;
        }
    }
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, json).map_err(|e| format!("Failed to save config: {}", e))
}

fn normalize_config(config: &mut AppConfig) {
    config.source_language = normalize_source_language(&config.source_language);
    config.target_language = normalize_target_language(&config.target_language);
    if config.speaker_id.trim().is_empty() {
        config.speaker_id = Uuid::new_v4().to_string();
    }
    if config.data_dir.trim().is_empty() {
        config.data_dir = DEFAULT_DATA_DIR.to_string();
    }
    if let Some(url) = &config.backend_url {
        if url.trim().is_empty() {
            config.backend_url = None;
        }
    }
}

fn obfuscate_optional(api_key: &str) -> Option<String> {
    let trimmed = api_key.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(obfuscate_api_key(trimmed))
    }
}

fn obfuscate_api_key(api_key: &str) -> String {
    let mut bytes = api_key.as_bytes().to_vec();
    for (idx, byte) in bytes.iter_mut().enumerate() {
        *byte ^= API_KEY_XOR_KEY[idx % API_KEY_XOR_KEY.len()];
    }
    BASE64_STANDARD.encode(bytes)
}

fn deobfuscate_api_key(obfuscated: &str) -> Option<String> {
    let mut bytes = BASE64_STANDARD.decode(obfuscated).ok()?;
    for (idx, byte) in bytes.iter_mut().enumerate() {
        *byte ^= API_KEY_XOR_KEY[idx % API_KEY_XOR_KEY.len()];
    }
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_languages() {
        assert_eq!(normalize_source_language(" ko "), "ko");
        assert_eq!(normalize_source_language("klingon"), DEFAULT_SOURCE_LANGUAGE);
        assert_eq!(normalize_target_language("none"), "none");
        assert_eq!(normalize_target_language("zh-TW"), "zh-TW");
        assert_eq!(normalize_target_language(""), DEFAULT_TARGET_LANGUAGE);
    }

    #[test]
    fn test_api_key_round_trip() {
        let mut config = AppConfig::default();
        set_translate_api_key(&mut config, "AIzaSyExample1234567890");
        assert_ne!(
            config.translate_api_key_obfuscated.as_deref(),
            Some("AIzaSyExample1234567890")
        );
        assert_eq!(
            decode_translate_api_key(&config).as_deref(),
            Some("AIzaSyExample1234567890")
        );
    }

    #[test]
    fn test_empty_api_key_clears() {
        let mut config = AppConfig::default();
        set_gemini_api_key(&mut config, "  ");
        assert!(config.gemini_api_key_obfuscated.is_none());
    }

    #[test]
    fn test_mask_api_key() {
        assert_eq!(mask_api_key("short"), "******");
        let masked = mask_api_key("AIzaSyExample1234567890");
        assert!(masked.starts_with("AIzaSy"));
        assert!(masked.ends_with("7890"));
    }

    #[test]
    fn test_load_creates_default_with_speaker_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = load_or_create(&path).unwrap();
        assert!(!config.speaker_id.is_empty());
        assert_eq!(config.source_language, DEFAULT_SOURCE_LANGUAGE);
        assert!(path.exists());

        // Second load keeps the generated speaker id.
        let again = load_or_create(&path).unwrap();
        assert_eq!(config.speaker_id, again.speaker_id);
    }

    #[test]
    fn test_corrupt_config_is_backed_up_and_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let config = load_or_create(&path).unwrap();
        assert_eq!(config.target_language, DEFAULT_TARGET_LANGUAGE);
        assert!(dir.path().join("config.json.bak").exists());
    }
}
