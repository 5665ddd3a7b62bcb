// src/outbox/store.rs
// Durable file behind the outbox queue, one file per user namespace

use crate::model::OutboxItem;
use std::fs;
use std::path::PathBuf;

pub struct OutboxStore {
    path: PathBuf,
}

impl OutboxStore {
    pub fn new(dir: impl Into<PathBuf>, namespace: &str) -> Self {
        let path = dir.into().join(format!("outbox-{}.json", namespace));
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load pending items from disk. A missing file is an empty queue; an
    /// unreadable file is moved aside so it never wedges the pipeline.
    pub fn load(&self) -> Vec<OutboxItem> {
        if !self.path.exists() {
            return Vec::new();
        }

        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!("Failed to read outbox file {:?}: {}", self.path, e);
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<OutboxItem>>(&raw) {
            Ok(items) => items,
            Err(e) => {
                tracing::error!("Corrupt outbox file {:?}: {}", self.path, e);
                let backup = self.path.with_extension("json.bak");
                let _ = fs::copy(&self.path, backup);
                let _ = fs::remove_file(&self.path);
                Vec::new()
            }
        }
    }

    /// Persist the current queue. An empty queue removes the file.
    pub fn save(&self, items: &[OutboxItem]) {
        if items.is_empty() {
            if self.path.exists() {
                if let Err(e) = fs::remove_file(&self.path) {
                    tracing::warn!("Failed to clear outbox file {:?}: {}", self.path, e);
                }
            }
            return;
        }

        if let Some(parent) = self.path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                tracing::error!("Failed to create outbox dir {:?}: {}", parent, e);
                return;
            }
        }

        match serde_json::to_string_pretty(items) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.path, json) {
                    tracing::error!("Failed to write outbox file {:?}: {}", self.path, e);
                }
            }
            Err(e) => tracing::error!("Failed to serialize outbox queue: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(local_id: &str) -> OutboxItem {
        OutboxItem {
            local_id: local_id.to_string(),
            session_id: "s1".to_string(),
            original_text: "text".to_string(),
            original_language: "ko".to_string(),
            translated_text: "translated".to_string(),
            target_language: "en".to_string(),
            enqueued_at: Utc::now(),
            attempt_count: 0,
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = OutboxStore::new(dir.path(), "user-1");

        store.save(&[item("a"), item("b")]);
        let loaded = store.load();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].local_id, "a");
        assert_eq!(loaded[1].local_id, "b");
    }

    #[test]
    fn test_empty_queue_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = OutboxStore::new(dir.path(), "user-1");

        store.save(&[item("a")]);
        assert!(store.path().exists());
        store.save(&[]);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_corrupt_file_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let store = OutboxStore::new(dir.path(), "user-1");

        fs::create_dir_all(dir.path()).unwrap();
        fs::write(store.path(), "not json").unwrap();

        assert!(store.load().is_empty());
        assert!(dir.path().join("outbox-user-1.json.bak").exists());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = OutboxStore::new(dir.path(), "user-1");
        assert!(store.load().is_empty());
    }
}
