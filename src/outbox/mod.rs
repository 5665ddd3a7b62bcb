// src/outbox/mod.rs — resilient persistence: write-through with retry,
// durable queue while offline or after repeated failures

pub mod retry;
pub mod store;

pub use retry::{with_retry, RetryPolicy, Retryable};
pub use store::OutboxStore;

use crate::model::{NewTranslation, NewUtterance, OutboxItem};
use crate::storage::{SessionStore, StorageError};
use crate::translate::TARGET_NONE;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Result of a write-through attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The backend confirmed the write.
    Persisted {
        utterance_id: String,
        translation_id: Option<String>,
    },
    /// The write is parked in the durable queue for a later drain.
    Queued { local_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing pending.
    Empty,
    /// A drain was already running; this invocation did nothing.
    SkippedBusy,
    /// Offline; the queue was left untouched.
    Offline,
    Drained {
        succeeded: usize,
        remaining: usize,
        /// (local_id, utterance_id) for every item that just landed, so the
        /// caller can backfill server ids onto its visible entries.
        persisted: Vec<(String, String)>,
    },
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Per-user durable write queue shared across sessions.
///
/// All queue mutation goes through `attempt_write`/`drain`; drains are
/// serialized by the processing flag so one item can never be submitted by
/// two drains at once. `local_id` dedup is client-side only — the backend
/// sees at-least-once delivery.
pub struct PersistenceOutbox {
    store: Arc<dyn SessionStore>,
    queue_store: OutboxStore,
    queue: Mutex<Vec<OutboxItem>>,
    online: AtomicBool,
    draining: AtomicBool,
    retry: RetryPolicy,
    speaker_id: String,
    provider_tag: String,
}

impl PersistenceOutbox {
    /// Open the outbox for one user, recovering any queue left by a previous run.
    pub fn open(
        store: Arc<dyn SessionStore>,
        dir: impl Into<PathBuf>,
        speaker_id: impl Into<String>,
        provider_tag: impl Into<String>,
    ) -> Self {
        let speaker_id = speaker_id.into();
        let queue_store = OutboxStore::new(dir, &speaker_id);
        let pending = queue_store.load();
        if !pending.is_empty() {
            tracing::info!("Recovered {} pending outbox items", pending.len());
        }

        Self {
            store,
            queue_store,
            queue: Mutex::new(pending),
            online: AtomicBool::new(true),
            draining: AtomicBool::new(false),
            retry: RetryPolicy::persistence(),
            speaker_id,
            provider_tag: provider_tag.into(),
        }
    }

    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::SeqCst);
        if was != online {
            tracing::info!("Connectivity changed: online={}", online);
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub async fn pending(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Write an utterance + translation through to the backend, or park it in
    /// the durable queue. The item is never dropped.
    pub async fn attempt_write(
        &self,
        item: OutboxItem,
        started_at: Option<DateTime<Utc>>,
    ) -> WriteOutcome {
        if !self.is_online() {
            tracing::info!("Offline — queueing write {}", item.local_id);
            return self.enqueue(item).await;
        }

        match with_retry(&self.retry, || self.write_once(&item, started_at)).await {
            Ok((utterance_id, translation_id)) => WriteOutcome::Persisted {
                utterance_id,
                translation_id,
            },
            Err(e) => {
                tracing::error!("Write {} failed after retries: {}", item.local_id, e);
                self.enqueue(item).await
            }
        }
    }

    /// Replay queued items oldest-first, one backend attempt each. Failures
    /// keep their position for the next cycle.
    pub async fn drain(&self) -> DrainOutcome {
        if self.draining.swap(true, Ordering::SeqCst) {
            return DrainOutcome::SkippedBusy;
        }
        let _guard = DrainGuard(&self.draining);

        if !self.is_online() {
            return DrainOutcome::Offline;
        }

        let snapshot = self.queue.lock().await.clone();
        if snapshot.is_empty() {
            return DrainOutcome::Empty;
        }

        tracing::info!("Draining outbox: {} items", snapshot.len());
        let mut succeeded = 0usize;
        let mut persisted = Vec::new();

        for item in &snapshot {
            match self.write_once(item, None).await {
                Ok((utterance_id, _)) => {
                    tracing::info!("Outbox item {} persisted as {}", item.local_id, utterance_id);
                    let mut queue = self.queue.lock().await;
                    queue.retain(|p| p.local_id != item.local_id);
                    self.queue_store.save(&queue);
                    succeeded += 1;
                    persisted.push((item.local_id.clone(), utterance_id));
                }
                Err(e) => {
                    tracing::warn!("Outbox item {} still failing: {}", item.local_id, e);
                    let mut queue = self.queue.lock().await;
                    if let Some(pending) = queue.iter_mut().find(|p| p.local_id == item.local_id) {
                        pending.attempt_count += 1;
                    }
                    self.queue_store.save(&queue);
                }
            }
        }

        let remaining = self.pending().await;
        if remaining > 0 {
            tracing::warn!("Outbox drain finished with {} items remaining", remaining);
        } else {
            tracing::info!("Outbox drained completely");
        }

        DrainOutcome::Drained {
            succeeded,
            remaining,
            persisted,
        }
    }

    /// Drop queued items by local id. Used when history rewrites supersede
    /// writes that never reached the backend.
    pub async fn discard(&self, local_ids: &[String]) {
        let mut queue = self.queue.lock().await;
        let before = queue.len();
        queue.retain(|p| !local_ids.contains(&p.local_id));
        if queue.len() != before {
            tracing::info!("Discarded {} superseded outbox items", before - queue.len());
            self.queue_store.save(&queue);
        }
    }

    /// Periodic drain for as long as the outbox lives; intended for
    /// `tokio::spawn`.
    pub async fn run_drain_loop(self: Arc<Self>, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;
            if !self.is_online() || self.pending().await == 0 {
                continue;
            }
            self.drain().await;
        }
    }

    async fn enqueue(&self, item: OutboxItem) -> WriteOutcome {
        let local_id = item.local_id.clone();
        let mut queue = self.queue.lock().await;
        if queue.iter().any(|p| p.local_id == item.local_id) {
            return WriteOutcome::Queued { local_id };
        }
        queue.push(item);
        self.queue_store.save(&queue);
        WriteOutcome::Queued { local_id }
    }

    async fn write_once(
        &self,
        item: &OutboxItem,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<(String, Option<String>), StorageError> {
        let utterance = self
            .store
            .insert_utterance(NewUtterance {
                session_id: item.session_id.clone(),
                speaker_id: self.speaker_id.clone(),
                original_text: item.original_text.clone(),
                original_language: item.original_language.clone(),
                started_at,
                ended_at: None,
            })
            .await?;

        if item.target_language == TARGET_NONE {
            return Ok((utterance.id, None));
        }

        match self
            .store
            .upsert_translation(NewTranslation {
                utterance_id: utterance.id.clone(),
                translated_text: item.translated_text.clone(),
                target_language: item.target_language.clone(),
                provider: self.provider_tag.clone(),
            })
            .await
        {
            Ok(translation) => Ok((utterance.id, Some(translation.id))),
            Err(e) => {
                // The utterance is safe; losing the translation row is not
                // worth re-running the whole write.
                tracing::warn!("Translation insert failed for {}: {}", utterance.id, e);
                Ok((utterance.id, None))
            }
        }
    }
}
