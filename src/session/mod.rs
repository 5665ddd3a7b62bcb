// src/session/mod.rs — session lifecycle and pipeline wiring
//
// Owns the accumulator, translation dispatch and outbox for one speaker.
// All flushed utterances pass through a single pipeline worker, so
// translate + persist ordering is deterministic per session and history
// rewrites are mutually exclusive with live flushes.

pub mod pipeline;

pub use pipeline::{DocumentGenerator, GeneratorError, SummaryGenerator};

use crate::accumulator::{FlushSink, FlushedUtterance, SentenceAccumulator};
use crate::model::{
    NewSession, NewUtterance, OutboxItem, Session, SessionPatch, SessionStatus, TranscriptEntry,
    TranslationDraft, UtteranceDraft,
};
use crate::outbox::{DrainOutcome, PersistenceOutbox, WriteOutcome};
use crate::reorganize::{ReorganizeError, ReorganizeProvider, SourceUtterance};
use crate::storage::{SessionStore, StorageError};
use crate::translate::{TranslationDispatcher, TARGET_NONE};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub speaker_id: String,
    pub source_language: String,
    pub target_language: String,
    /// Title for newly created sessions; derived from languages when unset.
    pub title: Option<String>,
    /// Write utterances through to the backend.
    pub persist: bool,
    /// Run reorganize → document → summary after finalize.
    pub auto_pipeline: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListeningState {
    Idle,
    Listening,
}

/// Errors surfaced by the recognition stream collaborator.
#[derive(Debug, Clone)]
pub enum RecognitionError {
    PermissionDenied,
    NoSpeech,
    Aborted,
    Engine(String),
}

/// What the host should do with the recognition engine after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Restart,
    Halt,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No active session")]
    NoActiveSession,

    #[error("Session already completed")]
    AlreadyCompleted,

    #[error("Select at least two utterances to merge")]
    NotEnoughSelected,

    #[error("Unknown transcript entry: {0}")]
    UnknownEntry(String),

    #[error("No reorganize provider configured")]
    ReorganizeUnavailable,

    #[error("Reorganize failed: {0}")]
    Reorganize(#[from] ReorganizeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Default)]
struct ControllerState {
    session: Option<Session>,
    transcripts: Vec<TranscriptEntry>,
    active_since: Option<DateTime<Utc>>,
    accumulated_secs: u64,
    last_notice: Option<String>,
    listening: bool,
}

enum PipelineEvent {
    Utterance(FlushedUtterance),
    /// Acked once every previously queued utterance has settled.
    Barrier(oneshot::Sender<()>),
}

/// Everything the pipeline worker needs, detached from the controller.
struct PipelineCtx {
    settings: SessionSettings,
    state: Arc<Mutex<ControllerState>>,
    gate: Arc<Mutex<()>>,
    dispatcher: Arc<TranslationDispatcher>,
    outbox: Arc<PersistenceOutbox>,
}

pub struct SessionController {
    settings: SessionSettings,
    store: Arc<dyn SessionStore>,
    dispatcher: Arc<TranslationDispatcher>,
    outbox: Arc<PersistenceOutbox>,
    accumulator: SentenceAccumulator,
    state: Arc<Mutex<ControllerState>>,
    gate: Arc<Mutex<()>>,
    tx: mpsc::UnboundedSender<PipelineEvent>,
    regrouper: Option<Arc<dyn ReorganizeProvider>>,
    document_generator: Option<Arc<dyn DocumentGenerator>>,
    summary_generator: Option<Arc<dyn SummaryGenerator>>,
}

impl SessionController {
    pub fn new(
        settings: SessionSettings,
        store: Arc<dyn SessionStore>,
        dispatcher: Arc<TranslationDispatcher>,
        outbox: Arc<PersistenceOutbox>,
    ) -> Self {
        let state = Arc::new(Mutex::new(ControllerState::default()));
        let gate = Arc::new(Mutex::new(()));
        let (tx, rx) = mpsc::unbounded_channel();

        let sink: FlushSink = {
            let tx = tx.clone();
            Arc::new(move |utterance| {
                let _ = tx.send(PipelineEvent::Utterance(utterance));
            })
        };
        let accumulator = SentenceAccumulator::new(sink);

        let ctx = PipelineCtx {
            settings: settings.clone(),
            state: Arc::clone(&state),
            gate: Arc::clone(&gate),
            dispatcher: Arc::clone(&dispatcher),
            outbox: Arc::clone(&outbox),
        };
        tokio::spawn(run_pipeline(rx, ctx));

        Self {
            settings,
            store,
            dispatcher,
            outbox,
            accumulator,
            state,
            gate,
            tx,
            regrouper: None,
            document_generator: None,
            summary_generator: None,
        }
    }

    pub fn with_regrouper(mut self, regrouper: Arc<dyn ReorganizeProvider>) -> Self {
        self.regrouper = Some(regrouper);
        self
    }

    pub fn with_document_generator(mut self, generator: Arc<dyn DocumentGenerator>) -> Self {
        self.document_generator = Some(generator);
        self
    }

    pub fn with_summary_generator(mut self, generator: Arc<dyn SummaryGenerator>) -> Self {
        self.summary_generator = Some(generator);
        self
    }

    /// Begin (or resume) listening. A held Paused session keeps its id and
    /// utterance count; otherwise a new session record is created.
    pub async fn start(&self) -> Result<Session, SessionError> {
        let mut state = self.state.lock().await;

        if state.listening {
            if let Some(session) = &state.session {
                return Ok(session.clone());
            }
        }

        match state.session.as_mut() {
            Some(session) if session.status == SessionStatus::Completed => {
                return Err(SessionError::AlreadyCompleted);
            }
            Some(session) => {
                session.status = SessionStatus::Active;
                tracing::info!("Resuming session {}", session.id);
                if self.settings.persist {
                    let patch = SessionPatch {
                        status: Some(SessionStatus::Active),
                        ..Default::default()
                    };
                    // A resume must also work offline; the next stop() will
                    // persist the status again.
                    if let Err(e) = self.store.update_session(&session.id, patch).await {
                        tracing::warn!("Failed to persist resume: {}", e);
                    }
                }
            }
            None => {
                let title = self.settings.title.clone().unwrap_or_else(|| {
                    format!(
                        "{} → {} · {}",
                        self.settings.source_language,
                        self.settings.target_language,
                        Utc::now().format("%Y-%m-%d %H:%M")
                    )
                });
                let new = NewSession {
                    title,
                    source_language: self.settings.source_language.clone(),
                    target_languages: vec![self.settings.target_language.clone()],
                };

                let session = if self.settings.persist {
                    self.store.create_session(new).await?
                } else {
                    Session {
                        id: Uuid::new_v4().to_string(),
                        title: new.title,
                        source_language: new.source_language,
                        target_languages: new.target_languages,
                        status: SessionStatus::Active,
                        utterance_count: 0,
                        created_at: Utc::now(),
                        ended_at: None,
                        duration_seconds: 0,
                    }
                };
                tracing::info!("Started new session {}", session.id);
                state.session = Some(session);
            }
        }

        state.listening = true;
        state.active_since = Some(Utc::now());
        state
            .session
            .clone()
            .ok_or(SessionError::NoActiveSession)
    }

    /// Feed one recognition event into the accumulator. Ignored while idle.
    pub async fn on_fragment(&self, text: &str, is_final: bool) {
        let listening = self.state.lock().await.listening;
        if !listening {
            return;
        }
        self.accumulator.on_fragment(text, is_final);
    }

    /// Classify a recognition-stream error. Only a permission denial halts
    /// listening; transient engine errors ask the host to restart the stream.
    pub async fn on_recognition_error(&self, error: RecognitionError) -> RecoveryAction {
        match error {
            RecognitionError::PermissionDenied => {
                tracing::error!("Recognition permission denied; listening halted");
                let mut state = self.state.lock().await;
                Self::leave_listening(&mut state);
                state.last_notice = Some("microphone permission required".to_string());
                RecoveryAction::Halt
            }
            RecognitionError::Aborted => {
                tracing::debug!("Recognition aborted");
                RecoveryAction::Halt
            }
            RecognitionError::NoSpeech => {
                tracing::debug!("No speech detected, restarting recognition");
                RecoveryAction::Restart
            }
            RecognitionError::Engine(message) => {
                tracing::warn!("Recognition error: {}; restarting", message);
                RecoveryAction::Restart
            }
        }
    }

    /// Stop listening: flush the buffered tail, wait for the pipeline to
    /// settle, then mark the session Paused. The session stays resumable.
    pub async fn stop(&self) -> Result<(), SessionError> {
        {
            let mut state = self.state.lock().await;
            Self::leave_listening(&mut state);
        }

        self.accumulator.stop();
        self.barrier().await;

        let mut state = self.state.lock().await;
        let count = state.transcripts.len() as u32;
        if let Some(session) = state.session.as_mut() {
            session.status = SessionStatus::Paused;
            session.utterance_count = count;
            if self.settings.persist {
                let patch = SessionPatch {
                    status: Some(SessionStatus::Paused),
                    utterance_count: Some(count),
                    ..Default::default()
                };
                if let Err(e) = self.store.update_session(&session.id, patch).await {
                    tracing::warn!("Failed to persist pause: {}", e);
                }
            }
            tracing::info!("Session {} paused at {} utterances", session.id, count);
        }
        Ok(())
    }

    /// Terminal close: flush, mark Completed, then run the best-effort
    /// post-processing pipeline. Each stage is independently caught; a
    /// failure never blocks later stages. With zero utterances the pipeline
    /// is skipped entirely.
    pub async fn finalize(&self) -> Result<Session, SessionError> {
        {
            let mut state = self.state.lock().await;
            Self::leave_listening(&mut state);
        }

        self.accumulator.stop();
        self.barrier().await;

        let (session_id, count, patch) = {
            let mut state = self.state.lock().await;
            let accumulated = state.accumulated_secs;
            let count = state.transcripts.len() as u32;
            let session = state.session.as_mut().ok_or(SessionError::NoActiveSession)?;
            session.status = SessionStatus::Completed;
            session.ended_at = Some(Utc::now());
            session.duration_seconds = accumulated;
            session.utterance_count = count;
            let patch = SessionPatch {
                status: Some(SessionStatus::Completed),
                utterance_count: Some(count),
                ended_at: session.ended_at,
                duration_seconds: Some(accumulated),
                ..Default::default()
            };
            (session.id.clone(), count, patch)
        };

        if self.settings.persist {
            if let Err(e) = self.store.update_session(&session_id, patch).await {
                tracing::warn!("Failed to persist completion: {}", e);
            }
        }

        if count > 0 {
            self.run_post_processing().await;
        } else {
            tracing::info!("Session {} ended empty; skipping post-processing", session_id);
        }

        // Back to idle: the completed session is handed to the caller and the
        // controller is ready for a fresh one.
        let mut state = self.state.lock().await;
        let completed = state.session.take().ok_or(SessionError::NoActiveSession)?;
        state.transcripts.clear();
        state.accumulated_secs = 0;
        state.active_since = None;
        state.last_notice = None;
        self.accumulator.reset();

        tracing::info!(
            "Session {} completed: {} utterances, {}s",
            completed.id,
            completed.utterance_count,
            completed.duration_seconds
        );
        Ok(completed)
    }

    /// Manual merge of selected transcript entries into one utterance.
    ///
    /// Originals are joined oldest-first; the merged entry keeps the earliest
    /// timestamp so it stays in its chronological slot. Persisted rows are
    /// swapped in a single atomic replace.
    pub async fn merge(&self, local_ids: &[String]) -> Result<TranscriptEntry, SessionError> {
        if local_ids.len() < 2 {
            return Err(SessionError::NotEnoughSelected);
        }

        let _gate = self.gate.lock().await;

        let (session, mut selected) = {
            let state = self.state.lock().await;
            let session = state
                .session
                .clone()
                .ok_or(SessionError::NoActiveSession)?;

            let mut selected = Vec::with_capacity(local_ids.len());
            for id in local_ids {
                let entry = state
                    .transcripts
                    .iter()
                    .find(|e| e.local_id == *id)
                    .cloned()
                    .ok_or_else(|| SessionError::UnknownEntry(id.clone()))?;
                selected.push(entry);
            }
            (session, selected)
        };

        selected.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let merged_original = selected
            .iter()
            .map(|e| e.original.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let merged_timestamp = selected[0].timestamp;

        let translated = self.translate_or_empty(&merged_original).await;

        let remove_ids: Vec<String> = selected
            .iter()
            .filter_map(|e| e.utterance_id.clone())
            .collect();
        let queued_ids: Vec<String> = selected
            .iter()
            .filter(|e| e.utterance_id.is_none())
            .map(|e| e.local_id.clone())
            .collect();

        let mut utterance_id = None;
        if self.settings.persist {
            let draft = UtteranceDraft {
                utterance: NewUtterance {
                    session_id: session.id.clone(),
                    speaker_id: self.settings.speaker_id.clone(),
                    original_text: merged_original.clone(),
                    original_language: self.settings.source_language.clone(),
                    started_at: Some(merged_timestamp),
                    ended_at: None,
                },
                translation: self.translation_draft(&translated),
            };
            let inserted = self
                .store
                .replace_utterances(&session.id, &remove_ids, vec![draft])
                .await?;
            utterance_id = inserted.into_iter().next().map(|u| u.id);
        }

        // Queued writes for the merged-away entries must never resurface.
        self.outbox.discard(&queued_ids).await;

        let entry = TranscriptEntry {
            local_id: Uuid::new_v4().to_string(),
            utterance_id,
            translation_id: None,
            original: merged_original,
            translated,
            source_language: self.settings.source_language.clone(),
            target_language: self.settings.target_language.clone(),
            timestamp: merged_timestamp,
        };

        let mut state = self.state.lock().await;
        state
            .transcripts
            .retain(|e| !local_ids.contains(&e.local_id));
        state.transcripts.push(entry.clone());
        state
            .transcripts
            .sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let count = state.transcripts.len() as u32;
        if let Some(session) = state.session.as_mut() {
            session.utterance_count = count;
        }

        tracing::info!("Merged {} entries into one utterance", local_ids.len());
        Ok(entry)
    }

    /// AI regrouping of the whole history. The grouping service sees the
    /// transcript oldest-first; returned groups replace the entire persisted
    /// history atomically, then the visible list. Resulting entries carry
    /// fresh timestamps — per-utterance timing is not preserved on this path.
    pub async fn reorganize(&self) -> Result<(), SessionError> {
        let regrouper = self
            .regrouper
            .as_ref()
            .ok_or(SessionError::ReorganizeUnavailable)?;

        let _gate = self.gate.lock().await;

        let (session, oldest_first) = {
            let state = self.state.lock().await;
            let session = state
                .session
                .clone()
                .ok_or(SessionError::NoActiveSession)?;
            let mut entries = state.transcripts.clone();
            entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
            (session, entries)
        };

        if oldest_first.is_empty() {
            return Err(SessionError::Reorganize(ReorganizeError::Empty));
        }

        let sources: Vec<SourceUtterance> = oldest_first
            .iter()
            .enumerate()
            .map(|(index, e)| SourceUtterance {
                index,
                text: e.original.clone(),
            })
            .collect();

        let groups = regrouper.regroup(&sources).await?;
        tracing::info!(
            "Regrouping {} utterances into {} groups",
            sources.len(),
            groups.len()
        );

        let now = Utc::now();
        let mut drafts = Vec::with_capacity(groups.len());
        let mut new_entries = Vec::with_capacity(groups.len());
        for group in &groups {
            let translated = self.translate_or_empty(&group.text).await;

            drafts.push(UtteranceDraft {
                utterance: NewUtterance {
                    session_id: session.id.clone(),
                    speaker_id: self.settings.speaker_id.clone(),
                    original_text: group.text.clone(),
                    original_language: self.settings.source_language.clone(),
                    started_at: Some(now),
                    ended_at: None,
                },
                translation: self.translation_draft(&translated),
            });
            new_entries.push(TranscriptEntry {
                local_id: Uuid::new_v4().to_string(),
                utterance_id: None,
                translation_id: None,
                original: group.text.clone(),
                translated,
                source_language: self.settings.source_language.clone(),
                target_language: self.settings.target_language.clone(),
                timestamp: now,
            });
        }

        if self.settings.persist {
            let remove_ids: Vec<String> = oldest_first
                .iter()
                .filter_map(|e| e.utterance_id.clone())
                .collect();
            let inserted = self
                .store
                .replace_utterances(&session.id, &remove_ids, drafts)
                .await?;
            for (entry, utterance) in new_entries.iter_mut().zip(inserted) {
                entry.utterance_id = Some(utterance.id);
            }
        }

        let queued_ids: Vec<String> = oldest_first
            .iter()
            .filter(|e| e.utterance_id.is_none())
            .map(|e| e.local_id.clone())
            .collect();
        self.outbox.discard(&queued_ids).await;

        let mut state = self.state.lock().await;
        state.transcripts = new_entries;
        state
            .transcripts
            .sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let count = state.transcripts.len() as u32;
        if let Some(session) = state.session.as_mut() {
            session.utterance_count = count;
        }
        Ok(())
    }

    /// Drain the outbox and backfill server ids onto entries whose writes
    /// just landed.
    pub async fn sync_outbox(&self) -> DrainOutcome {
        let outcome = self.outbox.drain().await;
        if let DrainOutcome::Drained {
            persisted,
            remaining,
            ..
        } = &outcome
        {
            let mut state = self.state.lock().await;
            for (local_id, utterance_id) in persisted {
                if let Some(entry) = state
                    .transcripts
                    .iter_mut()
                    .find(|e| e.local_id == *local_id)
                {
                    entry.utterance_id = Some(utterance_id.clone());
                }
            }
            // Individual drain failures stay silent; a queue that will not
            // empty is worth telling the user about.
            if *remaining > 0 {
                state.last_notice =
                    Some(format!("{} records still waiting to sync", remaining));
            }
        }
        outcome
    }

    /// Visible transcript, newest first.
    pub async fn transcripts(&self) -> Vec<TranscriptEntry> {
        self.state.lock().await.transcripts.clone()
    }

    pub async fn session(&self) -> Option<Session> {
        self.state.lock().await.session.clone()
    }

    pub async fn listening(&self) -> ListeningState {
        if self.state.lock().await.listening {
            ListeningState::Listening
        } else {
            ListeningState::Idle
        }
    }

    /// Buffered text plus the latest interim fragment.
    pub fn live_preview(&self) -> String {
        self.accumulator.preview()
    }

    /// Take the latest transient notice (failed translation, skipped
    /// pipeline stage), clearing it.
    pub async fn take_notice(&self) -> Option<String> {
        self.state.lock().await.last_notice.take()
    }

    async fn run_post_processing(&self) {
        if self.settings.auto_pipeline {
            if self.regrouper.is_some() {
                if let Err(e) = self.reorganize().await {
                    tracing::warn!("Reorganize stage failed: {}", e);
                    self.note(format!("reorganize failed: {}", e)).await;
                }
            }

            if let Some(generator) = &self.document_generator {
                let (session, transcript) = self.snapshot_oldest_first().await;
                if let Some(session) = session {
                    if let Err(e) = generator.generate(&session, &transcript).await {
                        tracing::warn!("Document stage failed: {}", e);
                        self.note(format!("document generation failed: {}", e)).await;
                    }
                }
            }
        }

        if let Some(generator) = &self.summary_generator {
            let (session, transcript) = self.snapshot_oldest_first().await;
            if let Some(session) = session {
                if let Err(e) = generator.summarize(&session, &transcript).await {
                    tracing::warn!("Summary stage failed: {}", e);
                    self.note(format!("summary generation failed: {}", e)).await;
                }
            }
        }
    }

    async fn snapshot_oldest_first(&self) -> (Option<Session>, Vec<TranscriptEntry>) {
        let state = self.state.lock().await;
        let mut transcript = state.transcripts.clone();
        transcript.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        (state.session.clone(), transcript)
    }

    async fn note(&self, message: String) {
        self.state.lock().await.last_notice = Some(message);
    }

    /// Translate with the live-pipeline fallback: a failed service call
    /// records an empty translation instead of losing the text.
    async fn translate_or_empty(&self, text: &str) -> String {
        match self
            .dispatcher
            .translate(
                text,
                &self.settings.source_language,
                &self.settings.target_language,
            )
            .await
        {
            Ok(translated) => translated,
            Err(e) => {
                tracing::warn!("Translation failed, recording original only: {}", e);
                self.note(format!("translation failed: {}", e)).await;
                String::new()
            }
        }
    }

    fn translation_draft(&self, translated: &str) -> Option<TranslationDraft> {
        if self.settings.target_language == TARGET_NONE {
            return None;
        }
        Some(TranslationDraft {
            translated_text: translated.to_string(),
            target_language: self.settings.target_language.clone(),
            provider: self.dispatcher.provider_name().to_string(),
        })
    }

    fn leave_listening(state: &mut ControllerState) {
        state.listening = false;
        if let Some(since) = state.active_since.take() {
            let elapsed = (Utc::now() - since).num_seconds().max(0) as u64;
            state.accumulated_secs += elapsed;
        }
    }

    async fn barrier(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(PipelineEvent::Barrier(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn run_pipeline(mut rx: mpsc::UnboundedReceiver<PipelineEvent>, ctx: PipelineCtx) {
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::Utterance(utterance) => {
                let _gate = ctx.gate.lock().await;
                process_utterance(&ctx, utterance).await;
            }
            PipelineEvent::Barrier(ack) => {
                let _ = ack.send(());
            }
        }
    }
    tracing::debug!("Pipeline worker stopped");
}

/// Translate, persist (or queue), then append to the visible list — in flush
/// order, never in translation-completion order.
async fn process_utterance(ctx: &PipelineCtx, utterance: FlushedUtterance) {
    let source = &ctx.settings.source_language;
    let target = &ctx.settings.target_language;

    let translated = match ctx
        .dispatcher
        .translate(&utterance.text, source, target)
        .await
    {
        Ok(translated) => translated,
        Err(e) => {
            tracing::warn!("Translation failed, recording original only: {}", e);
            ctx.state.lock().await.last_notice = Some(format!("translation failed: {}", e));
            String::new()
        }
    };

    let local_id = Uuid::new_v4().to_string();
    let session_id = ctx
        .state
        .lock()
        .await
        .session
        .as_ref()
        .map(|s| s.id.clone());

    let mut utterance_id = None;
    let mut translation_id = None;
    if let (Some(session_id), true) = (session_id, ctx.settings.persist) {
        let item = OutboxItem {
            local_id: local_id.clone(),
            session_id,
            original_text: utterance.text.clone(),
            original_language: source.clone(),
            translated_text: translated.clone(),
            target_language: target.clone(),
            enqueued_at: Utc::now(),
            attempt_count: 0,
        };
        match ctx
            .outbox
            .attempt_write(item, Some(utterance.started_at))
            .await
        {
            WriteOutcome::Persisted {
                utterance_id: uid,
                translation_id: tid,
            } => {
                utterance_id = Some(uid);
                translation_id = tid;
            }
            WriteOutcome::Queued { .. } => {}
        }
    }

    let entry = TranscriptEntry {
        local_id,
        utterance_id,
        translation_id,
        original: utterance.text,
        translated,
        source_language: source.clone(),
        target_language: target.clone(),
        timestamp: utterance.started_at,
    };

    let mut state = ctx.state.lock().await;
    state.transcripts.insert(0, entry);
    state
        .transcripts
        .sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    let count = state.transcripts.len() as u32;
    if let Some(session) = state.session.as_mut() {
        session.utterance_count = count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reorganize::RegroupedUtterance;
    use crate::storage::MemoryStore;
    use crate::translate::{TranslateError, TranslateProvider};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct PrefixTranslator;

    #[async_trait]
    impl TranslateProvider for PrefixTranslator {
        async fn translate(
            &self,
            text: &str,
            _source: &str,
            target: &str,
        ) -> Result<String, TranslateError> {
            Ok(format!("[{}] {}", target, text))
        }

        fn name(&self) -> &str {
            "test"
        }
    }

    struct BrokenTranslator;

    #[async_trait]
    impl TranslateProvider for BrokenTranslator {
        async fn translate(
            &self,
            _text: &str,
            _source: &str,
            _target: &str,
        ) -> Result<String, TranslateError> {
            Err(TranslateError::Provider("unavailable".to_string()))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    struct FixedRegrouper(Vec<RegroupedUtterance>);

    #[async_trait]
    impl ReorganizeProvider for FixedRegrouper {
        async fn regroup(
            &self,
            _utterances: &[SourceUtterance],
        ) -> Result<Vec<RegroupedUtterance>, ReorganizeError> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct CountingSummary(AtomicU32);

    #[async_trait]
    impl SummaryGenerator for CountingSummary {
        async fn summarize(
            &self,
            _session: &Session,
            _transcript: &[TranscriptEntry],
        ) -> Result<(), GeneratorError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingDocument;

    #[async_trait]
    impl DocumentGenerator for FailingDocument {
        async fn generate(
            &self,
            _session: &Session,
            _transcript: &[TranscriptEntry],
        ) -> Result<(), GeneratorError> {
            Err(GeneratorError("template crashed".to_string()))
        }
    }

    fn settings() -> SessionSettings {
        SessionSettings {
            speaker_id: "speaker-1".to_string(),
            source_language: "ko".to_string(),
            target_language: "en".to_string(),
            title: Some("test session".to_string()),
            persist: true,
            auto_pipeline: true,
        }
    }

    struct Harness {
        controller: SessionController,
        store: Arc<MemoryStore>,
        outbox: Arc<PersistenceOutbox>,
        _dir: tempfile::TempDir,
    }

    fn harness_with(
        translator: Arc<dyn TranslateProvider>,
        settings: SessionSettings,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(TranslationDispatcher::new(translator));
        let outbox = Arc::new(PersistenceOutbox::open(
            store.clone() as Arc<dyn SessionStore>,
            dir.path(),
            "speaker-1",
            "test",
        ));
        let controller = SessionController::new(
            settings,
            store.clone(),
            dispatcher,
            outbox.clone(),
        );
        Harness {
            controller,
            store,
            outbox,
            _dir: dir,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(PrefixTranslator), settings())
    }

    #[tokio::test]
    async fn test_fragment_flows_to_transcript_and_store() {
        let h = harness();
        let session = h.controller.start().await.unwrap();

        h.controller.on_fragment("안녕하세요.", true).await;
        h.controller.stop().await.unwrap();

        let transcripts = h.controller.transcripts().await;
        assert_eq!(transcripts.len(), 1);
        assert_eq!(transcripts[0].original, "안녕하세요.");
        assert_eq!(transcripts[0].translated, "[en] 안녕하세요.");
        assert!(transcripts[0].utterance_id.is_some());

        let stored = h.store.list_utterances(&session.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].original_text, "안녕하세요.");
    }

    #[tokio::test]
    async fn test_resume_reuses_session_and_count() {
        let h = harness();
        let first = h.controller.start().await.unwrap();

        h.controller.on_fragment("첫 번째 문장입니다.", true).await;
        h.controller.stop().await.unwrap();

        let paused = h.controller.session().await.unwrap();
        assert_eq!(paused.status, SessionStatus::Paused);
        assert_eq!(paused.utterance_count, 1);

        let resumed = h.controller.start().await.unwrap();
        assert_eq!(resumed.id, first.id);

        h.controller.on_fragment("두 번째 문장입니다.", true).await;
        h.controller.stop().await.unwrap();

        let session = h.controller.session().await.unwrap();
        assert_eq!(session.id, first.id);
        assert_eq!(session.utterance_count, 2);
        assert_eq!(h.store.list_utterances(&first.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fragments_ignored_while_idle() {
        let h = harness();
        h.controller.on_fragment("말하면 안 돼요.", true).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(h.controller.transcripts().await.is_empty());
    }

    #[tokio::test]
    async fn test_translation_failure_still_records_utterance() {
        let h = harness_with(Arc::new(BrokenTranslator), settings());
        h.controller.start().await.unwrap();

        h.controller.on_fragment("번역 실패 문장.", true).await;
        h.controller.stop().await.unwrap();

        let transcripts = h.controller.transcripts().await;
        assert_eq!(transcripts.len(), 1);
        assert_eq!(transcripts[0].original, "번역 실패 문장.");
        assert_eq!(transcripts[0].translated, "");
        assert!(h.controller.take_notice().await.is_some());
    }

    #[tokio::test]
    async fn test_transcript_keeps_flush_order() {
        let h = harness();
        h.controller.start().await.unwrap();

        h.controller.on_fragment("첫 문장.", true).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.controller.on_fragment("둘째 문장.", true).await;
        h.controller.stop().await.unwrap();

        let transcripts = h.controller.transcripts().await;
        assert_eq!(transcripts.len(), 2);
        // Newest first.
        assert_eq!(transcripts[0].original, "둘째 문장.");
        assert_eq!(transcripts[1].original, "첫 문장.");
    }

    #[tokio::test]
    async fn test_offline_flush_is_queued_then_synced() {
        let h = harness();
        h.controller.start().await.unwrap();
        h.outbox.set_online(false);

        h.controller.on_fragment("오프라인 문장.", true).await;
        h.controller.stop().await.unwrap();

        let transcripts = h.controller.transcripts().await;
        assert_eq!(transcripts.len(), 1);
        assert!(transcripts[0].utterance_id.is_none());
        assert_eq!(h.outbox.pending().await, 1);

        h.outbox.set_online(true);
        let outcome = h.controller.sync_outbox().await;
        assert!(matches!(
            outcome,
            DrainOutcome::Drained { succeeded: 1, remaining: 0, .. }
        ));

        let transcripts = h.controller.transcripts().await;
        assert!(transcripts[0].utterance_id.is_some());
        assert_eq!(h.outbox.pending().await, 0);
    }

    #[tokio::test]
    async fn test_permission_error_halts_but_session_survives() {
        let h = harness();
        h.controller.start().await.unwrap();

        let action = h
            .controller
            .on_recognition_error(RecognitionError::PermissionDenied)
            .await;
        assert_eq!(action, RecoveryAction::Halt);
        assert_eq!(h.controller.listening().await, ListeningState::Idle);

        // The session itself stays usable.
        let session = h.controller.session().await.unwrap();
        let resumed = h.controller.start().await.unwrap();
        assert_eq!(session.id, resumed.id);
    }

    #[tokio::test]
    async fn test_transient_recognition_errors_restart() {
        let h = harness();
        h.controller.start().await.unwrap();

        assert_eq!(
            h.controller
                .on_recognition_error(RecognitionError::NoSpeech)
                .await,
            RecoveryAction::Restart
        );
        assert_eq!(
            h.controller
                .on_recognition_error(RecognitionError::Engine("network".to_string()))
                .await,
            RecoveryAction::Restart
        );
        assert_eq!(h.controller.listening().await, ListeningState::Listening);
    }

    #[tokio::test]
    async fn test_merge_joins_oldest_first_and_keeps_earliest_timestamp() {
        let h = harness();
        let session = h.controller.start().await.unwrap();

        // Two separate utterances, each flushed by its stop().
        h.controller.on_fragment("I think", true).await;
        h.controller.stop().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.controller.start().await.unwrap();
        h.controller.on_fragment("we should proceed", true).await;
        h.controller.stop().await.unwrap();

        let transcripts = h.controller.transcripts().await;
        assert_eq!(transcripts.len(), 2);
        let earliest = transcripts[1].timestamp;
        // Select newest-first to prove ordering comes from timestamps.
        let ids: Vec<String> = transcripts.iter().map(|e| e.local_id.clone()).collect();

        let merged = h.controller.merge(&ids).await.unwrap();
        assert_eq!(merged.original, "I think we should proceed");
        assert_eq!(merged.timestamp, earliest);

        let transcripts = h.controller.transcripts().await;
        assert_eq!(transcripts.len(), 1);
        assert_eq!(transcripts[0].original, "I think we should proceed");

        let stored = h.store.list_utterances(&session.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].original_text, "I think we should proceed");
    }

    #[tokio::test]
    async fn test_merge_requires_two_entries() {
        let h = harness();
        h.controller.start().await.unwrap();
        h.controller.on_fragment("혼자 있는 문장.", true).await;
        h.controller.stop().await.unwrap();

        let ids: Vec<String> = h
            .controller
            .transcripts()
            .await
            .iter()
            .map(|e| e.local_id.clone())
            .collect();
        assert!(matches!(
            h.controller.merge(&ids).await,
            Err(SessionError::NotEnoughSelected)
        ));
    }

    #[tokio::test]
    async fn test_reorganize_replaces_history() {
        let h = harness();
        let session = h.controller.start().await.unwrap();

        h.controller.on_fragment("first half", true).await;
        h.controller.stop().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.controller.start().await.unwrap();
        h.controller.on_fragment("second half", true).await;
        h.controller.stop().await.unwrap();

        let controller = h
            .controller
            .with_regrouper(Arc::new(FixedRegrouper(vec![RegroupedUtterance {
                merged_from: vec![0, 1],
                text: "Combined text".to_string(),
            }])));
        controller.reorganize().await.unwrap();

        let transcripts = controller.transcripts().await;
        assert_eq!(transcripts.len(), 1);
        assert_eq!(transcripts[0].original, "Combined text");
        assert_eq!(transcripts[0].source_language, "ko");
        assert_eq!(transcripts[0].target_language, "en");
        assert_eq!(transcripts[0].translated, "[en] Combined text");
        assert!(transcripts[0].utterance_id.is_some());

        let stored = h.store.list_utterances(&session.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].original_text, "Combined text");
    }

    #[tokio::test]
    async fn test_reorganize_without_provider_fails() {
        let h = harness();
        h.controller.start().await.unwrap();
        assert!(matches!(
            h.controller.reorganize().await,
            Err(SessionError::ReorganizeUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_finalize_empty_session_skips_pipeline() {
        let summary = Arc::new(CountingSummary(AtomicU32::new(0)));
        let h = harness();
        let controller = h.controller.with_summary_generator(summary.clone());

        controller.start().await.unwrap();
        let completed = controller.finalize().await.unwrap();

        assert_eq!(completed.status, SessionStatus::Completed);
        assert_eq!(completed.utterance_count, 0);
        assert_eq!(summary.0.load(Ordering::SeqCst), 0);
        assert!(controller.session().await.is_none());
    }

    #[tokio::test]
    async fn test_finalize_stage_failure_does_not_stop_later_stages() {
        let summary = Arc::new(CountingSummary(AtomicU32::new(0)));
        let h = harness();
        let controller = h
            .controller
            .with_document_generator(Arc::new(FailingDocument))
            .with_summary_generator(summary.clone());

        controller.start().await.unwrap();
        controller.on_fragment("마지막 문장입니다.", true).await;
        let completed = controller.finalize().await.unwrap();

        assert_eq!(completed.status, SessionStatus::Completed);
        assert_eq!(completed.utterance_count, 1);
        // The document stage failed, the summary stage still ran.
        assert_eq!(summary.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_finalize_flushes_pending_buffer() {
        let h = harness();
        h.controller.start().await.unwrap();

        // No terminal punctuation; the buffer is still waiting on silence.
        h.controller.on_fragment("끝나지 않은 문장", true).await;
        let completed = h.controller.finalize().await.unwrap();
        assert_eq!(completed.utterance_count, 1);
    }

    #[tokio::test]
    async fn test_controller_returns_to_idle_after_finalize() {
        let h = harness();
        let first = h.controller.start().await.unwrap();
        h.controller.on_fragment("한 문장입니다.", true).await;
        h.controller.finalize().await.unwrap();

        let second = h.controller.start().await.unwrap();
        assert_ne!(first.id, second.id);
        assert!(h.controller.transcripts().await.is_empty());
    }
}
