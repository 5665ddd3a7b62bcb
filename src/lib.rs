//! Live speech translation session engine: accumulates recognition
//! fragments into utterances, dispatches translation, and persists records
//! through a durable offline-capable outbox.

pub mod accumulator;
pub mod config;
pub mod model;
pub mod outbox;
pub mod reorganize;
pub mod session;
pub mod storage;
pub mod translate;

pub use accumulator::{is_sentence_complete, FlushedUtterance, SentenceAccumulator, SILENCE_THRESHOLD};
pub use model::{
    OutboxItem, Session, SessionStatus, TranscriptEntry, Translation, Utterance,
};
pub use outbox::{DrainOutcome, PersistenceOutbox, RetryPolicy, WriteOutcome};
pub use reorganize::{GeminiRegrouper, ReorganizeError, ReorganizeProvider};
pub use session::{
    ListeningState, RecognitionError, RecoveryAction, SessionController, SessionError,
    SessionSettings,
};
pub use storage::{MemoryStore, RestStore, SessionStore, StorageError};
pub use translate::{
    GoogleTranslateAdapter, TranslateError, TranslateProvider, TranslationDispatcher, TARGET_NONE,
};
