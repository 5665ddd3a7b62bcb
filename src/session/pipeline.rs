// src/session/pipeline.rs
// Post-processing seams invoked by finalize(). The generators' internals are
// external to the core; failures here are reported and never fatal.

use crate::model::{Session, TranscriptEntry};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct GeneratorError(pub String);

/// Produces the session's structured document (meeting notes etc.) from the
/// finalized transcript.
#[async_trait]
pub trait DocumentGenerator: Send + Sync {
    async fn generate(
        &self,
        session: &Session,
        transcript: &[TranscriptEntry],
    ) -> Result<(), GeneratorError>;
}

/// Produces the session summary from the finalized transcript.
#[async_trait]
pub trait SummaryGenerator: Send + Sync {
    async fn summarize(
        &self,
        session: &Session,
        transcript: &[TranscriptEntry],
    ) -> Result<(), GeneratorError>;
}
