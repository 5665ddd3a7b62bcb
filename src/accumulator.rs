// src/accumulator.rs
// Groups a stream of recognition fragments into complete utterances.
//
// Two flush triggers: sentence-terminal punctuation on a final fragment
// (immediate), or 1500ms of silence after the last final fragment.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

/// Silence gap that finalizes a buffered utterance.
pub const SILENCE_THRESHOLD: Duration = Duration::from_millis(1500);

const SENTENCE_ENDINGS: [char; 8] = ['.', '?', '!', '。', '？', '！', '~', '…'];

/// A finalized utterance handed downstream for translation + persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedUtterance {
    pub text: String,
    /// When the first fragment of this utterance arrived.
    pub started_at: DateTime<Utc>,
}

/// Receives flushed utterances, in flush order.
pub type FlushSink = Arc<dyn Fn(FlushedUtterance) + Send + Sync>;

/// True when a fragment clearly ends a sentence.
pub fn is_sentence_complete(text: &str) -> bool {
    let trimmed = text.trim_end();
    SENTENCE_ENDINGS.iter().any(|e| trimmed.ends_with(*e))
}

/// Strip engine annotations like `[music]` and collapse whitespace.
fn clean_fragment(text: &str) -> String {
    static ANNOTATION_RE: OnceLock<Regex> = OnceLock::new();
    let re = ANNOTATION_RE
        .get_or_init(|| Regex::new(r"\[[^\]]*\]").expect("valid annotation regex"));
    let stripped = re.replace_all(text, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

struct AccumulatorState {
    buffer: String,
    started_at: Option<DateTime<Utc>>,
    last_committed: String,
    preview: String,
    /// Bumped on every (re)schedule and cancel; an expired timer whose
    /// generation no longer matches must not flush.
    timer_generation: u64,
}

impl AccumulatorState {
    fn new() -> Self {
        Self {
            buffer: String::new(),
            started_at: None,
            last_committed: String::new(),
            preview: String::new(),
            timer_generation: 0,
        }
    }

    fn flush(&mut self, sink: &FlushSink) {
        self.timer_generation += 1;
        self.preview.clear();

        let text = std::mem::take(&mut self.buffer);
        let started_at = self.started_at.take().unwrap_or_else(Utc::now);

        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }

        tracing::debug!("Flushing utterance ({} chars)", text.chars().count());
        sink(FlushedUtterance { text, started_at });
    }
}

pub struct SentenceAccumulator {
    state: Arc<Mutex<AccumulatorState>>,
    sink: FlushSink,
    silence_threshold: Duration,
}

impl SentenceAccumulator {
    pub fn new(sink: FlushSink) -> Self {
        Self::with_threshold(sink, SILENCE_THRESHOLD)
    }

    pub fn with_threshold(sink: FlushSink, silence_threshold: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(AccumulatorState::new())),
            sink,
            silence_threshold,
        }
    }

    /// Feed one recognition event. Interim fragments only refresh the live
    /// preview; final fragments are committed to the buffer and may flush.
    pub fn on_fragment(&self, text: &str, is_final: bool) {
        let cleaned = clean_fragment(text);

        let Ok(mut state) = self.state.lock() else {
            return;
        };

        if !is_final {
            state.preview = if state.buffer.is_empty() {
                cleaned
            } else {
                format!("{} {}", state.buffer, cleaned)
            };
            return;
        }

        let trimmed = cleaned.trim();
        if trimmed.is_empty() {
            return;
        }

        // Recognition engines may redeliver the same final result.
        if trimmed == state.last_committed {
            tracing::debug!("Duplicate final fragment skipped");
            return;
        }

        if state.buffer.is_empty() {
            state.buffer = trimmed.to_string();
            state.started_at = Some(Utc::now());
        } else {
            state.buffer.push(' ');
            state.buffer.push_str(trimmed);
        }
        state.last_committed = trimmed.to_string();
        state.preview = state.buffer.clone();

        if is_sentence_complete(trimmed) {
            state.flush(&self.sink);
        } else {
            let generation = {
                state.timer_generation += 1;
                state.timer_generation
            };
            drop(state);
            self.arm_silence_timer(generation);
        }
    }

    /// Current live text: buffered finals plus the latest interim fragment.
    pub fn preview(&self) -> String {
        self.state
            .lock()
            .map(|state| state.preview.clone())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.buffer.is_empty())
            .unwrap_or(true)
    }

    /// Clean stop: cancel the silence timer and flush whatever is buffered
    /// before returning.
    pub fn stop(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.flush(&self.sink);
        }
    }

    /// Abrupt teardown or session switch: buffered text is dropped.
    pub fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.timer_generation += 1;
            state.buffer.clear();
            state.started_at = None;
            state.last_committed.clear();
            state.preview.clear();
        }
    }

    fn arm_silence_timer(&self, generation: u64) {
        let state = Arc::clone(&self.state);
        let sink = Arc::clone(&self.sink);
        let threshold = self.silence_threshold;

        tokio::spawn(async move {
            tokio::time::sleep(threshold).await;

            let Ok(mut state) = state.lock() else {
                return;
            };
            if state.timer_generation != generation {
                // Cancelled, or a newer fragment rescheduled the timer.
                return;
            }
            if !state.buffer.is_empty() {
                tracing::debug!("Silence threshold reached");
                state.flush(&sink);
            }
        });
    }
}
