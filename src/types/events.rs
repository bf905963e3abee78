//! Events decoded from a provider's event stream.

use serde::{Deserialize, Serialize};

/// One `data:` event extracted from the frame buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum DecodedEvent {
    /// Incremental text produced by the model.
    Delta { content: String },
    /// The provider signalled the end of the stream.
    Done,
}

impl DecodedEvent {
    pub fn delta(content: impl Into<String>) -> Self {
        DecodedEvent::Delta {
            content: content.into(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, DecodedEvent::Done)
    }
}

/// Why a stream stopped producing text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Terminator received or transport reached EOF.
    Completed,
    /// Cut short by the runaway detector.
    Runaway(RunawayReason),
    /// The caller cancelled through its [`crate::pipeline::CancelHandle`].
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunawayReason {
    /// The same error signature matched on consecutive fragments.
    RepeatedError { pattern: String, occurrences: u32 },
    /// Two line sequences in the sliding window were near-identical.
    RepeatedSequence { length: usize, similarity_pct: u32 },
}

impl RunawayReason {
    pub fn name(&self) -> &'static str {
        match self {
            RunawayReason::RepeatedError { .. } => "repeated_error",
            RunawayReason::RepeatedSequence { .. } => "repeated_sequence",
        }
    }
}

/// Result of draining one provider stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    /// Text accumulated up to the point the stream ended.
    pub text: String,
    pub finish: FinishReason,
    /// Frames dropped because they could not be repaired into JSON.
    pub skipped_frames: usize,
}

impl StreamOutcome {
    pub fn completed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish: FinishReason::Completed,
            skipped_frames: 0,
        }
    }

    pub fn cancelled(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish: FinishReason::Cancelled,
            skipped_frames: 0,
        }
    }

    pub fn is_partial(&self) -> bool {
        !matches!(self.finish, FinishReason::Completed)
    }
}
