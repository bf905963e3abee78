//! Drain a provider byte stream into text.
//!
//! Decoding, repair, and runaway detection happen per read. The function returns
//! whatever text it has whenever it stops: on the terminator, on EOF, on a runaway
//! trigger, or on caller cancellation. Only transport errors are propagated.

use crate::pipeline::decode::{ParsedFrame, StreamRepairParser};
use crate::pipeline::runaway::{RunawayConfig, RunawayDetector};
use crate::pipeline::CancelHandle;
use crate::telemetry::{noop_sink, MetricEvent, MetricsSink};
use crate::types::{DecodedEvent, FinishReason, StreamOutcome};
use crate::{BoxStream, Result};
use bytes::Bytes;
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct StreamOptions {
    /// Resource name used in logs, usually the provider id.
    pub source: String,
    pub runaway: RunawayConfig,
    pub metrics: Arc<dyn MetricsSink>,
}

impl StreamOptions {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            runaway: RunawayConfig::default(),
            metrics: noop_sink(),
        }
    }

    pub fn with_runaway(mut self, runaway: RunawayConfig) -> Self {
        self.runaway = runaway;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self::new("stream")
    }
}

impl fmt::Debug for StreamOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamOptions")
            .field("source", &self.source)
            .field("runaway", &self.runaway)
            .finish_non_exhaustive()
    }
}

/// Accumulate deltas from `input` until the stream finishes or is cut short.
///
/// The input stream is dropped on return, which releases the underlying reader.
pub async fn accumulate_stream(
    mut input: BoxStream<'static, Bytes>,
    options: &StreamOptions,
    cancel: Option<CancelHandle>,
) -> Result<StreamOutcome> {
    let cancel = cancel.unwrap_or_default();
    let mut parser = StreamRepairParser::new();
    let mut detector = RunawayDetector::new(options.runaway.clone())?;
    let mut text = String::new();
    let mut skipped_frames = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(
                    source = options.source.as_str(),
                    chars = text.len(),
                    "stream cancelled by caller"
                );
                return Ok(StreamOutcome {
                    text,
                    finish: FinishReason::Cancelled,
                    skipped_frames,
                });
            }
            next = input.next() => next,
        };

        let (frames, eof) = match next {
            Some(Ok(bytes)) => (parser.push(&bytes), false),
            Some(Err(e)) => return Err(e),
            None => (parser.finish(), true),
        };

        for frame in frames {
            match frame {
                ParsedFrame::Malformed(failure) => {
                    skipped_frames += 1;
                    warn!(
                        source = options.source.as_str(),
                        reason = failure.reason.as_str(),
                        steps = ?failure.steps,
                        "skipping unrepairable frame"
                    );
                    options.metrics.record(MetricEvent::FrameSkipped {
                        reason: failure.reason,
                    });
                }
                ParsedFrame::Event(DecodedEvent::Done) => {
                    return Ok(StreamOutcome {
                        text,
                        finish: FinishReason::Completed,
                        skipped_frames,
                    });
                }
                ParsedFrame::Event(DecodedEvent::Delta { content }) => {
                    text.push_str(&content);
                    if let Some(reason) = detector.observe(&content) {
                        warn!(
                            source = options.source.as_str(),
                            trigger = reason.name(),
                            chars = text.len(),
                            "runaway generation detected, cutting stream"
                        );
                        options.metrics.record(MetricEvent::RunawayDetected {
                            reason: reason.name().to_string(),
                        });
                        return Ok(StreamOutcome {
                            text,
                            finish: FinishReason::Runaway(reason),
                            skipped_frames,
                        });
                    }
                }
            }
        }

        if eof {
            return Ok(StreamOutcome {
                text,
                finish: FinishReason::Completed,
                skipped_frames,
            });
        }
    }
}
