//! # Streaming Pipeline
//!
//! Turns a provider's raw byte stream into accumulated text.
//!
//! ```text
//! Bytes → SseLineDecoder → repair_json → extract_event → RunawayDetector → text
//!           (buffering)     (per line)    (delta/done)    (per fragment)
//! ```
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`decode`] | Line buffering, `data:` extraction, [`decode::StreamRepairParser`] |
//! | [`repair`] | Heuristic repair of near-JSON payloads |
//! | [`runaway`] | Repeated-error and repeated-sequence detection |
//! | [`accumulate`] | Drives the stages and handles cancellation |
//!
//! ## Example
//!
//! ```rust
//! use llm_relay::pipeline::{accumulate_stream, StreamOptions};
//! use llm_relay::types::FinishReason;
//! use bytes::Bytes;
//! use futures::stream;
//!
//! # tokio_test::block_on(async {
//! let body = "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n\n";
//! let input = Box::pin(stream::iter(vec![Ok(Bytes::from(body))]));
//! let out = accumulate_stream(input, &StreamOptions::default(), None).await?;
//! assert_eq!(out.text, "hi");
//! assert_eq!(out.finish, FinishReason::Completed);
//! # Ok::<(), llm_relay::Error>(())
//! # }).unwrap();
//! ```

pub mod accumulate;
pub mod decode;
pub mod repair;
pub mod runaway;

pub use accumulate::{accumulate_stream, StreamOptions};
pub use decode::{extract_event, ParsedFrame, SseLine, SseLineDecoder, StreamRepairParser};
pub use repair::{repair_json, RepairFailure, RepairOutcome, RepairStep};
pub use runaway::{similarity, RunawayConfig, RunawayDetector};

use tokio_util::sync::CancellationToken;

/// Caller-side abort signal for an in-flight stream.
///
/// Cancelling stops the read loop and yields the text accumulated so far.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// A handle cancelled together with this one, but cancellable on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }
}
