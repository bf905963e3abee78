//! # llm-relay
//!
//! Resilient streaming request layer for interchangeable text-generation providers.
//!
//! ## Overview
//!
//! The relay sends a conversation to one of several OpenAI-compatible providers,
//! consumes the event-stream response incrementally, repairs near-JSON frames,
//! cuts off runaway generations, and shields callers from a failing provider with
//! rate limiting, circuit breaking, and exponential backoff.
//!
//! ```text
//! caller → RateLimiter → CircuitBreaker → BackoffRetrier → Provider
//!                                                            │
//!            text ← RunawayDetector ← repair_json ← SseLineDecoder ← bytes
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use llm_relay::{create_provider, Message, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() -> llm_relay::Result<()> {
//!     llm_relay::telemetry::init_tracing();
//!     let config = RelayConfig::from_env()?;
//!     let mistral = create_provider("mistral", None, &config)?;
//!
//!     let messages = vec![
//!         Message::system("Answer in one sentence."),
//!         Message::user("What is a circuit breaker?"),
//!     ];
//!     let text = mistral.make_request(&messages, &[]).await?;
//!     println!("{}", text);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`provider`] | Provider contract, concrete endpoints, resilient composition |
//! | [`pipeline`] | Stream decoding, JSON repair, runaway detection |
//! | [`resilience`] | Rate limiter, circuit breaker, backoff retrier |
//! | [`config`] | YAML and environment configuration |
//! | [`telemetry`] | Metrics sinks and tracing setup |
//! | [`types`] | Messages, tool declarations, stream outcomes |
//! | [`error_code`] | Error classes driving retry and breaker decisions |

pub mod config;
pub mod error;
pub mod error_code;
pub mod pipeline;
pub mod provider;
pub mod resilience;
pub mod telemetry;
pub mod transport;
pub mod types;

pub use config::RelayConfig;
pub use error::{Error, ErrorContext};
pub use error_code::ErrorClass;
pub use pipeline::CancelHandle;
pub use provider::{create_provider, ChatProvider, Provider, ProviderKind, ResilientProvider};
pub use types::{Message, MessageRole, StreamOutcome, ToolDeclaration};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A pinned, boxed stream of fallible items.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;
