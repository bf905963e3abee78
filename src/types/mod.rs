//! # Types Module
//!
//! Data passed across the provider boundary.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Message`] | Conversation turn with role and text |
//! | [`ToolDeclaration`] | Opaque callable-tool declaration |
//! | [`DecodedEvent`] | One event extracted from a stream |
//! | [`StreamOutcome`] | Accumulated text plus why the stream stopped |
//!
//! ```rust
//! use llm_relay::types::{Message, ToolDeclaration};
//!
//! let convo = vec![
//!     Message::system("You are a helpful assistant"),
//!     Message::user("What's the weather?"),
//! ];
//! let tool = ToolDeclaration::new(
//!     "get_weather",
//!     serde_json::json!({"type": "object", "properties": {"location": {"type": "string"}}}),
//! );
//! assert_eq!(convo.len(), 2);
//! assert_eq!(tool.name, "get_weather");
//! ```

pub mod events;
pub mod message;
pub mod tool;

pub use events::{DecodedEvent, FinishReason, RunawayReason, StreamOutcome};
pub use message::{Message, MessageRole};
pub use tool::ToolDeclaration;
