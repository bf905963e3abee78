//! # Providers
//!
//! A provider turns a conversation into text. [`Provider`] talks to one of the
//! [`ProviderKind`] endpoints; [`ResilientProvider`] puts any [`ChatProvider`]
//! behind a rate limiter, a circuit breaker, and a backoff retrier.
//!
//! Callers normally go through [`create_provider`]:
//!
//! ```rust,no_run
//! use llm_relay::config::RelayConfig;
//! use llm_relay::pipeline::CancelHandle;
//! use llm_relay::provider::create_provider;
//! use llm_relay::types::Message;
//!
//! # async fn run() -> llm_relay::Result<()> {
//! let config = RelayConfig::from_env()?;
//! // API key from GROQ_API_KEY.
//! let groq = create_provider("groq", None, &config)?;
//! let text = groq.make_request(&[Message::user("Say hi")], &[]).await?;
//! println!("{}", text);
//!
//! // Stoppable variant: cancelling returns whatever text has arrived.
//! let cancel = CancelHandle::new();
//! let outcome = groq
//!     .complete(&[Message::user("Write a long story")], &[], Some(cancel.clone()))
//!     .await?;
//! if outcome.is_partial() {
//!     println!("stopped early: {:?}", outcome.finish);
//! }
//! # Ok(())
//! # }
//! ```

pub mod chat;
pub mod kind;
pub mod request;
pub mod resilient;

pub use chat::Provider;
pub use kind::{list_kinds, ProviderKind, SamplingDefaults};
pub use request::build_request_body;
pub use resilient::{ResilienceSnapshot, ResilientProvider};

use crate::config::RelayConfig;
use crate::pipeline::CancelHandle;
use crate::telemetry::{noop_sink, MetricsSink};
use crate::types::{Message, StreamOutcome, ToolDeclaration};
use crate::{Error, Result};
use std::sync::Arc;

/// The provider call boundary.
///
/// Runaway and cancelled streams still return `Ok` with the partial text;
/// errors carry an [`crate::error_code::ErrorClass`].
#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    /// Resource name used for logs, metrics, and resilience components.
    fn name(&self) -> &str;

    async fn make_request(
        &self,
        messages: &[Message],
        tools: &[ToolDeclaration],
    ) -> Result<String>;

    /// Like [`ChatProvider::make_request`], but stoppable through `cancel`.
    ///
    /// The default races `make_request` against the handle, so a provider that
    /// cannot stop mid-stream reports an empty cancelled outcome.
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDeclaration],
        cancel: Option<CancelHandle>,
    ) -> Result<StreamOutcome> {
        let Some(cancel) = cancel else {
            return self.make_request(messages, tools).await.map(StreamOutcome::completed);
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(StreamOutcome::cancelled(String::new())),
            res = self.make_request(messages, tools) => res.map(StreamOutcome::completed),
        }
    }
}

/// Build the resilient provider for a configuration key.
///
/// The API key is the explicit argument if non-blank, otherwise `<PROVIDER>_API_KEY`.
pub fn create_provider(
    key: &str,
    api_key: Option<&str>,
    config: &RelayConfig,
) -> Result<ResilientProvider> {
    create_provider_with_metrics(key, api_key, config, noop_sink())
}

pub fn create_provider_with_metrics(
    key: &str,
    api_key: Option<&str>,
    config: &RelayConfig,
    metrics: Arc<dyn MetricsSink>,
) -> Result<ResilientProvider> {
    let kind: ProviderKind = key.parse()?;
    let api_key = resolve_api_key(kind, api_key, |var| std::env::var(var).ok())?;
    let provider = Provider::new(kind, api_key, config)?.with_metrics(metrics.clone());
    Ok(ResilientProvider::with_metrics(
        Arc::new(provider),
        config,
        metrics,
    ))
}

/// Explicit key first, then the provider's env var. Blank values count as absent.
pub fn resolve_api_key(
    kind: ProviderKind,
    explicit: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String> {
    explicit
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .or_else(|| {
            lookup(kind.api_key_env())
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
        })
        .ok_or_else(|| Error::MissingCredential {
            provider: kind.id().to_string(),
            env_var: kind.api_key_env().to_string(),
        })
}
