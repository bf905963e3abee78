use crate::config::RelayConfig;
use crate::error_code::ErrorClass;
use crate::pipeline::{accumulate_stream, CancelHandle, StreamOptions};
use crate::provider::kind::ProviderKind;
use crate::provider::request::{build_request_body, error_message_from_body};
use crate::provider::ChatProvider;
use crate::telemetry::{noop_sink, MetricEvent, MetricsSink};
use crate::transport::{HttpTransport, TransportError};
use crate::types::{FinishReason, Message, StreamOutcome, ToolDeclaration};
use crate::{Error, ErrorContext, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

/// One configured provider endpoint.
///
/// Built once and reused. Consecutive requests are spaced by at least the
/// configured minimum interval; concurrent callers wait their turn.
pub struct Provider {
    kind: ProviderKind,
    api_key: String,
    endpoint: String,
    model: String,
    stream: bool,
    min_interval: Duration,
    last_request_time: Mutex<Option<Instant>>,
    transport: HttpTransport,
    stream_options: StreamOptions,
    metrics: Arc<dyn MetricsSink>,
}

impl Provider {
    /// Model precedence: `<PROVIDER>_MODEL`, then the config override, then the
    /// built-in default.
    pub fn new(
        kind: ProviderKind,
        api_key: impl Into<String>,
        config: &RelayConfig,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::MissingCredential {
                provider: kind.id().to_string(),
                env_var: kind.api_key_env().to_string(),
            });
        }
        let overrides = config.provider_override(kind.id());
        let model = non_empty_env(kind.model_env())
            .or_else(|| overrides.and_then(|o| o.model.clone()))
            .unwrap_or_else(|| kind.default_model().to_string());
        let endpoint = overrides
            .and_then(|o| o.endpoint.clone())
            .unwrap_or_else(|| kind.endpoint().to_string());
        url::Url::parse(&endpoint).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid endpoint for {}", kind.id()),
                ErrorContext::new()
                    .with_field_path(format!("providers.{}.endpoint", kind.id()))
                    .with_details(e.to_string()),
            )
        })?;

        Ok(Self {
            kind,
            api_key,
            endpoint,
            model,
            stream: config.http.stream,
            min_interval: config.http.min_request_interval(),
            last_request_time: Mutex::new(None),
            transport: HttpTransport::new(&config.http)?,
            stream_options: StreamOptions::new(kind.id()).with_runaway(config.runaway.clone()),
            metrics: noop_sink(),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.stream_options = self.stream_options.with_metrics(metrics.clone());
        self.metrics = metrics;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send the conversation and return the accumulated text with its finish reason.
    ///
    /// Runaway and cancellation yield `Ok` with partial text; see
    /// [`StreamOutcome::is_partial`].
    pub async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDeclaration],
        cancel: Option<CancelHandle>,
    ) -> Result<StreamOutcome> {
        if messages.is_empty() {
            return Err(Error::validation_with_context(
                "conversation must contain at least one message",
                ErrorContext::new()
                    .with_field_path("messages")
                    .with_source(self.kind.id()),
            ));
        }

        self.pace().await;
        let request_id = uuid::Uuid::new_v4().to_string();
        let sampling = self.kind.sampling();
        let body = build_request_body(&self.model, &sampling, messages, tools, self.stream);
        let started = Instant::now();

        let resp = self
            .transport
            .post_json(&self.endpoint, &self.api_key, &body, self.stream, &request_id)
            .await?;
        if !resp.status().is_success() {
            return Err(self.http_failure(resp, &request_id, started).await);
        }

        let outcome = if self.stream {
            accumulate_stream(HttpTransport::byte_stream(resp), &self.stream_options, cancel)
                .await?
        } else {
            let value: Value = resp
                .json()
                .await
                .map_err(|e| Error::Transport(TransportError::Http(e)))?;
            StreamOutcome {
                text: message_content(&value, self.kind)?,
                finish: FinishReason::Completed,
                skipped_frames: 0,
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            provider = self.kind.id(),
            model = self.model.as_str(),
            request_id = request_id.as_str(),
            duration_ms,
            chars = outcome.text.len(),
            partial = outcome.is_partial(),
            skipped_frames = outcome.skipped_frames,
            "request completed"
        );
        self.metrics.record(MetricEvent::RequestCompleted {
            provider: self.kind.id().to_string(),
            duration_ms,
            chars: outcome.text.len(),
        });
        Ok(outcome)
    }

    async fn pace(&self) {
        let mut last = self.last_request_time.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn http_failure(
        &self,
        resp: reqwest::Response,
        request_id: &str,
        started: Instant,
    ) -> Error {
        let status = resp.status().as_u16();
        let class = ErrorClass::from_http_status(status);
        let body = resp.text().await.unwrap_or_default();
        let message = error_message_from_body(&body);
        warn!(
            provider = self.kind.id(),
            request_id,
            http_status = status,
            error_class = class.name(),
            duration_ms = started.elapsed().as_millis() as u64,
            "provider request failed"
        );
        Error::Remote {
            provider: self.kind.id().to_string(),
            status,
            class,
            message,
        }
    }
}

#[async_trait::async_trait]
impl ChatProvider for Provider {
    fn name(&self) -> &str {
        self.kind.id()
    }

    async fn make_request(
        &self,
        messages: &[Message],
        tools: &[ToolDeclaration],
    ) -> Result<String> {
        Ok(Provider::complete(self, messages, tools, None).await?.text)
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDeclaration],
        cancel: Option<CancelHandle>,
    ) -> Result<StreamOutcome> {
        Provider::complete(self, messages, tools, cancel).await
    }
}

fn message_content(value: &Value, kind: ProviderKind) -> Result<String> {
    value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            Error::runtime_with_context(
                "response carried no message content",
                ErrorContext::new()
                    .with_field_path("choices[0].message.content")
                    .with_source(kind.id()),
            )
        })
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
