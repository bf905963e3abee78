use crate::config::HttpSettings;
use crate::transport::TransportError;
use crate::{BoxStream, Error, Result};
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::Proxy;
use std::env;
use std::time::Duration;
use tracing::debug;

/// Correlation id header attached to every outgoing request.
pub const REQUEST_ID_HEADER: &str = "x-llm-relay-request-id";

/// Pooled HTTP client shared by the requests of one provider.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        let timeout = settings.timeout();

        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .pool_max_idle_per_host(
                env::var("LLM_RELAY_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(32),
            )
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            // Streams stay open for minutes; keep HTTP/2 connections alive meanwhile.
            .http2_adaptive_window(true)
            .http2_keep_alive_interval(Some(Duration::from_secs(30)))
            .http2_keep_alive_timeout(Duration::from_secs(10));

        if let Ok(proxy_url) = env::var("LLM_RELAY_PROXY_URL") {
            if let Ok(proxy) = Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST a JSON body with bearer auth. Any status is returned as-is; the caller
    /// classifies non-success responses.
    pub async fn post_json(
        &self,
        url: &str,
        api_key: &str,
        body: &serde_json::Value,
        stream: bool,
        request_id: &str,
    ) -> Result<reqwest::Response> {
        let mut req = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .header(REQUEST_ID_HEADER, request_id)
            .json(body);
        if stream {
            req = req.header("accept", "text/event-stream");
        }

        debug!(url, request_id, stream, "sending request");
        req.send()
            .await
            .map_err(|e| Error::Transport(TransportError::Http(e)))
    }

    /// The response body as a byte stream; read errors surface as transport errors.
    pub fn byte_stream(response: reqwest::Response) -> BoxStream<'static, Bytes> {
        Box::pin(
            response
                .bytes_stream()
                .map_err(|e| Error::Transport(TransportError::Http(e))),
        )
    }
}
