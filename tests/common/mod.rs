//! Mock HTTP server setup for integration tests

#![allow(dead_code)]

use llm_relay::config::ProviderOverride;
use llm_relay::provider::{Provider, ProviderKind};
use llm_relay::RelayConfig;
use mockito::{Server, ServerGuard};
use serde_json::json;

pub const CHAT_PATH: &str = "/v1/chat/completions";
pub const API_KEY: &str = "test-key";

/// Test fixture that owns a mock provider endpoint.
pub struct MockProviderServer {
    pub server: ServerGuard,
}

impl MockProviderServer {
    pub async fn new() -> Self {
        Self {
            server: Server::new_async().await,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.server.url(), CHAT_PATH)
    }

    /// Fast, deterministic settings pointed at this server.
    pub fn config(&self, kind: ProviderKind) -> RelayConfig {
        let mut cfg = RelayConfig::default();
        cfg.http.min_request_interval_ms = 0;
        cfg.http.timeout_ms = 5_000;
        cfg.retry.base_delay_ms = 1;
        cfg.retry.max_delay_ms = 5;
        cfg.retry.max_jitter_ms = 0;
        cfg.providers.insert(
            kind.id().to_string(),
            ProviderOverride {
                model: Some("test-model".into()),
                endpoint: Some(self.endpoint()),
            },
        );
        cfg
    }

    pub fn provider(&self, kind: ProviderKind, cfg: &RelayConfig) -> Provider {
        Provider::new(kind, API_KEY, cfg).expect("provider builds")
    }
}

/// One streaming chunk carrying a content delta.
pub fn delta_chunk(content: &str) -> String {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion.chunk",
        "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}]
    })
    .to_string()
}

/// Event-stream body from `data:` payloads, terminated by `[DONE]`.
pub fn sse_body(payloads: &[String]) -> String {
    let mut body: String = payloads
        .iter()
        .map(|p| format!("data: {}\n\n", p))
        .collect();
    body.push_str("data: [DONE]\n\n");
    body
}
