//! Chat-completions request bodies.

use crate::provider::kind::SamplingDefaults;
use crate::types::{Message, ToolDeclaration};
use serde_json::{json, Value};

/// Build the OpenAI-compatible request body.
///
/// Messages keep their order. Tools are forwarded untouched and the `tools` key is
/// omitted entirely when there are none, since some providers reject an empty list.
pub fn build_request_body(
    model: &str,
    sampling: &SamplingDefaults,
    messages: &[Message],
    tools: &[ToolDeclaration],
    stream: bool,
) -> Value {
    let mut body = json!({
        "model": model,
        "messages": messages,
        "temperature": sampling.temperature,
        "top_p": sampling.top_p,
        "max_tokens": sampling.max_tokens,
        "stream": stream,
    });
    if !tools.is_empty() {
        body["tools"] = Value::Array(tools.iter().map(ToolDeclaration::to_function_tool).collect());
        body["tool_choice"] = json!("auto");
    }
    body
}

/// Best-effort human-readable message from an error response body.
pub fn error_message_from_body(body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let from_json = parsed.as_ref().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("error").filter(|e| e.is_string()))
            .or_else(|| v.get("message"))
            .or_else(|| v.get("detail"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    from_json.unwrap_or_else(|| {
        let trimmed = body.trim();
        match trimmed.char_indices().nth(500) {
            Some((idx, _)) => format!("{}…", &trimmed[..idx]),
            None => trimmed.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderKind;

    #[test]
    fn test_body_preserves_order_and_defaults() {
        let messages = vec![
            Message::system("sys"),
            Message::user("q1"),
            Message::assistant("a1"),
            Message::user("q2"),
        ];
        let sampling = ProviderKind::Groq.sampling();
        let body = build_request_body("m", &sampling, &messages, &[], true);
        assert_eq!(body["model"], "m");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 8192);
        let contents: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["content"].as_str().unwrap())
            .collect();
        assert_eq!(contents, vec!["sys", "q1", "a1", "q2"]);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_tools_forwarded() {
        let tool = ToolDeclaration::new("lookup", json!({"type": "object"}));
        let sampling = ProviderKind::Mistral.sampling();
        let body = build_request_body("m", &sampling, &[Message::user("x")], &[tool], false);
        assert_eq!(body["tools"][0]["function"]["name"], "lookup");
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message_from_body(
                r#"{"error":{"message":"Rate limit reached","type":"tokens"}}"#
            ),
            "Rate limit reached"
        );
        assert_eq!(error_message_from_body(r#"{"error":"bad key"}"#), "bad key");
        assert_eq!(error_message_from_body(r#"{"detail":"Unauthorized"}"#), "Unauthorized");
        assert_eq!(error_message_from_body("  upstream down \n"), "upstream down");
        let long = "x".repeat(600);
        assert_eq!(error_message_from_body(&long).chars().count(), 501);
    }
}
