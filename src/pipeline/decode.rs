//! Incremental event-stream decoding (Bytes -> DecodedEvent).
//!
//! Transport reads never line up with event boundaries, so [`SseLineDecoder`] keeps
//! a byte buffer across reads and only releases complete lines. Splitting happens on
//! raw bytes: `\n` never occurs inside a multi-byte UTF-8 sequence, so a character
//! cut in half by a read boundary is reassembled before it is decoded.
//!
//! [`StreamRepairParser`] layers the JSON repair pass on top and turns each `data:`
//! line into a [`ParsedFrame`].

use crate::pipeline::repair::{repair_json, RepairFailure, RepairOutcome};
use crate::types::DecodedEvent;
use serde_json::Value;
use tracing::debug;

/// Field prefix of event lines that carry a payload.
pub const DATA_PREFIX: &str = "data:";
/// Payload that marks the end of a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One complete, classified event-stream line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    Data(String),
    Done,
}

/// Line-oriented `data:` extractor with a persistent buffer.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buf: Vec<u8>,
    done: bool,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one transport read and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseLine> {
        if self.done {
            return Vec::new();
        }
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buf[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let line = classify(&self.buf[start..end]);
            start = end + 1;
            if let Some(line) = line {
                let is_done = line == SseLine::Done;
                out.push(line);
                if is_done {
                    self.done = true;
                    break;
                }
            }
        }

        if self.done {
            self.buf.clear();
        } else {
            self.buf.drain(..start);
        }
        out
    }

    /// Flush a final line that arrived without a trailing newline.
    pub fn finish(&mut self) -> Vec<SseLine> {
        if self.done || self.buf.is_empty() {
            self.buf.clear();
            return Vec::new();
        }
        let rest = std::mem::take(&mut self.buf);
        match classify(&rest) {
            Some(line) => {
                self.done = line == SseLine::Done;
                vec![line]
            }
            None => Vec::new(),
        }
    }

    /// The terminator has been seen; later input is ignored.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Bytes held back waiting for a newline.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

fn classify(raw: &[u8]) -> Option<SseLine> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches('\r');
    let trimmed = line.trim();

    // Blank separators and `:` comments carry nothing.
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }
    // `event:`, `id:`, `retry:` and anything unknown are ignored.
    let payload = trimmed.strip_prefix(DATA_PREFIX)?.trim();
    if payload == DONE_SENTINEL {
        Some(SseLine::Done)
    } else {
        Some(SseLine::Data(payload.to_string()))
    }
}

/// Pull the text delta out of an OpenAI-compatible chunk.
///
/// Streaming chunks carry `choices[0].delta.content`; complete responses carry
/// `choices[0].message.content`. Role-only and finish-only chunks yield `None`.
pub fn extract_event(value: &Value) -> Option<DecodedEvent> {
    let choice = value.get("choices")?.get(0)?;
    let content = choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .or_else(|| choice.get("message").and_then(|m| m.get("content")))?
        .as_str()?;
    if content.is_empty() {
        return None;
    }
    Some(DecodedEvent::delta(content))
}

/// Output of [`StreamRepairParser`] for one `data:` line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedFrame {
    Event(DecodedEvent),
    /// The payload could not be repaired; the caller decides whether to skip it.
    Malformed(RepairFailure),
}

/// Byte stream to decoded events, repairing near-JSON payloads on the way.
#[derive(Debug, Default)]
pub struct StreamRepairParser {
    lines: SseLineDecoder,
}

impl StreamRepairParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<ParsedFrame> {
        self.lines
            .push(chunk)
            .into_iter()
            .filter_map(parse_line)
            .collect()
    }

    pub fn finish(&mut self) -> Vec<ParsedFrame> {
        self.lines
            .finish()
            .into_iter()
            .filter_map(parse_line)
            .collect()
    }

    pub fn is_done(&self) -> bool {
        self.lines.is_done()
    }
}

fn parse_line(line: SseLine) -> Option<ParsedFrame> {
    let payload = match line {
        SseLine::Done => return Some(ParsedFrame::Event(DecodedEvent::Done)),
        SseLine::Data(payload) => payload,
    };
    match repair_json(&payload) {
        RepairOutcome::Repaired { value, steps, .. } => {
            if !steps.is_empty() {
                debug!(steps = ?steps, "repaired stream frame");
            }
            extract_event(&value).map(ParsedFrame::Event)
        }
        RepairOutcome::Failed(failure) => Some(ParsedFrame::Malformed(failure)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(content: &str) -> String {
        format!(
            "data: {}\n\n",
            json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    #[test]
    fn test_lines_buffered_across_reads() {
        let mut dec = SseLineDecoder::new();
        assert!(dec.push(b"data: {\"a\"").is_empty());
        assert!(dec.buffered() > 0);
        let lines = dec.push(b":1}\n\ndata: [DONE]\n");
        assert_eq!(
            lines,
            vec![SseLine::Data("{\"a\":1}".into()), SseLine::Done]
        );
        assert!(dec.is_done());
        assert!(dec.push(b"data: {}\n").is_empty());
    }

    #[test]
    fn test_comments_and_other_fields_ignored() {
        let mut dec = SseLineDecoder::new();
        let lines = dec.push(b": keep-alive\nevent: message\nid: 7\r\n\r\ndata:{}\r\n");
        assert_eq!(lines, vec![SseLine::Data("{}".into())]);
    }

    #[test]
    fn test_multibyte_char_split_across_reads() {
        let line = chunk("héllo 🌍");
        let bytes = line.as_bytes();
        let emoji_start = line.find('🌍').unwrap();
        let mut parser = StreamRepairParser::new();
        let mut frames = parser.push(&bytes[..emoji_start + 2]);
        frames.extend(parser.push(&bytes[emoji_start + 2..]));
        assert_eq!(
            frames,
            vec![ParsedFrame::Event(DecodedEvent::delta("héllo 🌍"))]
        );
    }

    #[test]
    fn test_final_line_without_newline_flushed() {
        let mut parser = StreamRepairParser::new();
        let body = chunk("tail");
        assert!(parser.push(body.trim_end().as_bytes()).is_empty());
        assert_eq!(
            parser.finish(),
            vec![ParsedFrame::Event(DecodedEvent::delta("tail"))]
        );
    }

    #[test]
    fn test_near_json_frame_repaired() {
        let mut parser = StreamRepairParser::new();
        let frames = parser.push(b"data: {\"choices\": [{\"delta\": {content: hi there}}]}\n");
        assert_eq!(
            frames,
            vec![ParsedFrame::Event(DecodedEvent::delta("hi there"))]
        );
    }

    #[test]
    fn test_unrepairable_frame_reported() {
        let mut parser = StreamRepairParser::new();
        let frames = parser.push(b"data: }}{{ :: ]]\n");
        assert!(matches!(frames.as_slice(), [ParsedFrame::Malformed(_)]));
    }

    #[test]
    fn test_extract_event_shapes() {
        let delta = json!({"choices": [{"delta": {"content": "a"}}]});
        let message = json!({"choices": [{"message": {"role": "assistant", "content": "b"}}]});
        let role_only = json!({"choices": [{"delta": {"role": "assistant"}}]});
        let finish = json!({"choices": [{"delta": {}, "finish_reason": "stop"}]});
        assert_eq!(extract_event(&delta), Some(DecodedEvent::delta("a")));
        assert_eq!(extract_event(&message), Some(DecodedEvent::delta("b")));
        assert_eq!(extract_event(&role_only), None);
        assert_eq!(extract_event(&finish), None);
        assert_eq!(extract_event(&json!({})), None);
    }
}
