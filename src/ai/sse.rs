//! Server-Sent-Events consumption for the two upstream dialects.
//!
//! Modeled as a pure function from (buffer, new bytes) to (events,
//! retained remainder) so the dialect branches can be property-tested
//! without any network I/O. Tool-use fragments arrive split across
//! several raw SSE events (a start, zero or more deltas, a stop) and
//! are accumulated per content-block index before being surfaced as a
//! single `StreamEvent::ToolUse`.

use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Anthropic,
    OpenAi,
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    Text(String),
    ToolUse { id: String, name: String, input: Value },
    Usage { input_tokens: u64, output_tokens: u64 },
    Done,
    Error(String),
}

#[derive(Debug, Clone, Default)]
struct PendingTool {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Default)]
pub struct SseBuffer {
    buf: String,
    pending_tools: HashMap<u64, PendingTool>,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk of the upstream response body and returns every
    /// complete event now available, in order. A trailing partial event
    /// is retained for the next call.
    pub fn push_chunk(&mut self, chunk: &str, dialect: Dialect) -> Vec<StreamEvent> {
        self.buf.push_str(chunk);
        let mut events = Vec::new();
        while let Some((event_end, terminator_len)) = find_event_terminator(&self.buf) {
            let raw_event = self.buf[..event_end].to_string();
            self.buf.drain(..event_end + terminator_len);
            events.extend(self.parse_event(&raw_event, dialect));
        }
        events
    }

    fn parse_event(&mut self, raw: &str, dialect: Dialect) -> Vec<StreamEvent> {
        match dialect {
            Dialect::Anthropic => self.parse_anthropic_event(raw),
            Dialect::OpenAi => self.parse_openai_event(raw),
        }
    }

    fn parse_anthropic_event(&mut self, raw: &str) -> Vec<StreamEvent> {
        let mut event_name = None;
        let mut data = None;
        for line in raw.lines() {
            if let Some(rest) = line.strip_prefix("event:") {
                event_name = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("data:") {
                data = Some(rest.trim().to_string());
            }
        }
        let Some(event_name) = event_name else { return Vec::new() };
        let Some(data) = data else { return Vec::new() };
        let Ok(json) = serde_json::from_str::<Value>(&data) else { return Vec::new() };

        match event_name.as_str() {
            "content_block_start" => {
                let Some(block) = json.get("content_block") else { return Vec::new() };
                if block.get("type").and_then(Value::as_str) != Some("tool_use") {
                    return Vec::new();
                }
                let index = json.get("index").and_then(Value::as_u64).unwrap_or(0);
                let id = block.get("id").and_then(Value::as_str).unwrap_or("").to_string();
                let name = block.get("name").and_then(Value::as_str).unwrap_or("").to_string();
                self.pending_tools.insert(index, PendingTool { id, name, arguments: String::new() });
                Vec::new()
            }
            "content_block_delta" => {
                let index = json.get("index").and_then(Value::as_u64).unwrap_or(0);
                let Some(delta) = json.get("delta") else { return Vec::new() };
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => {
                        let Some(text) = delta.get("text").and_then(Value::as_str) else {
                            return Vec::new();
                        };
                        vec![StreamEvent::Text(text.to_string())]
                    }
                    Some("input_json_delta") => {
                        if let Some(fragment) = delta.get("partial_json").and_then(Value::as_str) {
                            if let Some(pending) = self.pending_tools.get_mut(&index) {
                                pending.arguments.push_str(fragment);
                            }
                        }
                        Vec::new()
                    }
                    _ => Vec::new(),
                }
            }
            "content_block_stop" => {
                let index = json.get("index").and_then(Value::as_u64).unwrap_or(0);
                match self.pending_tools.remove(&index) {
                    Some(pending) => {
                        let input = if pending.arguments.trim().is_empty() {
                            Value::Object(Default::default())
                        } else {
                            serde_json::from_str(&pending.arguments).unwrap_or(Value::Object(Default::default()))
                        };
                        vec![StreamEvent::ToolUse { id: pending.id, name: pending.name, input }]
                    }
                    None => Vec::new(),
                }
            }
            "message_delta" => {
                let Some(usage) = json.get("usage") else { return Vec::new() };
                let input_tokens = usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
                let output_tokens = usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
                vec![StreamEvent::Usage { input_tokens, output_tokens }]
            }
            "message_stop" => vec![StreamEvent::Done],
            "error" => {
                let message = json
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown upstream error");
                vec![StreamEvent::Error(message.to_string())]
            }
            _ => Vec::new(),
        }
    }

    fn parse_openai_event(&mut self, raw: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for line in raw.lines() {
            let Some(payload) = line.strip_prefix("data:") else { continue };
            let payload = payload.trim();
            if payload == "[DONE]" {
                events.push(StreamEvent::Done);
                continue;
            }
            let Ok(json) = serde_json::from_str::<Value>(payload) else { continue };
            let choice = json.get("choices").and_then(|c| c.get(0));

            if let Some(text) = choice
                .and_then(|c| c.get("delta"))
                .and_then(|d| d.get("content"))
                .and_then(Value::as_str)
            {
                events.push(StreamEvent::Text(text.to_string()));
            }

            if let Some(tool_calls) = choice.and_then(|c| c.get("delta")).and_then(|d| d.get("tool_calls")).and_then(Value::as_array) {
                for call in tool_calls {
                    let index = call.get("index").and_then(Value::as_u64).unwrap_or(0);
                    let entry = self.pending_tools.entry(index).or_default();
                    if let Some(id) = call.get("id").and_then(Value::as_str) {
                        entry.id = id.to_string();
                    }
                    if let Some(function) = call.get("function") {
                        if let Some(name) = function.get("name").and_then(Value::as_str) {
                            entry.name.push_str(name);
                        }
                        if let Some(args) = function.get("arguments").and_then(Value::as_str) {
                            entry.arguments.push_str(args);
                        }
                    }
                }
            }

            if choice.and_then(|c| c.get("finish_reason")).and_then(Value::as_str) == Some("tool_calls") {
                let mut indices: Vec<u64> = self.pending_tools.keys().copied().collect();
                indices.sort_unstable();
                for index in indices {
                    if let Some(pending) = self.pending_tools.remove(&index) {
                        let input = if pending.arguments.trim().is_empty() {
                            Value::Object(Default::default())
                        } else {
                            serde_json::from_str(&pending.arguments).unwrap_or(Value::Object(Default::default()))
                        };
                        events.push(StreamEvent::ToolUse { id: pending.id, name: pending.name, input });
                    }
                }
            }

            if let Some(usage) = json.get("usage") {
                let input_tokens = usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
                let output_tokens = usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0);
                events.push(StreamEvent::Usage { input_tokens, output_tokens });
            }
        }
        events
    }
}

fn find_event_terminator(buf: &str) -> Option<(usize, usize)> {
    if let Some(pos) = buf.find("\r\n\r\n") {
        return Some((pos, 4));
    }
    buf.find("\n\n").map(|pos| (pos, 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_text_delta() {
        let mut buf = SseBuffer::new();
        let chunk = "event: content_block_delta\ndata: {\"delta\":{\"type\":\"text_delta\",\"text\":\"pong\"}}\n\n";
        let events = buf.push_chunk(chunk, Dialect::Anthropic);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Text(t) if t == "pong"));
    }

    #[test]
    fn anthropic_message_stop() {
        let mut buf = SseBuffer::new();
        let events = buf.push_chunk("event: message_stop\ndata: {}\n\n", Dialect::Anthropic);
        assert!(matches!(events[0], StreamEvent::Done));
    }

    #[test]
    fn anthropic_error_event() {
        let mut buf = SseBuffer::new();
        let chunk = "event: error\ndata: {\"error\":{\"message\":\"boom\"}}\n\n";
        let events = buf.push_chunk(chunk, Dialect::Anthropic);
        assert!(matches!(&events[0], StreamEvent::Error(m) if m == "boom"));
    }

    #[test]
    fn anthropic_tool_use_accumulates_across_deltas() {
        let mut buf = SseBuffer::new();
        let start = "event: content_block_start\ndata: {\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_1\",\"name\":\"echo\"}}\n\n";
        assert!(buf.push_chunk(start, Dialect::Anthropic).is_empty());

        let delta1 = "event: content_block_delta\ndata: {\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"text\\\":\"}}\n\n";
        assert!(buf.push_chunk(delta1, Dialect::Anthropic).is_empty());

        let delta2 = "event: content_block_delta\ndata: {\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"\\\"hi\\\"}\"}}\n\n";
        assert!(buf.push_chunk(delta2, Dialect::Anthropic).is_empty());

        let stop = "event: content_block_stop\ndata: {\"index\":0}\n\n";
        let events = buf.push_chunk(stop, Dialect::Anthropic);
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::ToolUse { id, name, input } => {
                assert_eq!(id, "toolu_1");
                assert_eq!(name, "echo");
                assert_eq!(input["text"], "hi");
            }
            other => panic!("expected a tool-use event, got {other:?}"),
        }
    }

    #[test]
    fn openai_done_marker() {
        let mut buf = SseBuffer::new();
        let events = buf.push_chunk("data: [DONE]\n\n", Dialect::OpenAi);
        assert!(matches!(events[0], StreamEvent::Done));
    }

    #[test]
    fn openai_delta_content() {
        let mut buf = SseBuffer::new();
        let chunk = "data: {\"choices\":[{\"delta\":{\"content\":\"pong\"}}]}\n\n";
        let events = buf.push_chunk(chunk, Dialect::OpenAi);
        assert!(matches!(&events[0], StreamEvent::Text(t) if t == "pong"));
    }

    #[test]
    fn openai_tool_call_flushes_on_finish_reason() {
        let mut buf = SseBuffer::new();
        let delta = "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"echo\",\"arguments\":\"{\\\"text\\\":\\\"hi\\\"}\"}}]}}]}\n\n";
        assert!(buf.push_chunk(delta, Dialect::OpenAi).is_empty());

        let finish = "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n";
        let events = buf.push_chunk(finish, Dialect::OpenAi);
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::ToolUse { id, name, input } => {
                assert_eq!(id, "call_1");
                assert_eq!(name, "echo");
                assert_eq!(input["text"], "hi");
            }
            other => panic!("expected a tool-use event, got {other:?}"),
        }
    }

    #[test]
    fn partial_event_waits_for_terminator() {
        let mut buf = SseBuffer::new();
        let events = buf.push_chunk("event: content_block_delta\ndata: {\"delta\"", Dialect::Anthropic);
        assert!(events.is_empty());
        let events = buf.push_chunk(":{\"type\":\"text_delta\",\"text\":\"ok\"}}\n\n", Dialect::Anthropic);
        assert_eq!(events.len(), 1);
    }
}
