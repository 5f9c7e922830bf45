//! Per-request streaming context: dialect, optional text/done/error
//! callbacks, and the running token counters accumulated as SSE events
//! arrive.

use super::sse::{Dialect, SseBuffer, StreamEvent};
use super::types::{ToolCall, UsageMetrics};
use crate::error::GatewayError;

pub struct StreamContext {
    dialect: Dialect,
    buffer: SseBuffer,
    input_tokens: u64,
    output_tokens: u64,
    tool_calls: Vec<ToolCall>,
    on_text: Option<Box<dyn FnMut(&str) + Send>>,
    on_done: Option<Box<dyn FnMut(UsageMetrics) + Send>>,
    on_error: Option<Box<dyn FnMut(&str) + Send>>,
}

impl StreamContext {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            buffer: SseBuffer::new(),
            input_tokens: 0,
            output_tokens: 0,
            tool_calls: Vec::new(),
            on_text: None,
            on_done: None,
            on_error: None,
        }
    }

    pub fn on_text(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_text = Some(Box::new(f));
        self
    }

    pub fn on_done(mut self, f: impl FnMut(UsageMetrics) + Send + 'static) -> Self {
        self.on_done = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Tool-use calls the upstream requested during this turn, in the
    /// order the SSE stream produced them.
    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    /// Feeds a raw chunk of the upstream response body through the SSE
    /// buffer. Returns `Ok(true)` once the stream signals completion.
    pub fn ingest_chunk(&mut self, chunk: &str) -> Result<bool, GatewayError> {
        let events = self.buffer.push_chunk(chunk, self.dialect);
        let mut done = false;
        for event in events {
            match event {
                StreamEvent::Text(text) => {
                    if let Some(cb) = &mut self.on_text {
                        cb(&text);
                    }
                }
                StreamEvent::ToolUse { id, name, input } => {
                    self.tool_calls.push(ToolCall { id, name, input });
                }
                StreamEvent::Usage { input_tokens, output_tokens } => {
                    self.input_tokens = input_tokens;
                    self.output_tokens = output_tokens;
                }
                StreamEvent::Done => {
                    done = true;
                    let usage = self.usage();
                    if let Some(cb) = &mut self.on_done {
                        cb(usage);
                    }
                }
                StreamEvent::Error(message) => {
                    if let Some(cb) = &mut self.on_error {
                        cb(&message);
                    }
                    return Err(GatewayError::Upstream(message));
                }
            }
        }
        Ok(done)
    }

    pub fn usage(&self) -> UsageMetrics {
        UsageMetrics {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            total_tokens: self.input_tokens + self.output_tokens,
            estimated_cost: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn text_callback_fires_per_delta() {
        let collected = Arc::new(Mutex::new(String::new()));
        let collected_clone = collected.clone();
        let mut ctx = StreamContext::new(Dialect::Anthropic).on_text(move |t| {
            collected_clone.lock().push_str(t);
        });

        ctx.ingest_chunk("event: content_block_delta\ndata: {\"delta\":{\"type\":\"text_delta\",\"text\":\"po\"}}\n\n").unwrap();
        ctx.ingest_chunk("event: content_block_delta\ndata: {\"delta\":{\"type\":\"text_delta\",\"text\":\"ng\"}}\n\n").unwrap();

        assert_eq!(*collected.lock(), "pong");
    }

    #[test]
    fn done_callback_carries_accumulated_usage() {
        let usage = Arc::new(Mutex::new(None));
        let usage_clone = usage.clone();
        let mut ctx = StreamContext::new(Dialect::Anthropic).on_done(move |u| {
            *usage_clone.lock() = Some(u);
        });

        ctx.ingest_chunk("event: message_delta\ndata: {\"usage\":{\"input_tokens\":3,\"output_tokens\":1}}\n\n").unwrap();
        let done = ctx.ingest_chunk("event: message_stop\ndata: {}\n\n").unwrap();

        assert!(done);
        let captured = usage.lock().unwrap();
        assert_eq!(captured.input_tokens, 3);
        assert_eq!(captured.output_tokens, 1);
    }

    #[test]
    fn error_event_short_circuits() {
        let mut ctx = StreamContext::new(Dialect::Anthropic);
        let result = ctx.ingest_chunk("event: error\ndata: {\"error\":{\"message\":\"boom\"}}\n\n");
        assert!(result.is_err());
    }

    #[test]
    fn tool_use_event_is_collected() {
        let mut ctx = StreamContext::new(Dialect::Anthropic);
        ctx.ingest_chunk("event: content_block_start\ndata: {\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_1\",\"name\":\"echo\"}}\n\n").unwrap();
        ctx.ingest_chunk("event: content_block_stop\ndata: {\"index\":0}\n\n").unwrap();

        assert_eq!(ctx.tool_calls().len(), 1);
        assert_eq!(ctx.tool_calls()[0].name, "echo");
    }
}
