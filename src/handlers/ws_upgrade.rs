//! `GET /ws` — RFC 6455 handshake detection/response, and the frame
//! dispatch once a connection has switched into `ConnState::WebSocket`.

use mio::Token;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

use super::chat::{default_model_for, dialect_for};
use crate::ai::{ChatMessage, ChatRequest, StreamContext};
use crate::http::request::{Method, ParsedRequest};
use crate::http::response::ResponseBuilder;
use crate::reactor::ReactorEvent;
use crate::state::AppState;
use crate::ws::{accept_key, write_text_frame, Frame, Opcode};

pub fn is_upgrade_request(request: &ParsedRequest) -> bool {
    if request.method != Method::Get || request.path != "/ws" {
        return false;
    }
    let upgrade_ok = request.headers.get("upgrade").map(|v| v.eq_ignore_ascii_case("websocket")).unwrap_or(false);
    let connection_ok = request
        .headers
        .get("connection")
        .map(|v| v.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false);
    upgrade_ok && connection_ok && request.headers.get("sec-websocket-key").is_some()
}

pub fn upgrade_response(request: &ParsedRequest) -> Option<Vec<u8>> {
    let key = request.headers.get("sec-websocket-key")?;
    let accept = accept_key(key);
    Some(
        ResponseBuilder::new(101)
            .header("Upgrade", "websocket")
            .header("Connection", "Upgrade")
            .header("Sec-WebSocket-Accept", accept)
            .into_bytes(),
    )
}

/// Handles one decoded WS frame. Returns bytes to write immediately
/// (an echo), or `None` when the frame dispatched async work that will
/// deliver its own `ReactorEvent::WsSend` later.
pub fn handle_ws_frame(state: &Arc<AppState>, token: Token, frame: &Frame) -> Option<Vec<u8>> {
    if frame.opcode != Opcode::Text {
        return None;
    }

    let text = String::from_utf8_lossy(&frame.payload).into_owned();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string));

    match message {
        Some(message) => {
            let state = state.clone();
            let rt = state.rt.clone();
            rt.spawn(async move {
                let bytes = run_ws_chat(&state, message).await;
                state.notify(ReactorEvent::WsSend { token, bytes });
            });
            None
        }
        None => Some(write_text_frame(text.as_bytes())),
    }
}

async fn run_ws_chat(state: &Arc<AppState>, message: String) -> Vec<u8> {
    let provider = state.config.default_provider.clone();
    let Some(adapter) = state.adapters.get(&provider).or_else(|| state.adapters.available().first().cloned()) else {
        return write_text_frame(br#"{"error":"no AI provider configured"}"#);
    };

    let model = default_model_for(adapter.name()).to_string();
    let dialect = dialect_for(adapter.name());
    let mut messages = vec![ChatMessage { role: "user".into(), content: message }];

    let request = ChatRequest {
        model: model.clone(),
        messages: messages.clone(),
        system: None,
        tools: state.tools.native_specs(),
        max_tokens: 1024,
        temperature: None,
    };

    let collected = Arc::new(Mutex::new(String::new()));
    let collected_for_cb = collected.clone();
    let mut stream_ctx =
        StreamContext::new(dialect).on_text(move |t| collected_for_cb.lock().push_str(t));

    if let Err(err) = adapter.stream_chat(request, &mut stream_ctx).await {
        let payload = err.as_webhook_json();
        return write_text_frame(payload.to_string().as_bytes());
    }

    let mut text = collected.lock().clone();

    let tool_calls = stream_ctx.tool_calls().to_vec();
    if !tool_calls.is_empty() {
        messages.push(ChatMessage { role: "assistant".into(), content: text.clone() });
        for call in &tool_calls {
            let result = state.tools.execute(&call.name, &call.input);
            messages.push(ChatMessage {
                role: "user".into(),
                content: format!("Tool '{}' result: {}", call.name, result.output),
            });
        }

        let followup = ChatRequest {
            model: model.clone(),
            messages,
            system: None,
            tools: state.tools.native_specs(),
            max_tokens: 1024,
            temperature: None,
        };

        let collected2 = Arc::new(Mutex::new(String::new()));
        let collected2_for_cb = collected2.clone();
        let mut followup_ctx =
            StreamContext::new(dialect).on_text(move |t| collected2_for_cb.lock().push_str(t));

        if let Err(err) = adapter.stream_chat(followup, &mut followup_ctx).await {
            let payload = err.as_webhook_json();
            return write_text_frame(payload.to_string().as_bytes());
        }
        text = collected2.lock().clone();
    }

    let payload = serde_json::json!({ "response": text, "model": model });
    write_text_frame(payload.to_string().as_bytes())
}
