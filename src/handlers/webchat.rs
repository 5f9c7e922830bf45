//! `POST /hooks/webchat` — one-shot chat. Body `{"message": str,
//! "session_id"?: str}`; dispatches the provider call on the Tokio
//! runtime and reports the result back to the reactor thread.

use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

use super::chat::{default_model_for, dialect_for};
use crate::ai::{ChatMessage, ChatRequest, StreamContext};
use crate::error::GatewayError;
use crate::http::response::ResponseBuilder;
use crate::reactor::ReactorEvent;
use crate::router::{HandlerOutcome, RequestContext};
use crate::session::Role;
use crate::state::AppState;

pub fn handle(ctx: &RequestContext) -> HandlerOutcome {
    let body: serde_json::Value = match serde_json::from_str(ctx.request.body_str()) {
        Ok(v) => v,
        Err(_) => return missing_message(ctx),
    };

    let message = body
        .get("message")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string);

    let Some(message) = message else {
        return missing_message(ctx);
    };

    let session_id = body.get("session_id").and_then(serde_json::Value::as_str).map(String::from);

    let state = ctx.state.clone();
    let token = ctx.token;
    let close_after = !ctx.request.keep_alive();

    let rt = state.rt.clone();
    rt.spawn(async move {
        let bytes = run(&state, message, session_id).await;
        state.notify(ReactorEvent::Respond { token, bytes, close_after });
    });

    HandlerOutcome::Deferred
}

async fn run(state: &Arc<AppState>, message: String, session_id: Option<String>) -> Vec<u8> {
    let provider = state.config.default_provider.clone();
    let adapter = match state.adapters.get(&provider).or_else(|| state.adapters.available().first().cloned()) {
        Some(a) => a,
        None => return webhook_error(&GatewayError::Config("no AI provider configured".into())),
    };

    if let Some(sid) = &session_id {
        let _ = state.sessions.append_message(sid.clone(), Role::User, message.clone()).await;
    }

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
        return webhook_error(&err);
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
            return webhook_error(&err);
        }
        text = collected2.lock().clone();
    }

    if let Some(sid) = &session_id {
        let _ = state.sessions.append_message(sid.clone(), Role::Assistant, text.clone()).await;
    }
    let mut payload = json!({ "response": text, "model": model });
    if let Some(sid) = session_id {
        payload["session_id"] = json!(sid);
    }
    ResponseBuilder::new(200).cors().json(&payload).into_bytes()
}

/// The webhook contract collapses every upstream failure to a flat 502,
/// unlike the OpenAI-compatible handler which preserves the error's own
/// status code.
fn webhook_error(err: &GatewayError) -> Vec<u8> {
    ResponseBuilder::new(502).cors().json(&err.as_webhook_json()).into_bytes()
}

fn missing_message(ctx: &RequestContext) -> HandlerOutcome {
    let bytes = ResponseBuilder::new(400)
        .cors()
        .json(&json!({"error": "Missing 'message' field"}))
        .into_bytes();
    HandlerOutcome::Immediate(bytes, !ctx.request.keep_alive())
}
