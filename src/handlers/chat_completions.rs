//! `POST /v1/chat/completions` — OpenAI-compatible chat. Provider
//! selection follows the model prefix (`claude*` → Anthropic, `gpt*` →
//! OpenAI, else the configured default); the response is the canonical
//! OpenAI chat-completion envelope.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

use super::chat::{default_model_for, dialect_for};
use crate::ai::{ChatMessage, ChatRequest, FinishReason, StreamContext};
use crate::error::GatewayError;
use crate::http::response::ResponseBuilder;
use crate::reactor::ReactorEvent;
use crate::router::{HandlerOutcome, RequestContext};
use crate::state::AppState;

pub fn handle(ctx: &RequestContext) -> HandlerOutcome {
    let body: Value = match serde_json::from_str(ctx.request.body_str()) {
        Ok(v) => v,
        Err(_) => return error_now(ctx, 400, "invalid JSON body"),
    };

    let Some(messages) = body.get("messages").and_then(Value::as_array) else {
        return error_now(ctx, 400, "'messages' must be an array");
    };

    let mut system = None;
    let mut last_user = None;
    for m in messages {
        let role = m.get("role").and_then(Value::as_str).unwrap_or("");
        let content = m.get("content").and_then(Value::as_str).unwrap_or("").to_string();
        if role == "system" && system.is_none() {
            system = Some(content.clone());
        }
        if role == "user" {
            last_user = Some(content);
        }
    }

    let Some(user_message) = last_user else {
        return error_now(ctx, 400, "no user message found in 'messages'");
    };

    let requested_model = body.get("model").and_then(Value::as_str).map(String::from);
    let max_tokens = body.get("max_tokens").and_then(Value::as_u64).map(|n| n as u32).unwrap_or(1024);
    let temperature = body.get("temperature").and_then(Value::as_f64).map(|t| t as f32);

    let state = ctx.state.clone();
    let token = ctx.token;
    let close_after = !ctx.request.keep_alive();

    let rt = state.rt.clone();
    rt.spawn(async move {
        let bytes = run(&state, requested_model, user_message, system, max_tokens, temperature).await;
        state.notify(ReactorEvent::Respond { token, bytes, close_after });
    });

    HandlerOutcome::Deferred
}

#[allow(clippy::too_many_arguments)]
async fn run(
    state: &Arc<AppState>,
    requested_model: Option<String>,
    user_message: String,
    system: Option<String>,
    max_tokens: u32,
    temperature: Option<f32>,
) -> Vec<u8> {
    let model = requested_model.unwrap_or_else(|| default_model_for(&state.config.default_provider).to_string());

    let Some(adapter) = state.adapters.select(&model, &state.config.default_provider) else {
        return openai_error(&GatewayError::Config("no AI provider configured".into()));
    };

    let mut messages = vec![ChatMessage { role: "user".into(), content: user_message }];
    let dialect = dialect_for(adapter.name());

    let request = ChatRequest {
        model: model.clone(),
        messages: messages.clone(),
        system: system.clone(),
        tools: state.tools.native_specs(),
        max_tokens,
        temperature,
    };

    let collected = Arc::new(Mutex::new(String::new()));
    let collected_for_cb = collected.clone();
    let mut stream_ctx =
        StreamContext::new(dialect).on_text(move |t| collected_for_cb.lock().push_str(t));

    if let Err(err) = adapter.stream_chat(request, &mut stream_ctx).await {
        return openai_error(&err);
    }

    let mut text = collected.lock().clone();
    let mut usage = stream_ctx.usage();

    // A tool-use signal short-circuits the turn: run the requested tools
    // and feed their output back for one more round before replying.
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
            messages: messages.clone(),
            system,
            tools: state.tools.native_specs(),
            max_tokens,
            temperature,
        };

        let collected2 = Arc::new(Mutex::new(String::new()));
        let collected2_for_cb = collected2.clone();
        let mut followup_ctx =
            StreamContext::new(dialect).on_text(move |t| collected2_for_cb.lock().push_str(t));

        if let Err(err) = adapter.stream_chat(followup, &mut followup_ctx).await {
            return openai_error(&err);
        }
        text = collected2.lock().clone();
        usage = followup_ctx.usage();
    }

    let payload = json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": text },
            "finish_reason": FinishReason::Stop.to_string(),
        }],
        "usage": {
            "prompt_tokens": usage.input_tokens,
            "completion_tokens": usage.output_tokens,
            "total_tokens": usage.total_tokens,
        },
    });
    ResponseBuilder::new(200).cors().json(&payload).into_bytes()
}

fn openai_error(err: &GatewayError) -> Vec<u8> {
    ResponseBuilder::new(err.status_code()).cors().json(&err.as_openai_json()).into_bytes()
}

fn error_now(ctx: &RequestContext, status: u16, message: &str) -> HandlerOutcome {
    let bytes = ResponseBuilder::new(status)
        .cors()
        .json(&json!({"error": {"message": message, "type": "invalid_request_error"}}))
        .into_bytes();
    HandlerOutcome::Immediate(bytes, !ctx.request.keep_alive())
}
