//! OpenAI-compatible Chat Completions adapter.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use super::adapter::{AIProviderAdapter, AdapterCapabilities, AdapterConfig, ChatRequest};
use super::stream::StreamContext;
use crate::error::GatewayError;

const ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiAdapter {
    client: Client,
    config: AdapterConfig,
}

impl OpenAiAdapter {
    pub fn new(config: AdapterConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("reqwest client build");
        Self { client, config }
    }
}

#[async_trait]
impl AIProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn supported_model_prefixes(&self) -> &'static [&'static str] {
        &["gpt"]
    }

    fn priority(&self) -> i32 {
        90
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities { supports_tools: true, supports_streaming: true }
    }

    async fn stream_chat(&self, request: ChatRequest, ctx: &mut StreamContext) -> Result<(), GatewayError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| GatewayError::Config("No API key configured".into()))?;

        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.extend(request.messages.iter().map(|m| json!({"role": m.role, "content": m.content})));

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "stream": true,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(request
                .tools
                .iter()
                .map(|t| json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    },
                }))
                .collect::<Vec<_>>());
        }

        let response = self
            .client
            .post(ENDPOINT)
            .bearer_auth(api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(format!("AI API request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(GatewayError::Upstream("AI API request failed".into()));
        }

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| GatewayError::Upstream(format!("stream read failed: {e}")))?;
            let text = String::from_utf8_lossy(&chunk);
            if ctx.ingest_chunk(&text)? {
                break;
            }
        }
        Ok(())
    }
}
