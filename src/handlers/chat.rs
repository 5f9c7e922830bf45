//! Shared plumbing between the webhook and OpenAI-compatible handlers:
//! picking a default model per provider and the adapter's SSE dialect.

use crate::ai::Dialect;

pub fn default_model_for(provider: &str) -> &'static str {
    match provider {
        "openai" => "gpt-4o-mini",
        _ => "claude-3-5-sonnet-20241022",
    }
}

pub fn dialect_for(provider: &str) -> Dialect {
    match provider {
        "openai" => Dialect::OpenAi,
        _ => Dialect::Anthropic,
    }
}
