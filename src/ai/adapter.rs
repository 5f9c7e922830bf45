//! Provider adapter trait and a small priority-ordered registry.
//!
//! Generalizes the gateway's provider routing rule (§4.8: model prefix
//! picks the provider, falling back to a configured default) the way a
//! hardcoded if/else chain never would — new adapters register
//! themselves with a priority and the model prefixes they claim.

use async_trait::async_trait;
use std::sync::Arc;

use super::stream::StreamContext;
use super::types::{ChatMessage, NativeToolSpec};
use crate::error::GatewayError;

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct AdapterCapabilities {
    pub supports_tools: bool,
    pub supports_streaming: bool,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub system: Option<String>,
    pub tools: Vec<NativeToolSpec>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

#[async_trait]
pub trait AIProviderAdapter: Send + Sync {
    fn name(&self) -> &'static str;
    fn supported_model_prefixes(&self) -> &'static [&'static str];
    fn priority(&self) -> i32;
    fn capabilities(&self) -> AdapterCapabilities;

    fn supports_model(&self, model: &str) -> bool {
        self.supported_model_prefixes().iter().any(|p| model.starts_with(p))
    }

    async fn stream_chat(&self, request: ChatRequest, ctx: &mut StreamContext) -> Result<(), GatewayError>;
}

pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn AIProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self { adapters: Vec::new() }
    }

    pub fn register(&mut self, adapter: Arc<dyn AIProviderAdapter>) {
        self.adapters.push(adapter);
        self.adapters.sort_by_key(|a| std::cmp::Reverse(a.priority()));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AIProviderAdapter>> {
        self.adapters.iter().find(|a| a.name() == name).cloned()
    }

    pub fn available(&self) -> &[Arc<dyn AIProviderAdapter>] {
        &self.adapters
    }

    /// claude* forces anthropic, gpt* forces openai, else the configured
    /// default provider, else the highest-priority adapter that claims
    /// the model.
    pub fn select(&self, model: &str, default_provider: &str) -> Option<Arc<dyn AIProviderAdapter>> {
        if model.starts_with("claude") {
            if let Some(a) = self.get("anthropic") {
                return Some(a);
            }
        }
        if model.starts_with("gpt") {
            if let Some(a) = self.get("openai") {
                return Some(a);
            }
        }
        if let Some(a) = self.get(default_provider) {
            return Some(a);
        }
        self.adapters.iter().find(|a| a.supports_model(model)).cloned()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubAdapter {
        adapter_name: &'static str,
        prefixes: &'static [&'static str],
        adapter_priority: i32,
    }

    #[async_trait]
    impl AIProviderAdapter for StubAdapter {
        fn name(&self) -> &'static str {
            self.adapter_name
        }
        fn supported_model_prefixes(&self) -> &'static [&'static str] {
            self.prefixes
        }
        fn priority(&self) -> i32 {
            self.adapter_priority
        }
        fn capabilities(&self) -> AdapterCapabilities {
            AdapterCapabilities { supports_tools: false, supports_streaming: true }
        }
        async fn stream_chat(&self, _request: ChatRequest, _ctx: &mut StreamContext) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    #[test]
    fn claude_prefix_forces_anthropic() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(StubAdapter { adapter_name: "anthropic", prefixes: &["claude"], adapter_priority: 100 }));
        registry.register(Arc::new(StubAdapter { adapter_name: "openai", prefixes: &["gpt"], adapter_priority: 90 }));

        let selected = registry.select("claude-3-5-sonnet", "openai").unwrap();
        assert_eq!(selected.name(), "anthropic");
    }

    #[test]
    fn unrecognized_prefix_falls_back_to_default() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(StubAdapter { adapter_name: "anthropic", prefixes: &["claude"], adapter_priority: 100 }));
        registry.register(Arc::new(StubAdapter { adapter_name: "openai", prefixes: &["gpt"], adapter_priority: 90 }));

        let selected = registry.select("llama-3", "openai").unwrap();
        assert_eq!(selected.name(), "openai");
    }
}
