//! AI provider integration: the adapter trait, two concrete providers,
//! and the SSE/stream plumbing they share.

pub mod adapter;
pub mod anthropic;
pub mod openai;
pub mod sse;
pub mod stream;
pub mod types;

pub use adapter::{AIProviderAdapter, AdapterCapabilities, AdapterConfig, AdapterRegistry, ChatRequest};
pub use anthropic::AnthropicAdapter;
pub use openai::OpenAiAdapter;
pub use sse::Dialect;
pub use stream::StreamContext;
pub use types::{ChatMessage, FinishReason, HealthStatus, NativeToolSpec, ToolCall, ToolResult, UsageMetrics};
