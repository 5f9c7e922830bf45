//! Crate-wide error taxonomy.
//!
//! Mirrors the gateway's error design: config, auth, protocol, upstream,
//! I/O, and JSON-parse errors. Each variant knows its own HTTP status and
//! can render either of the two wire envelopes the handlers use.

use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    Protocol(String),

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Parse(String),
}

impl GatewayError {
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Config(_) => 500,
            GatewayError::Auth(_) => 401,
            GatewayError::Protocol(_) => 400,
            GatewayError::Upstream(_) => 502,
            GatewayError::Io(_) => 500,
            GatewayError::Parse(_) => 400,
        }
    }

    /// `{"error": "..."}`, used by the webhook handler.
    pub fn as_webhook_json(&self) -> Value {
        json!({ "error": self.to_string() })
    }

    /// `{"error": {"message": ..., "type": ...}}`, used by the
    /// OpenAI-compatible handler.
    pub fn as_openai_json(&self) -> Value {
        let error_type = match self {
            GatewayError::Auth(_) => "invalid_request_error",
            _ => "server_error",
        };
        json!({ "error": { "message": self.to_string(), "type": error_type } })
    }
}
