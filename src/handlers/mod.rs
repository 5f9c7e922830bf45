//! HTTP handlers and the WebSocket upgrade/frame glue, wired into a
//! `Router` by `build_router`.

mod chat;
pub mod chat_completions;
pub mod health;
pub mod webchat;
pub mod ws_upgrade;

use crate::http::request::Method;
use crate::router::Router;

pub fn build_router() -> Router {
    let mut router = Router::new();
    router.register(Method::Get, "/health", health::handle);
    router.register(Method::Post, "/hooks/webchat", webchat::handle);
    router.register(Method::Post, "/v1/chat/completions", chat_completions::handle);
    router
}
