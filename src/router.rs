//! Route table and dispatch: linear scan, first-registered-wins,
//! exact-match or prefix-wildcard (`*` suffix) patterns.

use mio::Token;
use serde_json::json;
use std::sync::Arc;

use crate::http::request::{Method, ParsedRequest};
use crate::http::response::ResponseBuilder;
use crate::state::AppState;

pub enum HandlerOutcome {
    /// Response bytes are ready now; `close_after` says whether the
    /// connection should be closed once they're flushed.
    Immediate(Vec<u8>, bool),
    /// The handler has dispatched async work (upstream call, session
    /// store access) and will deliver a `ReactorEvent::Respond` later.
    Deferred,
}

pub struct RequestContext<'a> {
    pub request: &'a ParsedRequest,
    pub state: Arc<AppState>,
    pub token: Token,
}

pub type Handler = fn(&RequestContext) -> HandlerOutcome;

#[derive(Clone, Copy)]
struct Route {
    method: Method,
    pattern: &'static str,
    handler: Handler,
}

impl Route {
    fn matches(&self, method: Method, path: &str) -> bool {
        if self.method != method {
            return false;
        }
        match self.pattern.strip_suffix('*') {
            Some(prefix) => path.starts_with(prefix),
            None => path == self.pattern,
        }
    }
}

#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    pub fn register(&mut self, method: Method, pattern: &'static str, handler: Handler) {
        self.routes.push(Route { method, pattern, handler });
    }

    pub fn dispatch(&self, ctx: &RequestContext) -> HandlerOutcome {
        if ctx.request.method == Method::Options {
            return HandlerOutcome::Immediate(cors_preflight(), !ctx.request.keep_alive());
        }

        if needs_auth(&ctx.request.path) {
            if let Some(token) = &ctx.state.config.bearer_token {
                let expected = format!("Bearer {token}");
                let header_ok = ctx
                    .request
                    .headers
                    .get("authorization")
                    .map(|v| v == expected)
                    .unwrap_or(false);
                if !header_ok {
                    return HandlerOutcome::Immediate(unauthorized(), !ctx.request.keep_alive());
                }
            }
        }

        for route in &self.routes {
            if route.matches(ctx.request.method, &ctx.request.path) {
                return (route.handler)(ctx);
            }
        }

        HandlerOutcome::Immediate(not_found(), !ctx.request.keep_alive())
    }
}

fn needs_auth(path: &str) -> bool {
    path != "/health"
}

fn cors_preflight() -> Vec<u8> {
    ResponseBuilder::new(204)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
        .into_bytes()
}

fn not_found() -> Vec<u8> {
    ResponseBuilder::new(404).cors().json(&json!({"error": "Not Found"})).into_bytes()
}

fn unauthorized() -> Vec<u8> {
    ResponseBuilder::new(401)
        .cors()
        .json(&json!({"error": "Unauthorized"}))
        .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_handler(_ctx: &RequestContext) -> HandlerOutcome {
        HandlerOutcome::Immediate(b"ok".to_vec(), false)
    }

    #[test]
    fn first_registered_route_wins() {
        let mut router = Router::new();
        router.register(Method::Get, "/v1/*", ok_handler);
        router.register(Method::Get, "/v1/chat/completions", |_| {
            HandlerOutcome::Immediate(b"second".to_vec(), false)
        });
        assert_eq!(router.routes[0].pattern, "/v1/*");
    }

    #[test]
    fn wildcard_matches_prefix_only() {
        let route = Route { method: Method::Get, pattern: "/v1/*", handler: ok_handler };
        assert!(route.matches(Method::Get, "/v1/chat/completions"));
        assert!(!route.matches(Method::Get, "/v2/chat"));
    }
}
