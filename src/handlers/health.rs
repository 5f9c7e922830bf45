//! `GET /health` — no auth required, answered immediately on the
//! reactor thread.

use serde_json::json;

use crate::http::response::ResponseBuilder;
use crate::router::{HandlerOutcome, RequestContext};
use crate::state::VERSION;

pub fn handle(ctx: &RequestContext) -> HandlerOutcome {
    let body = json!({
        "status": "ok",
        "version": VERSION,
        "uptime_seconds": ctx.state.uptime_seconds(),
        "total_requests": ctx.state.total_requests(),
        "active_connections": ctx.state.active_connections(),
    });
    let bytes = ResponseBuilder::new(200).cors().json(&body).into_bytes();
    HandlerOutcome::Immediate(bytes, !ctx.request.keep_alive())
}
