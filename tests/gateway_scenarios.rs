//! End-to-end scenarios driven directly against the router and handlers,
//! without a live socket: a `RequestContext` is built by hand from a
//! parsed request and a real `AppState`, the same way the reactor
//! assembles one per connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::{Poll, Token, Waker};
use serde_json::Value;

use gatewayd::config::Config;
use gatewayd::handlers::build_router;
use gatewayd::http::codec::{self, ParseOutcome};
use gatewayd::http::request::ParsedRequest;
use gatewayd::reactor::{ReactorEvent, WAKE_TOKEN};
use gatewayd::router::{HandlerOutcome, RequestContext};
use gatewayd::session::SessionStore;
use gatewayd::state::AppState;
use gatewayd::tools::ToolRegistry;

static DB_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_config(default_provider: &str) -> Config {
    let n = DB_COUNTER.fetch_add(1, Ordering::Relaxed);
    Config {
        bind: "127.0.0.1".to_string(),
        port: 0,
        tls_cert_path: None,
        tls_key_path: None,
        bearer_token: None,
        default_provider: default_provider.to_string(),
        session_db_path: std::env::temp_dir().join(format!(
            "gatewayd-test-{}-{}-{n}.db",
            std::process::id(),
            default_provider
        )),
        daemon: false,
        verbose: false,
        anthropic_api_key: None,
        openai_api_key: None,
    }
}

fn build_state(config: Config) -> (Arc<AppState>, std::sync::mpsc::Receiver<ReactorEvent>, tokio::runtime::Runtime) {
    let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap();
    let sessions = SessionStore::open(&config.session_db_path).unwrap();
    let tools = ToolRegistry::new();
    let poll = Poll::new().unwrap();
    let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN).unwrap());
    let (events_tx, events_rx) = std::sync::mpsc::channel();
    let state = AppState::new(config, sessions, tools, rt.handle().clone(), events_tx, waker);
    (state, events_rx, rt)
}

fn parse_request(raw: &[u8]) -> ParsedRequest {
    match codec::parse(raw) {
        ParseOutcome::Complete { request, .. } => request,
        _ => panic!("expected a complete parse"),
    }
}

#[test]
fn health_probe_reports_ok_and_counts_itself() {
    let (state, _events_rx, _rt) = build_state(test_config("anthropic"));
    let router = build_router();

    let raw = b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n";
    let request = parse_request(raw);
    let ctx = RequestContext { request: &request, state: state.clone(), token: Token(2) };

    let outcome = router.dispatch(&ctx);
    let bytes = match outcome {
        HandlerOutcome::Immediate(bytes, _close) => bytes,
        HandlerOutcome::Deferred => panic!("health is never deferred"),
    };

    let text = String::from_utf8(bytes).unwrap();
    assert!(text.starts_with("HTTP/1.1 200"));
    let body_start = text.find("\r\n\r\n").unwrap() + 4;
    let body: Value = serde_json::from_str(&text[body_start..]).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["total_requests"], 1);
    assert!(body["uptime_seconds"].as_u64().unwrap() < 60);
}

#[test]
fn cors_preflight_on_chat_completions() {
    let (state, _events_rx, _rt) = build_state(test_config("anthropic"));
    let router = build_router();

    let raw = b"OPTIONS /v1/chat/completions HTTP/1.1\r\nHost: localhost\r\nOrigin: http://local\r\n\r\n";
    let request = parse_request(raw);
    let ctx = RequestContext { request: &request, state: state.clone(), token: Token(2) };

    let (bytes, _close) = match router.dispatch(&ctx) {
        HandlerOutcome::Immediate(bytes, close) => (bytes, close),
        HandlerOutcome::Deferred => panic!("preflight is never deferred"),
    };
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.starts_with("HTTP/1.1 204"));
    assert!(text.contains("Access-Control-Allow-Origin: *"));
    assert!(text.contains("Access-Control-Allow-Methods: GET, POST, OPTIONS"));
    assert!(text.ends_with("\r\n\r\n"), "preflight body must be empty");
}

#[test]
fn webhook_rejects_missing_message() {
    let (state, _events_rx, _rt) = build_state(test_config("anthropic"));
    let router = build_router();

    let raw = b"POST /hooks/webchat HTTP/1.1\r\nHost: localhost\r\nContent-Length: 2\r\n\r\n{}";
    let request = parse_request(raw);
    let ctx = RequestContext { request: &request, state: state.clone(), token: Token(2) };

    let bytes = match router.dispatch(&ctx) {
        HandlerOutcome::Immediate(bytes, _) => bytes,
        HandlerOutcome::Deferred => panic!("a missing field is rejected before any dispatch"),
    };
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.starts_with("HTTP/1.1 400"));
    let body_start = text.find("\r\n\r\n").unwrap() + 4;
    let body: Value = serde_json::from_str(&text[body_start..]).unwrap();
    assert_eq!(body["error"], "Missing 'message' field");
}

#[test]
fn chat_completions_without_a_key_reports_500_server_error() {
    let (state, events_rx, _rt) = build_state(test_config("anthropic"));
    let router = build_router();

    let raw = b"POST /v1/chat/completions HTTP/1.1\r\nHost: localhost\r\n\
Content-Length: 73\r\n\r\n\
{\"model\":\"claude-3-5-sonnet\",\"messages\":[{\"role\":\"user\",\"content\":\"hi\"}]}";
    let request = parse_request(raw);
    let token = Token(2);
    let ctx = RequestContext { request: &request, state: state.clone(), token };

    match router.dispatch(&ctx) {
        HandlerOutcome::Deferred => {}
        HandlerOutcome::Immediate(..) => panic!("a chat request always dispatches onto the runtime"),
    }

    let event = events_rx.recv_timeout(Duration::from_secs(5)).expect("handler never replied");
    let bytes = match event {
        ReactorEvent::Respond { token: t, bytes, .. } => {
            assert_eq!(t, token);
            bytes
        }
        ReactorEvent::WsSend { .. } => panic!("unexpected WS event from an HTTP handler"),
    };

    let text = String::from_utf8(bytes).unwrap();
    assert!(text.starts_with("HTTP/1.1 500"), "missing key must surface as 500, got: {text}");
    let body_start = text.find("\r\n\r\n").unwrap() + 4;
    let body: Value = serde_json::from_str(&text[body_start..]).unwrap();
    assert_eq!(body["error"]["message"], "No API key configured");
    assert_eq!(body["error"]["type"], "server_error");
}

#[test]
fn webhook_without_a_key_always_reports_502() {
    let (state, events_rx, _rt) = build_state(test_config("anthropic"));
    let router = build_router();

    let raw = b"POST /hooks/webchat HTTP/1.1\r\nHost: localhost\r\nContent-Length: 19\r\n\r\n{\"message\":\"hello\"}";
    let request = parse_request(raw);
    let token = Token(3);
    let ctx = RequestContext { request: &request, state: state.clone(), token };

    match router.dispatch(&ctx) {
        HandlerOutcome::Deferred => {}
        HandlerOutcome::Immediate(..) => panic!("the webhook always dispatches onto the runtime"),
    }

    let event = events_rx.recv_timeout(Duration::from_secs(5)).expect("handler never replied");
    let bytes = match event {
        ReactorEvent::Respond { bytes, .. } => bytes,
        ReactorEvent::WsSend { .. } => panic!("unexpected WS event from an HTTP handler"),
    };

    let text = String::from_utf8(bytes).unwrap();
    assert!(text.starts_with("HTTP/1.1 502"), "webhook failures are always flattened to 502, got: {text}");
    let body_start = text.find("\r\n\r\n").unwrap() + 4;
    let body: Value = serde_json::from_str(&text[body_start..]).unwrap();
    assert!(body["error"].as_str().unwrap().contains("No API key configured"));
}

#[test]
fn unauthorized_request_is_rejected_before_dispatch() {
    let mut config = test_config("anthropic");
    config.bearer_token = Some("s3cret".to_string());
    let (state, _events_rx, _rt) = build_state(config);
    let router = build_router();

    let raw = b"POST /v1/chat/completions HTTP/1.1\r\nHost: localhost\r\nContent-Length: 2\r\n\r\n{}";
    let request = parse_request(raw);
    let ctx = RequestContext { request: &request, state: state.clone(), token: Token(2) };

    let bytes = match router.dispatch(&ctx) {
        HandlerOutcome::Immediate(bytes, _) => bytes,
        HandlerOutcome::Deferred => panic!("missing auth must short-circuit before the handler runs"),
    };
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.starts_with("HTTP/1.1 401"));
}

#[test]
fn unknown_route_returns_404() {
    let (state, _events_rx, _rt) = build_state(test_config("anthropic"));
    let router = build_router();

    let raw = b"GET /nope HTTP/1.1\r\nHost: localhost\r\n\r\n";
    let request = parse_request(raw);
    let ctx = RequestContext { request: &request, state: state.clone(), token: Token(2) };

    let bytes = match router.dispatch(&ctx) {
        HandlerOutcome::Immediate(bytes, _) => bytes,
        HandlerOutcome::Deferred => panic!("a 404 is immediate"),
    };
    assert!(String::from_utf8(bytes).unwrap().starts_with("HTTP/1.1 404"));
}
