//! gatewayd — a local-machine HTTP/WebSocket gateway in front of the
//! Anthropic and OpenAI-compatible chat APIs.
//!
//! The reactor (`reactor`) is a single-threaded, edge-triggered event
//! loop over raw sockets; it never blocks. Anything that can block —
//! upstream HTTPS calls, SQLite access — runs on the Tokio runtime and
//! reports back over a channel paired with a `mio::Waker`.

pub mod ai;
pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod http;
pub mod reactor;
pub mod router;
pub mod session;
pub mod state;
pub mod systemd;
pub mod tls;
pub mod tools;
pub mod ws;
