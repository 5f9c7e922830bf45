//! Per-socket state: buffers, lifecycle, and the WS session identifier
//! once upgraded.

use mio::net::TcpStream;
use std::time::Instant;

use crate::http::request::ParsedRequest;

pub type TlsSession = rustls::ServerConnection;

pub const READ_CHUNK: usize = 16 * 1024;
pub const MAX_READ_BUFFER: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    ReadingHeaders,
    ReadingBody,
    Processing,
    Writing,
    WebSocket,
    Closed,
}

pub struct Connection {
    pub stream: TcpStream,
    pub read_buf: Vec<u8>,
    pub write_buf: Vec<u8>,
    pub write_pos: usize,
    pub state: ConnState,
    /// State to return to once `write_buf` has fully drained:
    /// `ReadingHeaders` for an ordinary HTTP response, `WebSocket` for
    /// an upgrade response or an outbound WS frame.
    pub resume_state: ConnState,
    pub pending_request: Option<ParsedRequest>,
    pub connected_at: Instant,
    pub close_after_write: bool,
    pub ws_session_id: Option<String>,
    /// `Some` once the listener is configured for TLS — every byte in
    /// and out of `stream` is then routed through this session rather
    /// than touching the socket directly.
    pub tls: Option<TlsSession>,
}

impl Connection {
    pub fn new(stream: TcpStream, tls: Option<TlsSession>) -> Self {
        Self {
            stream,
            read_buf: Vec::new(),
            write_buf: Vec::new(),
            write_pos: 0,
            state: ConnState::ReadingHeaders,
            resume_state: ConnState::ReadingHeaders,
            pending_request: None,
            connected_at: Instant::now(),
            close_after_write: false,
            ws_session_id: None,
            tls,
        }
    }

    /// Re-enter ReadingHeaders after a keep-alive response has been
    /// fully flushed. Never called from WebSocket state.
    pub fn reset_for_next_request(&mut self) {
        debug_assert!(self.state != ConnState::WebSocket);
        self.read_buf.clear();
        self.write_buf.clear();
        self.write_pos = 0;
        self.pending_request = None;
        self.state = ConnState::ReadingHeaders;
        self.resume_state = ConnState::ReadingHeaders;
    }

    pub fn queue_write(&mut self, bytes: Vec<u8>, resume_state: ConnState, close_after_write: bool) {
        self.write_buf = bytes;
        self.write_pos = 0;
        self.resume_state = resume_state;
        self.close_after_write = close_after_write;
        self.state = ConnState::Writing;
    }
}
