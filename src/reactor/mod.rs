//! Single-threaded, edge-triggered reactor: accepts connections and
//! drives HTTP/WebSocket I/O. Upstream calls and session-store access
//! never happen on this thread; handlers dispatch that work to the
//! Tokio runtime and the result comes back as a `ReactorEvent`,
//! delivered over a channel and announced with a `mio::Waker` so this
//! thread's `poll()` wakes up to collect it.

pub mod connection;

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use connection::{ConnState, Connection, TlsSession, MAX_READ_BUFFER, READ_CHUNK};

use crate::handlers::ws_upgrade::{handle_ws_frame, is_upgrade_request, upgrade_response};
use crate::http::codec::{self, ParseOutcome};
use crate::http::response::ResponseBuilder;
use crate::router::{HandlerOutcome, RequestContext, Router};
use crate::state::AppState;
use crate::ws::{read_frame, FrameReadOutcome, Opcode};

pub const LISTENER_TOKEN: Token = Token(0);
pub const WAKE_TOKEN: Token = Token(1);
const FIRST_CONN_TOKEN: usize = 2;
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

pub enum ReactorEvent {
    Respond { token: Token, bytes: Vec<u8>, close_after: bool },
    WsSend { token: Token, bytes: Vec<u8> },
}

pub struct Reactor {
    poll: Poll,
    listener: TcpListener,
    connections: HashMap<Token, Connection>,
    next_token: usize,
    events_rx: Receiver<ReactorEvent>,
    state: Arc<AppState>,
    router: Arc<Router>,
    running: Arc<AtomicBool>,
    tls_config: Option<Arc<rustls::ServerConfig>>,
}

impl Reactor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        poll: Poll,
        bind: &str,
        port: u16,
        tls_config: Option<Arc<rustls::ServerConfig>>,
        state: Arc<AppState>,
        router: Arc<Router>,
        events_rx: Receiver<ReactorEvent>,
        running: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let addr: SocketAddr = format!("{bind}:{port}").parse().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("invalid bind address: {e}"))
        })?;

        let std_listener = bind_reusable(addr)?;
        let mut listener = TcpListener::from_std(std_listener);
        poll.registry().register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            listener,
            connections: HashMap::new(),
            next_token: FIRST_CONN_TOKEN,
            events_rx,
            state,
            router,
            running,
            tls_config,
        })
    }

    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(1024);
        while self.running.load(Ordering::Relaxed) {
            match self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_loop(),
                    WAKE_TOKEN => self.drain_worker_events(),
                    token => self.handle_connection_event(token, event),
                }
            }
        }
        Ok(())
    }

    fn accept_loop(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, _addr)) => {
                    let _ = stream.set_nodelay(true);
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    if let Err(e) = self.poll.registry().register(&mut stream, token, Interest::READABLE) {
                        tracing::warn!(error = %e, "failed to register accepted connection");
                        continue;
                    }
                    let tls = self.tls_config.as_ref().map(|cfg| {
                        TlsSession::new(cfg.clone()).expect("TLS config was validated at startup")
                    });
                    self.connections.insert(token, Connection::new(stream, tls));
                    self.state.connection_opened();
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(error = %e, "accept loop stopped");
                    break;
                }
            }
        }
    }

    fn drain_worker_events(&mut self) {
        let mut pending = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            pending.push(event);
        }
        for event in pending {
            match event {
                ReactorEvent::Respond { token, bytes, close_after } => {
                    if self.connections.contains_key(&token) {
                        self.queue_and_flush(token, bytes, ConnState::ReadingHeaders, close_after);
                    }
                }
                ReactorEvent::WsSend { token, bytes } => {
                    if self.connections.contains_key(&token) {
                        self.queue_and_flush(token, bytes, ConnState::WebSocket, false);
                    }
                }
            }
        }
    }

    fn handle_connection_event(&mut self, token: Token, event: &mio::event::Event) {
        if event.is_error() {
            self.close_connection(token);
            return;
        }
        if event.is_writable() {
            self.flush_connection(token);
            if !self.connections.contains_key(&token) {
                return;
            }
        }
        if event.is_readable() {
            self.handle_readable(token);
        }
    }

    fn handle_readable(&mut self, token: Token) {
        loop {
            let outcome = {
                let Some(conn) = self.connections.get_mut(&token) else { return };
                if conn.state != ConnState::ReadingHeaders
                    && conn.state != ConnState::ReadingBody
                    && conn.state != ConnState::WebSocket
                {
                    // mid-write or processing: ignore spurious readability
                    return;
                }
                if conn.read_buf.len() >= MAX_READ_BUFFER {
                    ReadOutcome::Overflow
                } else if let Some(tls) = conn.tls.as_mut() {
                    read_tls(tls, &mut conn.stream, &mut conn.read_buf)
                } else {
                    let mut chunk = [0u8; READ_CHUNK];
                    match conn.stream.read(&mut chunk) {
                        Ok(0) => ReadOutcome::Eof,
                        Ok(n) => {
                            conn.read_buf.extend_from_slice(&chunk[..n]);
                            ReadOutcome::Read
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => ReadOutcome::WouldBlock,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => ReadOutcome::Retry,
                        Err(_) => ReadOutcome::Fatal,
                    }
                }
            };

            // A TLS handshake flight (ServerHello, etc.) has to go out
            // before the plaintext loop above sees any application data.
            if let Some(conn) = self.connections.get_mut(&token) {
                if let Some(tls) = conn.tls.as_mut() {
                    flush_tls_records(tls, &mut conn.stream);
                }
            }

            match outcome {
                ReadOutcome::Read => continue,
                ReadOutcome::Retry => continue,
                ReadOutcome::WouldBlock => break,
                ReadOutcome::Eof | ReadOutcome::Fatal | ReadOutcome::Overflow => {
                    self.close_connection(token);
                    return;
                }
            }
        }

        self.process_buffer(token);
    }

    fn process_buffer(&mut self, token: Token) {
        let is_ws = matches!(self.connections.get(&token).map(|c| c.state), Some(ConnState::WebSocket));
        if is_ws {
            self.process_ws_frames(token);
        } else {
            self.process_http_request(token);
        }
    }

    fn process_http_request(&mut self, token: Token) {
        let parse_result = {
            let Some(conn) = self.connections.get(&token) else { return };
            codec::parse(&conn.read_buf)
        };

        match parse_result {
            ParseOutcome::NeedMore => {
                if let Some(conn) = self.connections.get_mut(&token) {
                    if conn.state == ConnState::ReadingHeaders && codec::headers_complete(&conn.read_buf) {
                        conn.state = ConnState::ReadingBody;
                    }
                }
            }
            ParseOutcome::Error(_) => {
                let bytes = ResponseBuilder::new(400)
                    .cors()
                    .json(&serde_json::json!({"error": "Bad Request"}))
                    .into_bytes();
                self.queue_and_flush(token, bytes, ConnState::Closed, true);
            }
            ParseOutcome::Complete { request, consumed } => {
                {
                    let Some(conn) = self.connections.get_mut(&token) else { return };
                    conn.read_buf.drain(..consumed);
                    conn.state = ConnState::Processing;
                }

                if is_upgrade_request(&request) {
                    self.state.record_request();
                    match upgrade_response(&request) {
                        Some(bytes) => {
                            if let Some(conn) = self.connections.get_mut(&token) {
                                conn.ws_session_id = Some(uuid::Uuid::new_v4().to_string());
                            }
                            self.queue_and_flush(token, bytes, ConnState::WebSocket, false);
                        }
                        None => {
                            let bytes = ResponseBuilder::new(400)
                                .cors()
                                .json(&serde_json::json!({"error": "invalid WebSocket upgrade"}))
                                .into_bytes();
                            self.queue_and_flush(token, bytes, ConnState::Closed, true);
                        }
                    }
                    return;
                }

                self.state.record_request();
                let close_after = !request.keep_alive();
                let ctx = RequestContext { request: &request, state: self.state.clone(), token };
                match self.router.dispatch(&ctx) {
                    HandlerOutcome::Immediate(bytes, close) => {
                        self.queue_and_flush(token, bytes, ConnState::ReadingHeaders, close || close_after);
                    }
                    HandlerOutcome::Deferred => {
                        // handler already spawned async work; response
                        // arrives later via ReactorEvent::Respond
                    }
                }
            }
        }
    }

    fn process_ws_frames(&mut self, token: Token) {
        loop {
            let outcome = {
                let Some(conn) = self.connections.get(&token) else { return };
                read_frame(&conn.read_buf)
            };

            match outcome {
                FrameReadOutcome::NeedMore => break,
                FrameReadOutcome::Error(_) => {
                    self.close_connection(token);
                    return;
                }
                FrameReadOutcome::Frame { frame, consumed } => {
                    {
                        let Some(conn) = self.connections.get_mut(&token) else { return };
                        conn.read_buf.drain(..consumed);
                    }

                    if frame.opcode == Opcode::Close {
                        let bytes = crate::ws::write_close_frame();
                        self.queue_and_flush(token, bytes, ConnState::Closed, true);
                        return;
                    }

                    match handle_ws_frame(&self.state, token, &frame) {
                        Some(bytes) => self.queue_and_flush(token, bytes, ConnState::WebSocket, false),
                        None => {}
                    }
                }
            }
        }
    }

    fn queue_and_flush(&mut self, token: Token, bytes: Vec<u8>, resume_state: ConnState, close_after: bool) {
        if let Some(conn) = self.connections.get_mut(&token) {
            conn.queue_write(bytes, resume_state, close_after);
        }
        self.flush_connection(token);
    }

    fn flush_connection(&mut self, token: Token) {
        enum Outcome {
            WouldBlock,
            Fatal,
            Done { should_close: bool, resume_state: ConnState },
        }

        let outcome = {
            let Some(conn) = self.connections.get_mut(&token) else { return };
            if conn.state != ConnState::Writing {
                return;
            }
            let mut result = None;
            loop {
                if let Some(tls) = conn.tls.as_mut() {
                    if conn.write_pos < conn.write_buf.len() {
                        match tls.writer().write(&conn.write_buf[conn.write_pos..]) {
                            Ok(n) => {
                                conn.write_pos += n;
                                continue;
                            }
                            Err(_) => {
                                result = Some(Outcome::Fatal);
                                break;
                            }
                        }
                    }
                    if !tls.wants_write() {
                        result = Some(Outcome::Done {
                            should_close: conn.close_after_write,
                            resume_state: conn.resume_state,
                        });
                        break;
                    }
                    match tls.write_tls(&mut conn.stream) {
                        Ok(0) => {
                            result = Some(Outcome::Fatal);
                            break;
                        }
                        Ok(_) => continue,
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            result = Some(Outcome::WouldBlock);
                            break;
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(_) => {
                            result = Some(Outcome::Fatal);
                            break;
                        }
                    }
                }

                if conn.write_pos >= conn.write_buf.len() {
                    result = Some(Outcome::Done {
                        should_close: conn.close_after_write,
                        resume_state: conn.resume_state,
                    });
                    break;
                }
                match conn.stream.write(&conn.write_buf[conn.write_pos..]) {
                    Ok(0) => {
                        result = Some(Outcome::Fatal);
                        break;
                    }
                    Ok(n) => conn.write_pos += n,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        result = Some(Outcome::WouldBlock);
                        break;
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => {
                        result = Some(Outcome::Fatal);
                        break;
                    }
                }
            }
            result.unwrap()
        };

        match outcome {
            Outcome::WouldBlock => {
                if let Some(conn) = self.connections.get_mut(&token) {
                    let _ = self.poll.registry().reregister(
                        &mut conn.stream,
                        token,
                        Interest::READABLE | Interest::WRITABLE,
                    );
                }
            }
            Outcome::Fatal => self.close_connection(token),
            Outcome::Done { should_close, resume_state } => {
                if should_close {
                    self.close_connection(token);
                    return;
                }
                if let Some(conn) = self.connections.get_mut(&token) {
                    let _ = self.poll.registry().reregister(&mut conn.stream, token, Interest::READABLE);
                    if resume_state == ConnState::ReadingHeaders {
                        conn.reset_for_next_request();
                    } else {
                        conn.state = resume_state;
                    }
                }
            }
        }
    }

    fn close_connection(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            self.state.connection_closed();
        }
    }
}

enum ReadOutcome {
    Read,
    Retry,
    WouldBlock,
    Eof,
    Fatal,
    Overflow,
}

/// One attempt at pulling ciphertext off the socket, feeding it through
/// the TLS state machine, and appending whatever plaintext that unlocks
/// to `read_buf`. During a handshake this can legitimately produce zero
/// plaintext bytes while still reporting `Read` — the handshake itself
/// advanced, and `flush_tls_records` (called right after) carries the
/// reply flight back out.
fn read_tls(
    tls: &mut TlsSession,
    stream: &mut mio::net::TcpStream,
    read_buf: &mut Vec<u8>,
) -> ReadOutcome {
    match tls.read_tls(stream) {
        Ok(0) => return ReadOutcome::Eof,
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return ReadOutcome::WouldBlock,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => return ReadOutcome::Retry,
        Err(_) => return ReadOutcome::Fatal,
    }

    if tls.process_new_packets().is_err() {
        return ReadOutcome::Fatal;
    }

    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match tls.reader().read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => read_buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(_) => return ReadOutcome::Fatal,
        }
    }
    ReadOutcome::Read
}

/// Best-effort flush of whatever TLS wants to send right now (handshake
/// flights, close_notify). A partial write here just waits for the next
/// readable/writable poll event — the reactor revisits this connection
/// either way.
fn flush_tls_records(tls: &mut TlsSession, stream: &mut mio::net::TcpStream) {
    while tls.wants_write() {
        match tls.write_tls(stream) {
            Ok(0) => break,
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}

fn bind_reusable(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    use socket2::{Domain, Socket, Type};
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    Ok(socket.into())
}
