//! gatewayd entry point: parse CLI flags, load config, stand up the
//! Tokio worker runtime, and run the reactor on the main thread.

use clap::Parser;
use mio::{Poll, Waker};
use serde_json::json;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;

use gatewayd::cli::Cli;
use gatewayd::config::Config;
use gatewayd::handlers::build_router;
use gatewayd::reactor::{Reactor, WAKE_TOKEN};
use gatewayd::session::SessionStore;
use gatewayd::state::AppState;
use gatewayd::systemd::Notifier;
use gatewayd::tools::{ToolDef, ToolRegistry};

static RUNNING_PTR: AtomicPtr<AtomicBool> = AtomicPtr::new(std::ptr::null_mut());

extern "C" fn handle_shutdown_signal(_signum: libc::c_int) {
    let ptr = RUNNING_PTR.load(Ordering::SeqCst);
    if !ptr.is_null() {
        unsafe { (*ptr).store(false, Ordering::SeqCst) };
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config error: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(config.verbose);

    if config.daemon {
        daemonize();
    }

    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    let running = Arc::new(AtomicBool::new(true));
    RUNNING_PTR.store(Arc::as_ptr(&running) as *mut AtomicBool, Ordering::SeqCst);
    unsafe {
        libc::signal(libc::SIGINT, handle_shutdown_signal as usize);
        libc::signal(libc::SIGTERM, handle_shutdown_signal as usize);
    }

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let sessions = match SessionStore::open(&config.session_db_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to open session store: {e}");
            return ExitCode::FAILURE;
        }
    };

    let tools = build_tool_registry();

    let poll = match Poll::new() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("failed to create event loop: {e}");
            return ExitCode::FAILURE;
        }
    };
    let waker = match Waker::new(poll.registry(), WAKE_TOKEN) {
        Ok(w) => Arc::new(w),
        Err(e) => {
            eprintln!("failed to create waker: {e}");
            return ExitCode::FAILURE;
        }
    };
    let (events_tx, events_rx) = std::sync::mpsc::channel();

    let tls_config = if config.tls_enabled() {
        let cert_path = config.tls_cert_path.as_ref().unwrap();
        let key_path = config.tls_key_path.as_ref().unwrap();
        match gatewayd::tls::load_server_config(cert_path, key_path) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                eprintln!("failed to load TLS cert/key: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        None
    };

    let bind = config.bind.clone();
    let port = config.port;
    let state = AppState::new(config, sessions, tools, rt.handle().clone(), events_tx, waker);
    let router = Arc::new(build_router());

    let mut reactor = match Reactor::new(poll, &bind, port, tls_config, state, router, events_rx, running) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("failed to bind {bind}:{port}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let notifier = Notifier::from_env();
    tracing::info!(%bind, port, "gatewayd listening");
    notifier.ready();

    let result = reactor.run();

    notifier.stopping();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "reactor exited with an error");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Detaches from the controlling terminal via a classic double-fork.
/// Best-effort: failures are logged but don't stop startup, since
/// `--daemon` is a convenience, not a correctness requirement.
fn daemonize() {
    unsafe {
        let pid = libc::fork();
        if pid < 0 {
            eprintln!("daemonize: first fork failed");
            return;
        }
        if pid > 0 {
            std::process::exit(0);
        }
        if libc::setsid() < 0 {
            eprintln!("daemonize: setsid failed");
            return;
        }
        let pid2 = libc::fork();
        if pid2 < 0 {
            eprintln!("daemonize: second fork failed");
            return;
        }
        if pid2 > 0 {
            std::process::exit(0);
        }
        libc::close(0);
        libc::close(1);
        libc::close(2);
    }
}

/// A couple of sample tools so `/v1/chat/completions` tool-use requests
/// and the catalog endpoint have something to show. `desktop_notify` is
/// a forwarding shim: its executor returns a marker string rather than
/// doing the work itself, per the forwarding convention documented on
/// `ToolRegistry`.
fn build_tool_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(ToolDef {
        name: "echo".to_string(),
        description: "Echoes the given text back".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"],
        })
        .to_string(),
        requires_sandbox: false,
        requires_confirmation: false,
        executor: Arc::new(|args| {
            let text = args.get("text").and_then(serde_json::Value::as_str).unwrap_or("");
            gatewayd::tools::ToolResult::ok(text.to_string())
        }),
    });

    registry.register(ToolDef {
        name: "desktop_notify".to_string(),
        description: "Shows a desktop notification".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": { "title": { "type": "string" }, "body": { "type": "string" } },
            "required": ["title"],
        })
        .to_string(),
        requires_sandbox: true,
        requires_confirmation: false,
        executor: Arc::new(|args| {
            let title = args.get("title").and_then(serde_json::Value::as_str).unwrap_or("");
            gatewayd::tools::ToolResult::ok(format!("forward:desktop_notify:{title}"))
        }),
    });

    registry
}
