//! Shared, read-mostly state handed to every handler: config, the
//! adapter registry, the session store, the tool registry, and the
//! counters `/health` reports.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Instant;

use mio::Waker;

use crate::ai::{AdapterConfig, AdapterRegistry, AnthropicAdapter, OpenAiAdapter};
use crate::config::Config;
use crate::reactor::ReactorEvent;
use crate::session::SessionStore;
use crate::tools::ToolRegistry;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct AppState {
    pub config: Config,
    pub adapters: AdapterRegistry,
    pub sessions: SessionStore,
    pub tools: ToolRegistry,
    pub rt: tokio::runtime::Handle,
    pub events: Sender<ReactorEvent>,
    pub waker: Arc<Waker>,
    started_at: Instant,
    total_requests: AtomicU64,
    active_connections: AtomicUsize,
}

impl AppState {
    pub fn new(
        config: Config,
        sessions: SessionStore,
        tools: ToolRegistry,
        rt: tokio::runtime::Handle,
        events: Sender<ReactorEvent>,
        waker: Arc<Waker>,
    ) -> Arc<Self> {
        let mut adapters = AdapterRegistry::new();
        adapters.register(Arc::new(AnthropicAdapter::new(AdapterConfig {
            api_key: config.anthropic_api_key.clone(),
            timeout_secs: 120,
        })));
        adapters.register(Arc::new(OpenAiAdapter::new(AdapterConfig {
            api_key: config.openai_api_key.clone(),
            timeout_secs: 120,
        })));

        Arc::new(Self {
            config,
            adapters,
            sessions,
            tools,
            rt,
            events,
            waker,
            started_at: Instant::now(),
            total_requests: AtomicU64::new(0),
            active_connections: AtomicUsize::new(0),
        })
    }

    pub fn record_request(&self) -> u64 {
        self.total_requests.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn connection_opened(&self) -> usize {
        self.active_connections.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Delivers a completion event to the reactor thread and wakes its
    /// poll loop. Called from tokio tasks once an upstream call or
    /// session-store round trip finishes.
    pub fn notify(&self, event: ReactorEvent) {
        if self.events.send(event).is_ok() {
            let _ = self.waker.wake();
        }
    }
}
