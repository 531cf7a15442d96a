// Application state shared by every handler and background task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;

use crate::aggregator::ManifestAggregator;
use crate::config::RouterConfig;
use crate::logs::{LogRingBuffer, LOG_BUFFER_CAPACITY};
use crate::mcp::router::ToolRouter;
use crate::mcp::transport::SessionStore;
use crate::monitor::{
    HealthMonitor, LogNotifier, MonitorSettings, Notifier, PushcutNotifier, RecoveryRunner,
};
use crate::registry::{Registry, RegistryStore};

/// Central application state. Clone-friendly: every field is an `Arc` or
/// cheap handle.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RouterConfig>,
    pub registry: Registry,
    pub aggregator: Arc<ManifestAggregator>,
    pub router: Arc<ToolRouter>,
    pub sessions: Arc<SessionStore>,
    pub monitor: Arc<HealthMonitor>,
    pub client: Client,
    pub start_time: Instant,
    /// `true` once the first tool index build has been attempted.
    pub ready: Arc<AtomicBool>,
    /// Shared secret from ROUTER_API_KEY. None = dev mode (no auth).
    pub auth_secret: Option<String>,
    /// In-memory ring buffer for backend log entries (last 1000).
    pub log_buffer: Arc<LogRingBuffer>,
}

// ── readiness helpers ───────────────────────────────────────────────────────
impl AppState {
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Relaxed);
        tracing::info!("router marked as READY");
    }
}

impl AppState {
    pub fn new(
        config: RouterConfig,
        store: Arc<dyn RegistryStore>,
        log_buffer: Arc<LogRingBuffer>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        let notifier: Arc<dyn Notifier> = match &config.pushcut_webhook {
            Some(url) => Arc::new(PushcutNotifier::new(client.clone(), url.clone())),
            None => Arc::new(LogNotifier),
        };
        Ok(Self::with_notifier(config, store, log_buffer, client, notifier))
    }

    /// Assemble state around an existing client and notifier (tests inject
    /// recording notifiers here).
    pub fn with_notifier(
        config: RouterConfig,
        store: Arc<dyn RegistryStore>,
        log_buffer: Arc<LogRingBuffer>,
        client: Client,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let registry = Registry::new(store);
        let aggregator = Arc::new(ManifestAggregator::new(registry.clone(), config.cache_ttl));
        let router = Arc::new(ToolRouter::new(
            Arc::clone(&aggregator),
            registry.clone(),
            client.clone(),
            config.call_timeout,
        ));
        let recovery = RecoveryRunner::new(
            client.clone(),
            config.fly_api_base.clone(),
            config.fly_api_token.clone(),
        );
        let monitor = Arc::new(HealthMonitor::new(
            registry.clone(),
            client.clone(),
            notifier,
            recovery,
            MonitorSettings::from_config(&config),
        ));

        let auth_secret = config.api_key.clone();
        if auth_secret.is_some() {
            tracing::info!("ROUTER_API_KEY configured: authentication enabled");
        } else {
            tracing::warn!("ROUTER_API_KEY not set: authentication disabled (dev mode)");
        }

        Self {
            sessions: Arc::new(SessionStore::new(config.session_ttl)),
            config: Arc::new(config),
            registry,
            aggregator,
            router,
            monitor,
            client,
            start_time: Instant::now(),
            ready: Arc::new(AtomicBool::new(false)),
            auth_secret,
            log_buffer,
        }
    }

    /// In-memory state with default settings.
    pub fn in_memory(config: RouterConfig) -> Result<Self, reqwest::Error> {
        Self::new(
            config,
            Arc::new(crate::registry::MemoryRegistryStore::new()),
            Arc::new(LogRingBuffer::new(LOG_BUFFER_CAPACITY)),
        )
    }
}
