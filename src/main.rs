use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{header, HeaderName, HeaderValue, Method};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use mcp_router::config::RouterConfig;
use mcp_router::logs::{LogBufferLayer, LogRingBuffer, LOG_BUFFER_CAPACITY};
use mcp_router::registry::{MemoryRegistryStore, PgRegistryStore, RegistryStore};
use mcp_router::state::AppState;
use mcp_router::{mcp, monitor};

fn init_tracing(log_buffer: Arc<LogRingBuffer>) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let fmt_layer = if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(LogBufferLayer::new(log_buffer))
        .init();
}

async fn open_store(config: &RouterConfig) -> anyhow::Result<Arc<dyn RegistryStore>> {
    let Some(database_url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set: registry is in-memory and lost on restart");
        return Ok(Arc::new(MemoryRegistryStore::new()));
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(3))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PgRegistryStore::new(pool);
    store.migrate().await.context("registry migrations failed")?;
    tracing::info!("registry: using Postgres store");
    Ok(Arc::new(store))
}

fn build_app(state: AppState) -> anyhow::Result<axum::Router> {
    // MCP clients connect from anywhere; the shared secret gates access.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
        ])
        .max_age(Duration::from_secs(86_400));

    // Security headers
    let nosniff: SetResponseHeaderLayer<HeaderValue> = SetResponseHeaderLayer::overriding(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    let frame_deny: SetResponseHeaderLayer<HeaderValue> = SetResponseHeaderLayer::overriding(
        header::X_FRAME_OPTIONS,
        HeaderValue::from_static("DENY"),
    );
    let referrer: SetResponseHeaderLayer<HeaderValue> = SetResponseHeaderLayer::overriding(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    let hsts: SetResponseHeaderLayer<HeaderValue> = SetResponseHeaderLayer::overriding(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=63072000; includeSubDomains"),
    );

    // Rate limiting: 60 req burst, replenish 1 per second, per IP
    let governor_conf = GovernorConfigBuilder::default()
        .per_second(1)
        .burst_size(60)
        .finish()
        .context("invalid rate limiter configuration")?;

    Ok(mcp_router::create_router(state)
        .layer(GovernorLayer::new(governor_conf))
        .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024))
        .layer(cors)
        .layer(nosniff)
        .layer(frame_deny)
        .layer(referrer)
        .layer(hsts)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri().path(),
                )
            }),
        )
        .layer(CompressionLayer::new()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let log_buffer = Arc::new(LogRingBuffer::new(LOG_BUFFER_CAPACITY));
    init_tracing(Arc::clone(&log_buffer));

    let config = RouterConfig::from_env()?;
    let store = open_store(&config).await?;
    let state = AppState::new(config.clone(), store, log_buffer)
        .context("failed to build HTTP client")?;
    let app = build_app(state.clone())?;

    // ── Non-blocking startup: first tool index build in background ──
    let startup_state = state.clone();
    tokio::spawn(async move {
        match startup_state.aggregator.get_tools(true).await {
            Ok(index) => tracing::info!(
                tools = index.len(),
                servers = index.server_count(),
                "startup: tool index built"
            ),
            Err(e) => tracing::error!("startup: tool index build failed: {}", e),
        }
        startup_state.mark_ready();
    });

    // ── Background tasks ──
    let shutdown = CancellationToken::new();
    let _sweeper = mcp::transport::spawn_sweeper(Arc::clone(&state.sessions), shutdown.clone());
    let _monitor = if config.monitor_enabled {
        Some(monitor::spawn(Arc::clone(&state.monitor), shutdown.clone()))
    } else {
        tracing::info!("monitor: disabled (MONITOR_ENABLED=false)");
        None
    };

    let addr: std::net::SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.host, config.port))?;
    tracing::info!("mcp-router v{} listening on http://{}", env!("CARGO_PKG_VERSION"), addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let stop = shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        // Ends the monitor loop and closes SSE streams so open connections drain.
        stop.cancel();
    })
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("cannot install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
