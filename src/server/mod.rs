//! Server module
//!
//! The HTTP request surface and the WebSocket channel endpoint, sharing one
//! [`PollService`].

pub mod http;
pub mod peer;
pub mod ws;

use crate::config::{Config, ConfigError, CorsConfig, WsConfig};
use crate::service::PollService;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

/// Server error types
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PollService>,
    pub ws: WsConfig,
    pub started_at: Instant,
    /// Cancelled on shutdown; open sockets watch it and close.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(service: Arc<PollService>, ws: WsConfig) -> Self {
        Self {
            service,
            ws,
            started_at: Instant::now(),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Build the router with every route and the CORS layer.
pub fn build_router(state: AppState, cors: &CorsConfig) -> Router {
    Router::new()
        .route("/poll_data", get(http::poll_data))
        .route("/new_subject", post(http::new_subject))
        .route("/health", get(http::health))
        .route("/metrics", get(http::metrics))
        .route("/ws", get(ws::ws_handler))
        .layer(cors_layer(cors))
        .with_state(state)
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.allow_origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .allow_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Serve on an already-bound listener until `state.shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    cors: &CorsConfig,
) -> Result<(), ServerError> {
    let address = listener.local_addr()?;
    let shutdown = state.shutdown.clone();
    let app = build_router(state, cors);

    info!(address = %address, "pollcast listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;
    info!("server stopped");
    Ok(())
}

/// Bind the configured address and serve until Ctrl-C or SIGTERM.
pub async fn run(config: &Config, service: Arc<PollService>) -> Result<(), ServerError> {
    let addr = config.server.socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;

    let state = AppState::new(service, config.ws.clone());
    let token = state.shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });

    serve(listener, state, &config.cors).await
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
