use std::sync::Arc;

use anyhow::Context as _;
use axum::Router;
use axum::routing::{get, post};
use docchat_relay::Relay;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::mock_backend;
use crate::routes::{handle_chat, handle_health};
use crate::session::SessionDecoder;

/// Shared state passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
    pub sessions: Arc<SessionDecoder>,
}

impl AppState {
    pub fn new(relay: Relay, sessions: SessionDecoder) -> Self {
        Self {
            relay,
            sessions: Arc::new(sessions),
        }
    }
}

/// App state plus the mock backend task, if one was started.
pub struct Prepared {
    pub state: AppState,
    pub mock_backend: Option<JoinHandle<()>>,
}

/// Builds the relay for `config`, starting the mock backend when enabled.
pub async fn prepare(config: &ServerConfig) -> anyhow::Result<Prepared> {
    let (base_url, mock_backend) = if config.use_mock_backend {
        let (addr, handle) = mock_backend::spawn().await?;
        (format!("http://{addr}"), Some(handle))
    } else {
        let url = config
            .backend_url
            .clone()
            .context("SERVER_URL is required unless the mock backend is enabled")?;
        (url, None)
    };

    info!(backend = %base_url, mock = config.use_mock_backend, "configuring chat relay");
    let relay = Relay::http(config.relay_config(&base_url))?;
    let sessions = SessionDecoder::new(config.session_secret.as_deref(), &config.session_cookie);

    Ok(Prepared {
        state: AppState::new(relay, sessions),
        mock_backend,
    })
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat", post(handle_chat))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Runs the server until Ctrl-C, then ends in-flight streams.
pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let prepared = prepare(&config).await?;
    let shutdown = prepared.state.relay.shutdown_handle();
    let app = router(prepared.state);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!(bind = %config.bind, "docchat relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested; ending open chat streams");
            shutdown.trigger();
        })
        .await?;

    if let Some(handle) = prepared.mock_backend {
        handle.abort();
    }
    Ok(())
}
