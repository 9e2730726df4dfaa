//! `G`: the OpenAI-compatible gateway (§4.2, §6.2). Routes chat
//! completions to the provider selected per §4.2's rules, relays
//! streaming and unary responses, and persists every request/response.

mod handlers;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::db::Db;
use crate::providers::ProviderRegistry;
use crate::session::SessionManager;

#[derive(Default)]
pub struct Metrics {
    pub requests_total: AtomicU64,
    pub requests_in_flight: AtomicU64,
    pub provider_errors: AtomicU64,
    pub connection_errors: AtomicU64,
    pub request_errors: AtomicU64,
}

pub struct AppState {
    pub db: Arc<Db>,
    pub registry: Arc<ProviderRegistry>,
    pub sessions: Arc<SessionManager>,
    pub config: Config,
    pub metrics: Arc<Metrics>,
    pub started_at: Instant,
}

pub type SharedState = Arc<AppState>;

pub struct GatewayHandle {
    pub addr: SocketAddr,
    pub task: JoinHandle<()>,
}

pub fn router(state: SharedState) -> Router {
    let cors = if state.config.server.cors_origin == "*" {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origin = state.config.server.cors_origin.parse().expect("CORS_ORIGIN must be a valid header value");
        CorsLayer::new().allow_origin(origin).allow_methods(Any).allow_headers(Any)
    };

    Router::new()
        .route("/v1/chat/completions", axum::routing::post(handlers::chat_completions))
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/models/:id", get(handlers::get_model))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(cors)
        .with_state(state)
}

pub async fn start(db: Arc<Db>, registry: Arc<ProviderRegistry>, sessions: Arc<SessionManager>, config: Config) -> std::io::Result<GatewayHandle> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("invalid gateway address: {e}")))?;

    let state = Arc::new(AppState {
        db,
        registry,
        sessions,
        config,
        metrics: Arc::new(Metrics::default()),
        started_at: Instant::now(),
    });

    let app = router(state);
    let listener = TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "gateway server error");
        }
    });

    info!(addr = %bound_addr, "gateway started");
    Ok(GatewayHandle { addr: bound_addr, task })
}
