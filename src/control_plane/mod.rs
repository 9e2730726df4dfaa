//! Control plane: REST surface + push channel for operator tooling (§4.6, §6.1, §6.3).

mod events;
mod handlers;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, patch, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::db::Db;
use crate::providers::ProviderRegistry;
use crate::supervisor::ChildSupervisor;

pub use events::EventBus;

pub struct AppState {
    pub db: Arc<Db>,
    pub registry: Arc<ProviderRegistry>,
    pub events: EventBus,
    pub config: Config,
    pub supervisor: Arc<ChildSupervisor>,
    pub started_at: Instant,
}

pub type SharedState = Arc<AppState>;

pub struct ControlPlaneHandle {
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

    let api = Router::new()
        .route("/health", get(handlers::proxy::health))
        .route("/proxy/status", get(handlers::proxy::status))
        .route("/proxy/start", post(handlers::proxy::start))
        .route("/proxy/stop", post(handlers::proxy::stop))
        .route("/providers", get(handlers::providers::list).post(handlers::providers::create))
        .route(
            "/providers/:id",
            get(handlers::providers::get_one).put(handlers::providers::update).delete(handlers::providers::delete),
        )
        .route("/providers/:id/enable", post(handlers::providers::enable))
        .route("/providers/:id/disable", post(handlers::providers::disable))
        .route("/providers/:id/test", post(handlers::providers::test))
        .route("/providers/:id/reload", post(handlers::providers::reload))
        .route("/providers/:id/config", get(handlers::providers::config_get).put(handlers::providers::config_put))
        .route(
            "/providers/:id/config/:key",
            patch(handlers::providers::config_patch_key).delete(handlers::providers::config_delete_key),
        )
        .route("/models", get(handlers::models::list).post(handlers::models::create))
        .route(
            "/models/:id",
            get(handlers::models::get_one).put(handlers::models::update).delete(handlers::models::delete),
        )
        .route(
            "/qwen/credentials",
            get(handlers::credentials::get).post(handlers::credentials::set).delete(handlers::credentials::clear),
        )
        .route("/settings", get(handlers::settings::list))
        .route(
            "/settings/:key",
            get(handlers::settings::get_one).put(handlers::settings::put_one).delete(handlers::settings::delete_one),
        )
        .route("/settings/bulk", post(handlers::settings::bulk))
        .route("/activity/recent", get(handlers::observability::activity_recent))
        .route("/activity/stats", get(handlers::observability::activity_stats))
        .route("/requests", get(handlers::observability::requests))
        .route("/responses", get(handlers::observability::responses))
        .route("/sessions", get(handlers::observability::sessions));

    Router::new()
        .nest("/api", api)
        .route("/ws", get(ws::ws_handler))
        .route("/ws/logs", get(ws::ws_logs_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start(
    db: Arc<Db>,
    registry: Arc<ProviderRegistry>,
    supervisor: Arc<ChildSupervisor>,
    config: Config,
) -> std::io::Result<ControlPlaneHandle> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.control_plane_port)
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("invalid control plane address: {e}")))?;

    let state = Arc::new(AppState { db, registry, events: EventBus::new(), config, supervisor, started_at: Instant::now() });

    let app = router(state);
    let listener = TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "control plane server error");
        }
    });

    info!(addr = %bound_addr, "control plane started");
    Ok(ControlPlaneHandle { addr: bound_addr, task })
}
