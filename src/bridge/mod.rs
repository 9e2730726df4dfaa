//! `W`: the web-chat bridge (§4.4). Presents an OpenAI-compatible chat
//! surface over an upstream web-chat service; `G` talks to it as just
//! another `OpenAiCompatProvider` pointed at this process's own base URL.

mod handlers;
pub mod jwt;
mod upstream;

use std::net::SocketAddr;
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
use crate::session::SessionManager;

pub use upstream::UpstreamClient;

pub struct AppState {
    pub db: Arc<Db>,
    pub sessions: Arc<SessionManager>,
    pub upstream: UpstreamClient,
    pub config: Config,
    pub started_at: Instant,
}

pub type SharedState = Arc<AppState>;

pub struct BridgeHandle {
    pub addr: SocketAddr,
    pub task: JoinHandle<()>,
}

const UPSTREAM_BASE_URL_SETTING: &str = "bridge.upstreamBaseUrl";

fn upstream_base_url(db: &Db) -> anyhow::Result<String> {
    db.with_conn(|c| crate::db::settings::get(c, UPSTREAM_BASE_URL_SETTING))?
        .ok_or_else(|| anyhow::anyhow!("setting `{UPSTREAM_BASE_URL_SETTING}` is not configured"))
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
        .route("/health", get(handlers::health))
        .layer(cors)
        .with_state(state)
}

/// Start `W`. Per §4.3/§4.4/§9, a restarted bridge no longer knows the
/// upstream's own continuity state, so every session row is dropped
/// before the first request is accepted — stale `chat_id`/`parent_id`
/// pairs would otherwise be replayed against a service that has no idea
/// what they mean.
pub async fn start(db: Arc<Db>, config: Config) -> anyhow::Result<BridgeHandle> {
    let cleared = db.with_conn(crate::db::sessions::delete_all)?;
    if cleared > 0 {
        info!(cleared, "bridge startup: cleared stale sessions");
    }

    let base_url = upstream_base_url(&db)?;
    let upstream = UpstreamClient::new(base_url, config.server.timeout_ms);
    let sessions = Arc::new(SessionManager::new(db.clone(), config.session.timeout_ms as i64));
    let _sweeper = sessions.spawn_sweeper(config.session.cleanup_interval_ms);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.bridge_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bridge address: {e}"))?;

    let state = Arc::new(AppState { db, sessions, upstream, config, started_at: Instant::now() });

    let app = router(state);
    let listener = TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "bridge server error");
        }
    });

    info!(addr = %bound_addr, "bridge started");
    Ok(BridgeHandle { addr: bound_addr, task })
}
