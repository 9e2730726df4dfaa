use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::control_plane::events::ProxyStatusSnapshot;
use crate::error::GatewayError;
use crate::supervisor::SupervisorState;
use crate::utils::now_secs;

use super::super::SharedState;

/// `GET /api/health` — control plane's own liveness, distinct from the
/// gateway's `GET /health` (§6.2).
pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok", "service": "control-plane", "timestamp": now_secs()}))
}

/// Full status payload (§4.6): process state plus the providers/models/
/// credentials summary, so a dashboard never has to issue three more
/// requests just to render the proxy card.
pub(crate) fn snapshot_json(state: &SharedState) -> Result<Value, GatewayError> {
    let status = state.supervisor.status();
    let providers = state.db.with_conn(|c| crate::db::providers::list(c, None, None))?;
    let providers_enabled = providers.iter().filter(|p| p.enabled).count() as i64;
    let models_total = state.db.with_conn(|c| crate::db::models::list(c, None, None))?.len() as i64;
    let creds = state.db.with_conn(crate::db::credentials::get)?;
    let now = now_secs();

    let summary = ProxyStatusSnapshot {
        running: status.state == SupervisorState::Running,
        port: state.config.server.port,
        uptime_secs: status.gateway_uptime_secs.unwrap_or(0),
        providers_total: providers.len() as i64,
        providers_enabled,
        models_total,
        has_credentials: creds.is_some(),
        credentials_valid: creds.map(|c| c.is_valid(now)).unwrap_or(false),
    };

    Ok(json!({
        "state": status.state,
        "bridgePid": status.bridge_pid,
        "gatewayPid": status.gateway_pid,
        "bridgeUptimeSecs": status.bridge_uptime_secs,
        "gatewayUptimeSecs": status.gateway_uptime_secs,
        "running": summary.running,
        "port": summary.port,
        "uptimeSecs": summary.uptime_secs,
        "providersTotal": summary.providers_total,
        "providersEnabled": summary.providers_enabled,
        "modelsTotal": summary.models_total,
        "hasCredentials": summary.has_credentials,
        "credentialsValid": summary.credentials_valid,
    }))
}

pub async fn status(State(state): State<SharedState>) -> Result<Json<Value>, GatewayError> {
    Ok(Json(snapshot_json(&state)?))
}

/// `POST /api/proxy/start` (§4.7 point 4, §8 scenario 5): publish the
/// `starting` transition before the (up to 30s) readiness poll, so a
/// websocket subscriber sees it within ~100ms of the request landing,
/// not only once the supervisor's own start sequence has resolved.
pub async fn start(State(state): State<SharedState>) -> Result<Json<Value>, GatewayError> {
    let current = state.supervisor.status();
    if !matches!(current.state, SupervisorState::Running | SupervisorState::Partial | SupervisorState::Starting) {
        state.events.publish("proxy:status", json!({"state": SupervisorState::Starting}));
    }

    state.supervisor.start().await.map_err(GatewayError::internal)?;
    let payload = snapshot_json(&state)?;
    state.events.publish("proxy:status", payload.clone());
    Ok(Json(payload))
}

pub async fn stop(State(state): State<SharedState>) -> Result<Json<Value>, GatewayError> {
    state.supervisor.stop().await.map_err(GatewayError::internal)?;
    let payload = snapshot_json(&state)?;
    state.events.publish("proxy:status", payload.clone());
    Ok(Json(payload))
}
