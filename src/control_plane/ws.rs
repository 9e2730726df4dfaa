//! Push channel (§4.6, §6.3): one long-lived connection, server-initiated
//! messages only. Grounded on the teacher's `gateway/ws.rs` select loop.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use serde_json::Value;
use tracing::warn;

use super::handlers::proxy::snapshot_json;
use crate::logs;

use super::SharedState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, state: SharedState) {
    let mut events_rx = state.events.subscribe();

    match snapshot_json(&state) {
        Ok(mut initial) => {
            if let Value::Object(ref mut map) = initial {
                map.insert("type".to_string(), Value::String("proxy:status".to_string()));
                map.insert("timestamp".to_string(), Value::from(crate::utils::now_secs()));
            }
            if let Ok(text) = serde_json::to_string(&initial) {
                if socket.send(Message::Text(text)).await.is_err() {
                    return;
                }
            }
        }
        Err(e) => warn!(error = %e.message, "control plane: failed to build initial proxy:status snapshot"),
    }

    loop {
        tokio::select! {
            event = events_rx.recv() => {
                match event {
                    Ok(text) => {
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

/// `GET /ws/logs` (§10.1): relays the process's own `tracing` output to
/// subscribers. Distinct from the state-change push channel above — this
/// carries log lines, not domain events.
pub async fn ws_logs_handler(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(handle_ws_logs)
}

async fn handle_ws_logs(mut socket: WebSocket) {
    let Some(mut logs_rx) = logs::subscribe() else {
        return;
    };

    loop {
        tokio::select! {
            line = logs_rx.recv() => {
                match line {
                    Ok(text) => {
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}
