use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::credentials as repo;
use crate::error::GatewayError;
use crate::utils::now_secs;

use super::super::SharedState;

/// `GET /api/qwen/credentials` — masked status only, never raw values (§4.4, §6.1).
pub async fn get(State(state): State<SharedState>) -> Result<Json<Value>, GatewayError> {
    let creds = state.db.with_conn(repo::get)?;
    Ok(Json(match creds {
        Some(c) => {
            let now = now_secs();
            json!({
                "hasCredentials": true,
                "isValid": c.is_valid(now),
                "isExpired": c.expires_at.map(|e| e <= now).unwrap_or(false),
                "expiresAt": c.expires_at,
                "createdAt": c.created_at,
                "updatedAt": c.updated_at,
            })
        }
        None => json!({"hasCredentials": false, "isValid": false, "isExpired": true, "expiresAt": null, "createdAt": null, "updatedAt": null}),
    }))
}

#[derive(Deserialize)]
pub struct SetCredentialsRequest {
    pub token: String,
    pub cookies: String,
    #[serde(rename = "expiresAt")]
    pub expires_at: Option<i64>,
}

pub async fn set(State(state): State<SharedState>, Json(body): Json<SetCredentialsRequest>) -> Result<Json<Value>, GatewayError> {
    if body.token.is_empty() || body.cookies.is_empty() {
        return Err(GatewayError::validation("token and cookies are required"));
    }
    let creds = state.db.with_conn(|c| repo::set(c, &body.token, &body.cookies, body.expires_at))?;
    let now = now_secs();
    state.events.publish(
        "credentials:updated",
        json!({"action": "updated", "valid": creds.is_valid(now), "expiresAt": creds.expires_at, "hasCredentials": true}),
    );
    Ok(Json(json!({"ok": true})))
}

pub async fn clear(State(state): State<SharedState>) -> Result<Json<Value>, GatewayError> {
    let deleted = state.db.with_conn(repo::delete)?;
    state.events.publish("credentials:updated", json!({"action": "deleted", "valid": false, "hasCredentials": false}));
    Ok(Json(json!({"deleted": deleted})))
}
