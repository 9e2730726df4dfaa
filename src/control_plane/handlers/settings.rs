use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config;
use crate::db::settings as repo;
use crate::error::GatewayError;

use super::super::SharedState;

#[derive(Deserialize)]
pub struct CategoryFilter {
    pub category: Option<String>,
}

pub async fn list(State(state): State<SharedState>, Query(filter): Query<CategoryFilter>) -> Result<Json<Value>, GatewayError> {
    let entries = state.db.with_conn(|c| repo::list(c, filter.category.as_deref()))?;
    Ok(Json(json!({"settings": entries.into_iter().map(|(k, v)| json!({"key": k, "value": v})).collect::<Vec<_>>()})))
}

pub async fn get_one(State(state): State<SharedState>, Path(key): Path<String>) -> Result<Json<Value>, GatewayError> {
    let value = state.db.with_conn(|c| repo::get(c, &key))?.ok_or_else(|| GatewayError::not_found(format!("no setting `{key}`")))?;
    Ok(Json(json!({"key": key, "value": value})))
}

#[derive(Deserialize)]
pub struct SetValueRequest {
    pub value: String,
}

fn validate_setting(key: &str, value: &str) -> Result<(), GatewayError> {
    match key {
        "server.port" => {
            let port: u32 = value.parse().map_err(|_| GatewayError::validation("server.port must be an integer"))?;
            if !(1..=65535).contains(&port) {
                return Err(GatewayError::validation("server.port must be 1-65535"));
            }
        }
        "server.host" => {
            if !config::is_valid_host(value) {
                return Err(GatewayError::validation("server.host is not a valid IPv4 address or hostname"));
            }
        }
        "server.timeout" => {
            let ms: u64 = value.parse().map_err(|_| GatewayError::validation("server.timeout must be an integer"))?;
            if !(1000..=600_000).contains(&ms) {
                return Err(GatewayError::validation("server.timeout must be 1000-600000 ms"));
            }
        }
        "logging.level" => {
            if !matches!(value, "debug" | "info" | "warn" | "error") {
                return Err(GatewayError::validation("logging.level must be one of debug|info|warn|error"));
            }
        }
        _ => {}
    }
    Ok(())
}

pub async fn put_one(State(state): State<SharedState>, Path(key): Path<String>, Json(body): Json<SetValueRequest>) -> Result<Json<Value>, GatewayError> {
    validate_setting(&key, &body.value)?;
    state.db.with_conn(|c| repo::set(c, &key, &body.value))?;
    Ok(Json(json!({"key": key, "value": body.value})))
}

pub async fn delete_one(State(state): State<SharedState>, Path(key): Path<String>) -> Result<Json<Value>, GatewayError> {
    let deleted = state.db.with_conn(|c| repo::delete(c, &key))?;
    Ok(Json(json!({"deleted": deleted})))
}

pub async fn bulk(State(state): State<SharedState>, Json(body): Json<Vec<SetEntry>>) -> Result<Json<Value>, GatewayError> {
    for entry in &body {
        validate_setting(&entry.key, &entry.value)?;
    }
    let entries: Vec<(String, String)> = body.into_iter().map(|e| (e.key, e.value)).collect();
    state.db.with_conn(|c| repo::set_bulk(c, &entries))?;
    Ok(Json(json!({"ok": true, "count": entries.len()})))
}

#[derive(Deserialize)]
pub struct SetEntry {
    pub key: String,
    pub value: String,
}
