use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::providers as repo;
use crate::error::GatewayError;

use super::super::SharedState;

fn provider_json(p: &repo::Provider) -> Value {
    json!({
        "id": p.id, "name": p.name, "type": p.kind, "enabled": p.enabled,
        "priority": p.priority, "description": p.description,
        "createdAt": p.created_at, "updatedAt": p.updated_at,
    })
}

#[derive(Deserialize)]
pub struct ListFilters {
    #[serde(rename = "type")]
    pub type_filter: Option<String>,
    pub enabled: Option<bool>,
}

pub async fn list(State(state): State<SharedState>, Query(filters): Query<ListFilters>) -> Result<Json<Value>, GatewayError> {
    let items = state.db.with_conn(|c| repo::list(c, filters.type_filter.as_deref(), filters.enabled))?;
    Ok(Json(json!({"providers": items.iter().map(provider_json).collect::<Vec<_>>(), "total": items.len()})))
}

pub async fn get_one(State(state): State<SharedState>, Path(id): Path<String>) -> Result<Json<Value>, GatewayError> {
    let provider = state.db.with_conn(|c| repo::get(c, &id))?.ok_or_else(|| GatewayError::not_found(format!("no provider `{id}`")))?;
    Ok(Json(provider_json(&provider)))
}

#[derive(Deserialize)]
pub struct CreateProviderRequest {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub priority: i64,
    pub description: Option<String>,
}

pub async fn create(State(state): State<SharedState>, Json(body): Json<CreateProviderRequest>) -> Result<Json<Value>, GatewayError> {
    repo::validate_id(&body.id).map_err(GatewayError::validation)?;
    if state.db.with_conn(|c| repo::get(c, &body.id))?.is_some() {
        return Err(GatewayError::validation(format!("provider `{}` already exists", body.id)));
    }
    let provider = state
        .db
        .with_conn(|c| repo::create(c, &body.id, &body.name, &body.kind, body.priority, body.description.as_deref()))?;
    let value = provider_json(&provider);
    state.events.publish("providers:updated", json!({"action": "created", "providerId": provider.id}));
    Ok(Json(value))
}

#[derive(Deserialize)]
pub struct UpdateProviderRequest {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub priority: Option<i64>,
    pub description: Option<Option<String>>,
}

pub async fn update(State(state): State<SharedState>, Path(id): Path<String>, Json(body): Json<UpdateProviderRequest>) -> Result<Json<Value>, GatewayError> {
    let provider = state
        .db
        .with_conn(|c| repo::update(c, &id, body.name.as_deref(), body.enabled, body.priority, body.description.as_ref().map(|d| d.as_deref())))?
        .ok_or_else(|| GatewayError::not_found(format!("no provider `{id}`")))?;
    state.registry.invalidate(&id);
    let value = provider_json(&provider);
    state.events.publish("providers:updated", json!({"action": "updated", "providerId": id}));
    Ok(Json(value))
}

pub async fn delete(State(state): State<SharedState>, Path(id): Path<String>) -> Result<Json<Value>, GatewayError> {
    let deleted = state.db.with_conn(|c| repo::delete(c, &id))?;
    if !deleted {
        return Err(GatewayError::not_found(format!("no provider `{id}`")));
    }
    state.registry.invalidate(&id);
    state.events.publish("providers:updated", json!({"action": "deleted", "providerId": id}));
    Ok(Json(json!({"deleted": true})))
}

pub async fn enable(State(state): State<SharedState>, Path(id): Path<String>) -> Result<Json<Value>, GatewayError> {
    set_enabled(state, id, true).await
}

pub async fn disable(State(state): State<SharedState>, Path(id): Path<String>) -> Result<Json<Value>, GatewayError> {
    set_enabled(state, id, false).await
}

async fn set_enabled(state: SharedState, id: String, enabled: bool) -> Result<Json<Value>, GatewayError> {
    let changed = state.db.with_conn(|c| repo::set_enabled(c, &id, enabled))?;
    if !changed {
        return Err(GatewayError::not_found(format!("no provider `{id}`")));
    }
    state.registry.invalidate(&id);
    state.events.publish("providers:updated", json!({"action": if enabled { "enabled" } else { "disabled" }, "providerId": id}));
    Ok(Json(json!({"id": id, "enabled": enabled})))
}

pub async fn reload(State(state): State<SharedState>, Path(id): Path<String>) -> Result<Json<Value>, GatewayError> {
    state.registry.invalidate(&id);
    Ok(Json(json!({"id": id, "reloaded": true})))
}

pub async fn test(State(state): State<SharedState>, Path(id): Path<String>) -> Result<Json<Value>, GatewayError> {
    let provider = state.registry.get_or_build(&state.db, &id).map_err(GatewayError::internal)?;
    let result = provider.test().await;
    Ok(Json(json!({"ok": result.ok, "latencyMs": result.latency_ms, "message": result.message})))
}

#[derive(Deserialize)]
pub struct MaskQuery {
    #[serde(default = "default_mask")]
    pub mask: bool,
}
fn default_mask() -> bool {
    true
}

pub async fn config_get(State(state): State<SharedState>, Path(id): Path<String>, Query(q): Query<MaskQuery>) -> Result<Json<Value>, GatewayError> {
    let entries = state.db.with_conn(|c| repo::get_config(c, &id))?;
    let entries = repo::mask_config(entries, q.mask);
    Ok(Json(json!({"config": entries.into_iter().map(|e| json!({"key": e.key, "value": e.value, "isSensitive": e.is_sensitive})).collect::<Vec<_>>()})))
}

#[derive(Deserialize)]
pub struct ConfigEntryBody {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub is_sensitive: bool,
}

pub async fn config_put(State(state): State<SharedState>, Path(id): Path<String>, Json(body): Json<ConfigEntryBody>) -> Result<Json<Value>, GatewayError> {
    state.db.with_conn(|c| repo::set_config(c, &id, &body.key, &body.value, body.is_sensitive))?;
    state.registry.invalidate(&id);
    state.events.publish("providers:updated", json!({"action": "config_updated", "providerId": id}));
    Ok(Json(json!({"ok": true})))
}

#[derive(Deserialize)]
pub struct ConfigValueBody {
    pub value: String,
    #[serde(default)]
    pub is_sensitive: bool,
}

pub async fn config_patch_key(
    State(state): State<SharedState>,
    Path((id, key)): Path<(String, String)>,
    Json(body): Json<ConfigValueBody>,
) -> Result<Json<Value>, GatewayError> {
    state.db.with_conn(|c| repo::set_config(c, &id, &key, &body.value, body.is_sensitive))?;
    state.registry.invalidate(&id);
    state.events.publish("providers:updated", json!({"action": "config_updated", "providerId": id}));
    Ok(Json(json!({"ok": true})))
}

pub async fn config_delete_key(State(state): State<SharedState>, Path((id, key)): Path<(String, String)>) -> Result<Json<Value>, GatewayError> {
    let deleted = state.db.with_conn(|c| repo::delete_config_key(c, &id, &key))?;
    state.registry.invalidate(&id);
    state.events.publish("providers:updated", json!({"action": "config_updated", "providerId": id}));
    Ok(Json(json!({"deleted": deleted})))
}
