use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::models as repo;
use crate::db::providers as providers_repo;
use crate::error::GatewayError;

use super::super::SharedState;

fn model_json(m: &repo::Model) -> Value {
    json!({"id": m.id, "name": m.name, "description": m.description, "capabilities": m.capabilities})
}

#[derive(Deserialize)]
pub struct ListFilters {
    pub capability: Option<String>,
    pub provider: Option<String>,
}

pub async fn list(State(state): State<SharedState>, Query(filters): Query<ListFilters>) -> Result<Json<Value>, GatewayError> {
    let items = state.db.with_conn(|c| repo::list(c, filters.capability.as_deref(), filters.provider.as_deref()))?;
    Ok(Json(json!({"models": items.iter().map(model_json).collect::<Vec<_>>(), "total": items.len()})))
}

pub async fn get_one(State(state): State<SharedState>, Path(id): Path<String>) -> Result<Json<Value>, GatewayError> {
    let model = state.db.with_conn(|c| repo::get(c, &id))?.ok_or_else(|| GatewayError::not_found(format!("no model `{id}`")))?;
    Ok(Json(model_json(&model)))
}

#[derive(Deserialize)]
pub struct CreateModelRequest {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub provider_id: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

pub async fn create(State(state): State<SharedState>, Json(body): Json<CreateModelRequest>) -> Result<Json<Value>, GatewayError> {
    if let Some(provider_id) = &body.provider_id {
        if state.db.with_conn(|c| providers_repo::get(c, provider_id))?.is_none() {
            return Err(GatewayError::validation(format!("cannot link to unknown provider `{provider_id}`")));
        }
    }
    let model = state.db.with_conn(|c| {
        let model = repo::create(c, &body.id, &body.name, body.description.as_deref(), &body.capabilities)?;
        if let Some(provider_id) = &body.provider_id {
            repo::link(c, provider_id, &model.id, body.is_default)?;
        }
        Ok(model)
    })?;
    let value = model_json(&model);
    state.events.publish("models:updated", json!({"action": "created", "modelId": model.id}));
    Ok(Json(value))
}

#[derive(Deserialize)]
pub struct UpdateModelRequest {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub capabilities: Option<Vec<String>>,
}

pub async fn update(State(state): State<SharedState>, Path(id): Path<String>, Json(body): Json<UpdateModelRequest>) -> Result<Json<Value>, GatewayError> {
    let model = state
        .db
        .with_conn(|c| repo::update(c, &id, body.name.as_deref(), body.description.as_ref().map(|d| d.as_deref()), body.capabilities.as_deref()))?
        .ok_or_else(|| GatewayError::not_found(format!("no model `{id}`")))?;
    let value = model_json(&model);
    state.events.publish("models:updated", json!({"action": "updated", "modelId": id}));
    Ok(Json(value))
}

pub async fn delete(State(state): State<SharedState>, Path(id): Path<String>) -> Result<Json<Value>, GatewayError> {
    let deleted = state.db.with_conn(|c| repo::delete(c, &id))?;
    if !deleted {
        return Err(GatewayError::not_found(format!("no model `{id}`")));
    }
    state.events.publish("models:updated", json!({"action": "deleted", "modelId": id}));
    Ok(Json(json!({"deleted": true})))
}
