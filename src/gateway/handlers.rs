use std::convert::Infallible;
use std::sync::atomic::Ordering;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::db::requests::{self, NewResponse, RequestRow};
use crate::db::settings;
use crate::error::GatewayError;
use crate::providers::{ChatMessage, ChatRequest, ProviderError};
use crate::session::SessionManager;
use crate::streaming::DisconnectGuard;
use crate::utils::now_ms;

use super::SharedState;

fn provider_error_to_gateway(provider_id: &str, err: ProviderError) -> GatewayError {
    match err {
        ProviderError::Provider { status, message } => GatewayError::provider(provider_id, Some(status), message),
        ProviderError::Connection { code, message } => GatewayError::connection(provider_id, code, message),
        ProviderError::Request { message } => {
            let mut e = GatewayError::provider(provider_id, None, message);
            e.code = Some("request_error".to_string());
            e
        }
    }
}

fn parse_messages(body: &Value) -> Result<Vec<ChatMessage>, GatewayError> {
    let messages = body
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::validation("`messages` is required and must be an array"))?;

    messages
        .iter()
        .map(|m| {
            let role = m.get("role").and_then(Value::as_str).ok_or_else(|| GatewayError::validation("message.role is required"))?;
            let content = m.get("content").and_then(Value::as_str).unwrap_or("").to_string();
            Ok(ChatMessage {
                role: role.to_string(),
                content,
                tool_calls: m.get("tool_calls").and_then(Value::as_array).cloned(),
                tool_call_id: m.get("tool_call_id").and_then(Value::as_str).map(String::from),
            })
        })
        .collect()
}

fn first_user_message(messages: &[ChatMessage]) -> String {
    messages.iter().find(|m| m.role == "user").map(|m| m.content.clone()).unwrap_or_default()
}

/// `POST /v1/chat/completions` (§4.2, §6.2).
pub async fn chat_completions(State(state): State<SharedState>, Json(body): Json<Value>) -> Response {
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
    state.metrics.requests_in_flight.fetch_add(1, Ordering::Relaxed);
    let _guard = InFlightGuard(&state);

    let result = handle_chat_completions(state.clone(), body).await;
    match result {
        Ok(response) => response,
        Err(e) => {
            match e.kind {
                crate::error::ErrorKind::Provider => state.metrics.provider_errors.fetch_add(1, Ordering::Relaxed),
                crate::error::ErrorKind::Connection => state.metrics.connection_errors.fetch_add(1, Ordering::Relaxed),
                _ => state.metrics.request_errors.fetch_add(1, Ordering::Relaxed),
            };
            e.into_response()
        }
    }
}

struct InFlightGuard<'a>(&'a SharedState);
impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.metrics.requests_in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

async fn handle_chat_completions(state: SharedState, body: Value) -> Result<Response, GatewayError> {
    let model = body.get("model").and_then(Value::as_str).ok_or_else(|| GatewayError::validation("`model` is required"))?.to_string();
    let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let messages = parse_messages(&body)?;
    let tools = body.get("tools").and_then(Value::as_array).cloned();
    let temperature = body.get("temperature").and_then(Value::as_f64);

    let provider_id = state
        .db
        .with_conn(|c| crate::providers::select_provider_id(c, &model))?
        .ok_or_else(|| GatewayError::validation(format!("no_provider_for_model: no enabled provider serves `{model}`")))?;

    let provider = state.registry.get_or_build(&state.db, &provider_id).map_err(GatewayError::internal)?;

    let explicit_session_id = body.get("session_id").and_then(Value::as_str);
    let fum = first_user_message(&messages);
    let session_id = SessionManager::derive_id(explicit_session_id, &fum);
    let _turn_guard = state.sessions.acquire(&session_id).await;
    let session = state.sessions.get_or_create(&session_id, &fum, None).map_err(GatewayError::internal)?;

    let request = ChatRequest {
        model: model.clone(),
        messages,
        tools,
        temperature,
        chat_id: session.chat_id.clone(),
        parent_id: session.parent_id.clone(),
    };

    let request_id = format!("req_{}", Uuid::new_v4().simple());
    let started = now_ms();

    state
        .db
        .with_conn(|c| {
            requests::insert_request(
                c,
                &RequestRow {
                    request_id: request_id.clone(),
                    session_id: session_id.clone(),
                    timestamp: started,
                    method: "POST".to_string(),
                    path: "/v1/chat/completions".to_string(),
                    openai_request: body.to_string(),
                    provider_request: None,
                    model: Some(model.clone()),
                    stream,
                },
            )
        })
        .map_err(GatewayError::from)?;

    if stream {
        return Ok(handle_streaming(state, provider_id, provider, request, request_id, session_id).await);
    }

    let response = provider.chat_completion(&request).await.map_err(|e| provider_error_to_gateway(&provider_id, e))?;

    state.sessions.record_turn(&session_id, response.upstream_message_id.as_deref()).map_err(GatewayError::internal)?;

    let completion_id = format!("chatcmpl-{}", Uuid::new_v4().simple());
    let openai_response = json!({
        "id": completion_id,
        "object": "chat.completion",
        "created": started / 1000,
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": response.message.role, "content": response.message.content, "tool_calls": response.message.tool_calls},
            "finish_reason": response.finish_reason,
        }],
        "usage": response.usage.clone().map(|u| json!({
            "prompt_tokens": u.prompt_tokens, "completion_tokens": u.completion_tokens, "total_tokens": u.total_tokens,
        })).unwrap_or(json!({"prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0})),
    });

    state
        .db
        .with_conn(|c| {
            requests::insert_response(
                c,
                &NewResponse {
                    response_id: format!("resp_{}", Uuid::new_v4().simple()),
                    request_id: request_id.clone(),
                    session_id: session_id.clone(),
                    provider_response: Some(response.raw.to_string()),
                    openai_response: openai_response.to_string(),
                    parent_id: response.upstream_message_id.clone(),
                    prompt_tokens: response.usage.as_ref().map(|u| u.prompt_tokens),
                    completion_tokens: response.usage.as_ref().map(|u| u.completion_tokens),
                    total_tokens: response.usage.as_ref().map(|u| u.total_tokens),
                    finish_reason: Some(response.finish_reason.clone()),
                    error: None,
                    duration_ms: now_ms() - started,
                },
            )
        })
        .map_err(GatewayError::from)?;

    Ok(Json(openai_response).into_response())
}

async fn handle_streaming(
    state: SharedState,
    provider_id: String,
    provider: std::sync::Arc<dyn crate::providers::ModelProvider>,
    request: ChatRequest,
    request_id: String,
    session_id: String,
) -> Response {
    let model = request.model.clone();
    let store_chunks = state.db.with_conn(|c| settings::get_bool(c, "persistence.storeStreamChunks", false)).unwrap_or(false);
    let started = now_ms();

    let mut disconnect_guard = DisconnectGuard::new(state.db.clone(), request_id.clone(), session_id.clone(), model.clone(), started);

    let stream = async_stream::stream! {
        let mut chunk_stream = provider.chat_completion_stream(&request);
        let mut content = String::new();
        let mut role = "assistant".to_string();
        let mut finish_reason = "stop".to_string();
        let mut upstream_message_id: Option<String> = None;
        let mut usage: Option<crate::providers::TokenUsage> = None;
        let mut raw_chunks: Vec<Value> = Vec::new();
        let completion_id = format!("chatcmpl-{}", Uuid::new_v4().simple());
        let mut saw_terminal = false;

        while let Some(item) = chunk_stream.next().await {
            match item {
                Ok(raw) => {
                    if store_chunks {
                        raw_chunks.push(raw.clone());
                    }
                    if let Some(id) = raw.get("id").and_then(Value::as_str) {
                        upstream_message_id = Some(id.to_string());
                    }
                    if let Some(u) = raw.get("usage") {
                        usage = Some(crate::providers::TokenUsage {
                            prompt_tokens: u["prompt_tokens"].as_i64().unwrap_or(0),
                            completion_tokens: u["completion_tokens"].as_i64().unwrap_or(0),
                            total_tokens: u["total_tokens"].as_i64().unwrap_or(0),
                        });
                    }
                    let delta = &raw["choices"][0]["delta"];
                    if let Some(r) = delta.get("role").and_then(Value::as_str) {
                        role = r.to_string();
                    }
                    if let Some(c) = delta.get("content").and_then(Value::as_str) {
                        content.push_str(c);
                    }
                    if let Some(fr) = raw["choices"][0].get("finish_reason").and_then(Value::as_str) {
                        finish_reason = fr.to_string();
                        saw_terminal = true;
                    }

                    let chunk = json!({
                        "id": completion_id,
                        "object": "chat.completion.chunk",
                        "created": started / 1000,
                        "model": model,
                        "choices": [{"index": 0, "delta": delta, "finish_reason": raw["choices"][0].get("finish_reason")}],
                    });
                    yield Ok::<Event, Infallible>(Event::default().data(chunk.to_string()));
                }
                Err(e) => {
                    warn!(provider = %provider_id, error = %e, "provider stream error");
                    finish_reason = "error".to_string();
                    break;
                }
            }
        }

        if !saw_terminal && finish_reason != "error" {
            finish_reason = "error".to_string();
        }

        yield Ok(Event::default().data("[DONE]"));
        disconnect_guard.disarm();

        let _ = state.sessions.record_turn(&session_id, upstream_message_id.as_deref());

        let openai_response = json!({
            "id": completion_id,
            "object": "chat.completion",
            "created": started / 1000,
            "model": model,
            "choices": [{"index": 0, "message": {"role": role, "content": content}, "finish_reason": finish_reason}],
            "usage": usage.as_ref().map(|u| json!({
                "prompt_tokens": u.prompt_tokens, "completion_tokens": u.completion_tokens, "total_tokens": u.total_tokens,
            })).unwrap_or(json!(null)),
        });
        let provider_response = if store_chunks && !raw_chunks.is_empty() {
            Some(Value::Array(raw_chunks).to_string())
        } else {
            None
        };

        let result = state.db.with_conn(|c| {
            requests::insert_response(c, &NewResponse {
                response_id: format!("resp_{}", Uuid::new_v4().simple()),
                request_id: request_id.clone(),
                session_id: session_id.clone(),
                provider_response,
                openai_response: openai_response.to_string(),
                parent_id: upstream_message_id.clone(),
                prompt_tokens: usage.as_ref().map(|u| u.prompt_tokens),
                completion_tokens: usage.as_ref().map(|u| u.completion_tokens),
                total_tokens: usage.as_ref().map(|u| u.total_tokens),
                finish_reason: Some(finish_reason.clone()),
                error: if finish_reason == "error" { Some("stream_error".to_string()) } else { None },
                duration_ms: now_ms() - started,
            })
        });
        if let Err(e) = result {
            warn!(error = %e, "failed to persist streaming response");
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

/// `GET /v1/models` (§6.2).
pub async fn list_models(State(state): State<SharedState>) -> Result<Json<Value>, GatewayError> {
    let provider_ids: Vec<String> = state
        .db
        .with_conn(|c| crate::db::providers::list(c, None, Some(true)))?
        .into_iter()
        .map(|p| p.id)
        .collect();

    let mut data = Vec::new();
    for provider_id in provider_ids {
        let Ok(provider) = state.registry.get_or_build(&state.db, &provider_id) else { continue };
        match provider.list_models().await {
            Ok(models) => data.extend(models.into_iter().map(|m| json!({
                "id": m.id, "object": "model", "owned_by": m.owned_by, "metadata": m.metadata,
            }))),
            Err(e) => warn!(provider = %provider_id, error = %e, "list_models failed"),
        }
    }

    Ok(Json(json!({"object": "list", "data": data})))
}

/// `GET /v1/models/:id`.
pub async fn get_model(State(state): State<SharedState>, Path(id): Path<String>) -> Result<Json<Value>, GatewayError> {
    let Json(list) = list_models(State(state)).await?;
    let found = list["data"].as_array().and_then(|items| items.iter().find(|m| m["id"] == id).cloned());
    found.map(Json).ok_or_else(|| GatewayError::not_found(format!("no model `{id}`")))
}

/// `GET /health` — liveness for `G` itself (§6.2).
pub async fn health(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({"status": "ok", "uptime_secs": state.started_at.elapsed().as_secs()}))
}

/// `GET /metrics` — plain-text operational counters (§6.2).
pub async fn metrics(State(state): State<SharedState>) -> String {
    let m = &state.metrics;
    format!(
        "requests_total {}\nrequests_in_flight {}\nprovider_errors_total {}\nconnection_errors_total {}\nrequest_errors_total {}\n",
        m.requests_total.load(Ordering::Relaxed),
        m.requests_in_flight.load(Ordering::Relaxed),
        m.provider_errors.load(Ordering::Relaxed),
        m.connection_errors.load(Ordering::Relaxed),
        m.request_errors.load(Ordering::Relaxed),
    )
}
