//! `W`: the web-chat bridge surface (§4.4). Mirrors the gateway's turn
//! algorithm but resolves credentials and drives an `UpstreamClient`
//! instead of the provider registry.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tokio_stream::StreamExt as _;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::credentials;
use crate::db::requests::{self, NewResponse, RequestRow};
use crate::error::GatewayError;
use crate::providers::{ChatMessage, ProviderError};
use crate::session::SessionManager;
use crate::streaming::DisconnectGuard;
use crate::utils::now_ms;

use super::jwt;
use super::SharedState;

fn upstream_error_to_gateway(err: ProviderError) -> GatewayError {
    match err {
        ProviderError::Provider { status, message } => GatewayError::provider("web-chat-bridge", Some(status), message),
        ProviderError::Connection { code, message } => GatewayError::connection("web-chat-bridge", code, message),
        ProviderError::Request { message } => {
            let mut e = GatewayError::provider("web-chat-bridge", None, message);
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
            Ok(ChatMessage {
                role: role.to_string(),
                content: m.get("content").and_then(Value::as_str).unwrap_or("").to_string(),
                tool_calls: None,
                tool_call_id: None,
            })
        })
        .collect()
}

fn first_user_message(messages: &[ChatMessage]) -> String {
    messages.iter().find(|m| m.role == "user").map(|m| m.content.clone()).unwrap_or_default()
}

/// Fetch and validate credentials per §4.4: absent or expired fails
/// `auth_missing` (401) before any upstream call is attempted.
fn require_credentials(state: &SharedState) -> Result<credentials::Credentials, GatewayError> {
    let now = crate::utils::now_secs();
    let creds = state
        .db
        .with_conn(credentials::get)?
        .ok_or_else(|| GatewayError::auth_missing("no web-chat credentials configured"))?;

    if !creds.is_valid(now) {
        return Err(GatewayError::auth_missing("web-chat credentials are missing or expired"));
    }

    if let Some(exp) = jwt::decode_exp_claim(&creds.token) {
        if exp <= now {
            debug!(token_preview = %creds.token_preview(), "jwt exp claim looks expired, trusting stored expiresAt instead");
        }
    }

    Ok(creds)
}

/// `POST /v1/chat/completions` (§4.4).
pub async fn chat_completions(State(state): State<SharedState>, Json(body): Json<Value>) -> Response {
    match handle(state, body).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn handle(state: SharedState, body: Value) -> Result<Response, GatewayError> {
    let creds = require_credentials(&state)?;

    let model = body.get("model").and_then(Value::as_str).unwrap_or("web-chat").to_string();
    let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let messages = parse_messages(&body)?;

    let explicit_session_id = body.get("session_id").and_then(Value::as_str);
    let fum = first_user_message(&messages);
    let session_id = SessionManager::derive_id(explicit_session_id, &fum);
    let _turn_guard = state.sessions.acquire(&session_id).await;

    let existing = state.sessions.get(&session_id).map_err(GatewayError::internal)?;
    let session = match existing {
        Some(s) => s,
        None => {
            let chat_id = state.upstream.new_chat(&creds).await.map_err(upstream_error_to_gateway)?;
            state.sessions.get_or_create(&session_id, &fum, Some(&chat_id)).map_err(GatewayError::internal)?
        }
    };
    let chat_id = session.chat_id.clone().ok_or_else(|| GatewayError::internal(anyhow::anyhow!("session has no chat_id")))?;

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
        return Ok(handle_streaming(state, creds, chat_id, session.parent_id.clone(), messages, model, request_id, session_id, started).await);
    }

    let (text, message_id) = state
        .upstream
        .send_message(&creds, &chat_id, session.parent_id.as_deref(), &messages)
        .await
        .map_err(upstream_error_to_gateway)?;

    state.sessions.record_turn(&session_id, message_id.as_deref()).map_err(GatewayError::internal)?;

    let completion_id = format!("chatcmpl-{}", Uuid::new_v4().simple());
    let openai_response = json!({
        "id": completion_id,
        "object": "chat.completion",
        "created": started / 1000,
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop",
        }],
        "usage": {"prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0},
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
                    provider_response: None,
                    openai_response: openai_response.to_string(),
                    parent_id: message_id.clone(),
                    prompt_tokens: None,
                    completion_tokens: None,
                    total_tokens: None,
                    finish_reason: Some("stop".to_string()),
                    error: None,
                    duration_ms: now_ms() - started,
                },
            )
        })
        .map_err(GatewayError::from)?;

    Ok(Json(openai_response).into_response())
}

#[allow(clippy::too_many_arguments)]
async fn handle_streaming(
    state: SharedState,
    creds: credentials::Credentials,
    chat_id: String,
    parent_id: Option<String>,
    messages: Vec<ChatMessage>,
    model: String,
    request_id: String,
    session_id: String,
    started: i64,
) -> Response {
    let mut disconnect_guard = DisconnectGuard::new(state.db.clone(), request_id.clone(), session_id.clone(), model.clone(), started);

    let stream = async_stream::stream! {
        let completion_id = format!("chatcmpl-{}", Uuid::new_v4().simple());
        let mut content = String::new();
        let mut message_id: Option<String> = None;
        let mut finish_reason = "stop".to_string();
        let mut saw_terminal = false;

        {
            let mut upstream = state.upstream.send_message_stream(&creds, &chat_id, parent_id.as_deref(), &messages);
            loop {
                let next = upstream.next().await;
                match next {
                    Some(Ok((delta, is_terminal, id))) => {
                        if !delta.is_empty() {
                            content.push_str(&delta);
                        }
                        if id.is_some() {
                            message_id = id;
                        }
                        if is_terminal {
                            saw_terminal = true;
                        }
                        let chunk = json!({
                            "id": completion_id,
                            "object": "chat.completion.chunk",
                            "created": started / 1000,
                            "model": model,
                            "choices": [{
                                "index": 0,
                                "delta": {"content": delta},
                                "finish_reason": if is_terminal { Some("stop") } else { None },
                            }],
                        });
                        yield Ok::<Event, Infallible>(Event::default().data(chunk.to_string()));
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "web-chat upstream stream error");
                        finish_reason = "error".to_string();
                        break;
                    }
                    None => break,
                }
            }
        }

        if !saw_terminal && finish_reason != "error" {
            finish_reason = "error".to_string();
        }

        yield Ok(Event::default().data("[DONE]"));
        disconnect_guard.disarm();

        let _ = state.sessions.record_turn(&session_id, message_id.as_deref());

        let openai_response = json!({
            "id": completion_id,
            "object": "chat.completion",
            "created": started / 1000,
            "model": model,
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": finish_reason}],
        });

        let result = state.db.with_conn(|c| {
            requests::insert_response(c, &NewResponse {
                response_id: format!("resp_{}", Uuid::new_v4().simple()),
                request_id: request_id.clone(),
                session_id: session_id.clone(),
                provider_response: None,
                openai_response: openai_response.to_string(),
                parent_id: message_id.clone(),
                prompt_tokens: None,
                completion_tokens: None,
                total_tokens: None,
                finish_reason: Some(finish_reason.clone()),
                error: if finish_reason == "error" { Some("stream_error".to_string()) } else { None },
                duration_ms: now_ms() - started,
            })
        });
        if let Err(e) = result {
            warn!(error = %e, "failed to persist bridge streaming response");
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

/// `GET /v1/models` (§4.4, §6.2) — proxies the upstream model list.
pub async fn list_models(State(state): State<SharedState>) -> Result<Json<Value>, GatewayError> {
    let creds = require_credentials(&state)?;
    let models = state.upstream.list_models(&creds).await.map_err(upstream_error_to_gateway)?;
    Ok(Json(json!({"object": "list", "data": models})))
}

/// `GET /health`.
pub async fn health(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({"status": "ok", "uptime_secs": state.started_at.elapsed().as_secs()}))
}
