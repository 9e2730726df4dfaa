//! Generic OpenAI-compatible HTTP adapter (§4.1). Used for both
//! `local-openai-compatible`/`hosted-openai-compatible` provider types
//! and, with a `web-chat-bridge` baseURL pointed at the bridge's own
//! `/v1` surface, as the gateway's client for the web-chat session
//! (§4.4) — the wire shape is identical either way.

use std::any::Any;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use reqwest::Client;
use serde_json::{json, Value};
use tokio_stream::StreamExt as _;

use super::{
    ChatMessage, ChatRequest, ChatResponse, ModelDescriptor, ModelProvider, ProviderError,
    TokenUsage,
};

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: Option<String>,
    default_model: Option<String>,
    client: Client,
}

impl OpenAiCompatProvider {
    pub fn new(id: String, base_url: String, api_key: Option<String>, default_model: Option<String>, timeout_ms: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");
        Self { id, base_url: base_url.trim_end_matches('/').to_string(), api_key, default_model, client }
    }

    fn request_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let model = if request.model.is_empty() {
            self.default_model.clone().unwrap_or_default()
        } else {
            request.model.clone()
        };
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                let mut v = json!({"role": m.role, "content": m.content});
                if let Some(tc) = &m.tool_calls {
                    v["tool_calls"] = json!(tc);
                }
                if let Some(id) = &m.tool_call_id {
                    v["tool_call_id"] = json!(id);
                }
                v
            })
            .collect();

        let mut body = json!({"model": model, "messages": messages, "stream": stream});
        if let Some(tools) = &request.tools {
            let normalized = super::normalize_tools(tools);
            if !normalized.is_empty() {
                body["tools"] = json!(normalized);
            }
        }
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        body
    }

    fn build_request(&self, path: &str) -> reqwest::RequestBuilder {
        let req = self.client.post(format!("{}{path}", self.base_url));
        match &self.api_key {
            Some(k) if !k.is_empty() => req.bearer_auth(k),
            _ => req,
        }
    }

    fn classify_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() || err.is_connect() {
            ProviderError::Connection { code: "connection_error".to_string(), message: err.to_string() }
        } else {
            ProviderError::Request { message: err.to_string() }
        }
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = self.request_body(request, false);
        let resp = self
            .build_request("/chat/completions")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Connection { code: "connection_error".to_string(), message: e.to_string() })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Provider { status: status.as_u16(), message: text });
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Request { message: format!("invalid JSON from {}: {e}", self.id) })?;

        let choice = &json["choices"][0];
        let message = ChatMessage {
            role: choice["message"]["role"].as_str().unwrap_or("assistant").to_string(),
            content: choice["message"]["content"].as_str().unwrap_or("").to_string(),
            tool_calls: choice["message"]["tool_calls"].as_array().cloned(),
            tool_call_id: None,
        };
        let usage = json.get("usage").map(|u| TokenUsage {
            prompt_tokens: u["prompt_tokens"].as_i64().unwrap_or(0),
            completion_tokens: u["completion_tokens"].as_i64().unwrap_or(0),
            total_tokens: u["total_tokens"].as_i64().unwrap_or(0),
        });

        Ok(ChatResponse {
            message,
            finish_reason: choice["finish_reason"].as_str().unwrap_or("stop").to_string(),
            usage,
            upstream_message_id: json["id"].as_str().map(String::from),
            raw: json,
        })
    }

    fn chat_completion_stream<'a>(&'a self, request: &'a ChatRequest) -> super::ChunkStream<'a> {
        let body = self.request_body(request, true);
        Box::pin(async_stream::try_stream! {
            let resp = self.build_request("/chat/completions").json(&body).send().await
                .map_err(|e| ProviderError::Connection { code: "connection_error".to_string(), message: e.to_string() })?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                Err(ProviderError::Provider { status: status.as_u16(), message: text })?;
                return;
            }

            let mut byte_stream = resp.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk.map_err(|e| ProviderError::Connection { code: "connection_error".to_string(), message: e.to_string() })?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline_pos) = buffer.find('\n') {
                    let line = buffer[..newline_pos].trim_end().to_string();
                    buffer = buffer[newline_pos + 1..].to_string();

                    if line.is_empty() || !line.starts_with("data: ") {
                        continue;
                    }
                    let data = &line[6..];
                    if data == "[DONE]" {
                        return;
                    }
                    if let Ok(value) = serde_json::from_str::<Value>(data) {
                        yield value;
                    }
                }
            }
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, ProviderError> {
        let req = self.client.get(format!("{}/models", self.base_url));
        let req = match &self.api_key {
            Some(k) if !k.is_empty() => req.bearer_auth(k),
            _ => req,
        };
        let resp = req.send().await.map_err(|e| self.classify_error(e))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Provider { status: status.as_u16(), message: text });
        }
        let json: Value = resp.json().await.map_err(|e| ProviderError::Request { message: e.to_string() })?;
        let data = json["data"].as_array().cloned().unwrap_or_default();
        Ok(data
            .into_iter()
            .filter_map(|m| {
                let id = m["id"].as_str()?.to_string();
                Some(ModelDescriptor { id, owned_by: m["owned_by"].as_str().unwrap_or(&self.id).to_string(), metadata: None })
            })
            .collect())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
