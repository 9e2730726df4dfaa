//! HTTP client for the upstream web-chat service (§4.4): `create chat`,
//! `send message with parent_id`, `list models`. Grounded on the
//! teacher's `models/copilot.rs` proxy client — bearer + cookie auth,
//! retry on transient transport errors, tolerant JSON extraction.

use std::pin::Pin;
use std::time::Duration;

use futures_core::Stream;
use reqwest::Client;
use serde_json::{json, Value};
use tokio_stream::StreamExt as _;
use tracing::debug;

use crate::db::credentials::Credentials;
use crate::providers::{ChatMessage, ProviderError};
use crate::utils::now_ms;

pub struct UpstreamClient {
    http: Client,
    base_url: String,
}

impl UpstreamClient {
    pub fn new(base_url: String, timeout_ms: u64) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");
        Self { http, base_url: base_url.trim_end_matches('/').to_string() }
    }

    fn authed(&self, builder: reqwest::RequestBuilder, creds: &Credentials) -> reqwest::RequestBuilder {
        builder.bearer_auth(&creds.token).header(reqwest::header::COOKIE, &creds.cookies)
    }

    fn classify(err: reqwest::Error) -> ProviderError {
        ProviderError::Connection { code: "connection_error".to_string(), message: err.to_string() }
    }

    /// `create chat`: allocate a fresh upstream conversation id.
    pub async fn new_chat(&self, creds: &Credentials) -> Result<String, ProviderError> {
        let req = self.authed(self.http.post(format!("{}/api/chat/new", self.base_url)), creds);
        let resp = req.json(&json!({})).send().await.map_err(Self::classify)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Provider { status: status.as_u16(), message: text });
        }
        let body: Value = resp.json().await.map_err(|e| ProviderError::Request { message: e.to_string() })?;
        body.get("chat_id")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| ProviderError::Request { message: "upstream new_chat response missing chat_id".to_string() })
    }

    /// `list models`.
    pub async fn list_models(&self, creds: &Credentials) -> Result<Vec<Value>, ProviderError> {
        let req = self.authed(self.http.get(format!("{}/api/models", self.base_url)), creds);
        let resp = req.send().await.map_err(Self::classify)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Provider { status: status.as_u16(), message: text });
        }
        let body: Value = resp.json().await.map_err(|e| ProviderError::Request { message: e.to_string() })?;
        Ok(body.get("data").and_then(Value::as_array).cloned().unwrap_or_default())
    }

    /// `send message with parent_id`, non-streaming: returns the full
    /// assistant text plus the upstream message id to use as the next
    /// `parent_id` (§4.4 turn algorithm, steps 2-3).
    pub async fn send_message(
        &self,
        creds: &Credentials,
        chat_id: &str,
        parent_id: Option<&str>,
        messages: &[ChatMessage],
    ) -> Result<(String, Option<String>), ProviderError> {
        let latest = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        let body = json!({
            "chat_id": chat_id,
            "parent_id": parent_id,
            "messages": [{"role": "user", "content": latest}],
            "stream": false,
            "incremental_output": true,
            "timestamp": now_ms(),
        });
        let req = self.authed(self.http.post(format!("{}/api/chat/send", self.base_url)), creds);
        let resp = req.json(&body).send().await.map_err(Self::classify)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Provider { status: status.as_u16(), message: text });
        }
        let parsed: Value = resp.json().await.map_err(|e| ProviderError::Request { message: e.to_string() })?;
        let text = parsed.get("content").and_then(Value::as_str).unwrap_or_default().to_string();
        let message_id = parsed.get("message_id").and_then(Value::as_str).map(String::from);
        Ok((text, message_id))
    }

    /// Streaming variant of [`send_message`]: yields `(delta_text,
    /// is_terminal, message_id)` tuples translated from upstream SSE
    /// chunks (§4.4 step 3).
    pub fn send_message_stream<'a>(
        &'a self,
        creds: &'a Credentials,
        chat_id: &'a str,
        parent_id: Option<&'a str>,
        messages: &'a [ChatMessage],
    ) -> Pin<Box<dyn Stream<Item = Result<(String, bool, Option<String>), ProviderError>> + Send + 'a>> {
        let latest = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        Box::pin(async_stream::try_stream! {
            let body = json!({
                "chat_id": chat_id,
                "parent_id": parent_id,
                "messages": [{"role": "user", "content": latest}],
                "stream": true,
                "incremental_output": true,
                "timestamp": now_ms(),
            });
            let req = self.authed(self.http.post(format!("{}/api/chat/send", self.base_url)), creds);
            let resp = req.json(&body).send().await.map_err(Self::classify)?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                Err(ProviderError::Provider { status: status.as_u16(), message: text })?;
                return;
            }

            let mut byte_stream = resp.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk.map_err(Self::classify)?;
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
                    let Ok(value) = serde_json::from_str::<Value>(data) else {
                        debug!(line = %data, "skipping unparsable upstream chunk");
                        continue;
                    };
                    let delta = value.get("content").and_then(Value::as_str).unwrap_or_default().to_string();
                    let is_terminal = value.get("finished").and_then(Value::as_bool).unwrap_or(false);
                    let message_id = value.get("message_id").and_then(Value::as_str).map(String::from);
                    yield (delta, is_terminal, message_id);
                }
            }
        })
    }
}
