//! Provider registry & adapters (§4.1): hold live provider instances,
//! build them from database rows, expose a uniform
//! `{chatCompletion, listModels, test}` capability set.

pub mod openai_compat;
pub mod tool_normalize;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{providers as providers_repo, Db};

pub use openai_compat::OpenAiCompatProvider;
pub use tool_normalize::normalize_tools;

/// A single chat message (teacher's `ChatMessage`, generalised with
/// `tool_calls`/`tool_call_id` already on it since both the gateway
/// router and the web-chat bridge need to round-trip them).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Option<Vec<Value>>,
    pub temperature: Option<f64>,
    /// Upstream continuity data the web-chat bridge needs; generic
    /// HTTP providers ignore it.
    pub chat_id: Option<String>,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub message: ChatMessage,
    pub finish_reason: String,
    pub usage: Option<TokenUsage>,
    /// Raw upstream message id, when the provider exposes one (used as
    /// the next `parent_id` by the web-chat bridge, §4.3/§4.4).
    pub upstream_message_id: Option<String>,
    /// Raw upstream JSON, kept only so the caller can optionally persist
    /// it as `provider_response` for a unary request.
    pub raw: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub owned_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderTestResult {
    pub ok: bool,
    pub latency_ms: u64,
    pub message: String,
}

/// Error classification (§4.1, §7): whether the upstream responded,
/// the connection failed, or the request never left.
#[derive(Debug, Clone)]
pub enum ProviderError {
    Provider { status: u16, message: String },
    Connection { code: String, message: String },
    Request { message: String },
}

impl ProviderError {
    pub fn message(&self) -> &str {
        match self {
            ProviderError::Provider { message, .. } => message,
            ProviderError::Connection { message, .. } => message,
            ProviderError::Request { message } => message,
        }
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}
impl std::error::Error for ProviderError {}

pub type ChunkStream<'a> = Pin<Box<dyn Stream<Item = Result<Value, ProviderError>> + Send + 'a>>;

#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError>;

    fn chat_completion_stream<'a>(&'a self, request: &'a ChatRequest) -> ChunkStream<'a>;

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, ProviderError>;

    fn as_any(&self) -> &dyn std::any::Any;

    async fn test(&self) -> ProviderTestResult {
        let start = std::time::Instant::now();
        match self.list_models().await {
            Ok(_) => ProviderTestResult { ok: true, latency_ms: start.elapsed().as_millis() as u64, message: "ok".to_string() },
            Err(e) => ProviderTestResult { ok: false, latency_ms: start.elapsed().as_millis() as u64, message: e.to_string() },
        }
    }
}

/// Required config keys per provider `type` (§4.1, §8 invariant: a
/// provider may not be used until its required keys are present).
pub fn required_config_keys(provider_type: &str) -> &'static [&'static str] {
    match provider_type {
        "local-openai-compatible" => &["baseURL"],
        "web-chat-bridge" => &["baseURL"],
        "hosted-openai-compatible" => &["baseURL"],
        _ => &[],
    }
}

pub fn validate_config(provider_type: &str, config: &HashMap<String, String>) -> Result<(), String> {
    for key in required_config_keys(provider_type) {
        if !config.contains_key(*key) {
            return Err(format!("provider type `{provider_type}` requires config key `{key}`"));
        }
    }
    Ok(())
}

/// Builds and caches live provider instances from database rows.
/// Lazily instantiates on first use; a CRUD mutation calls
/// [`ProviderRegistry::invalidate`] so the next use rebuilds (§4.1).
pub struct ProviderRegistry {
    cache: Mutex<HashMap<String, Arc<dyn ModelProvider>>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self { cache: Mutex::new(HashMap::new()) }
    }

    pub fn invalidate(&self, provider_id: &str) {
        self.cache.lock().expect("provider registry mutex poisoned").remove(provider_id);
    }

    pub fn invalidate_all(&self) {
        self.cache.lock().expect("provider registry mutex poisoned").clear();
    }

    pub fn get_or_build(&self, db: &Db, provider_id: &str) -> anyhow::Result<Arc<dyn ModelProvider>> {
        if let Some(p) = self.cache.lock().expect("provider registry mutex poisoned").get(provider_id) {
            return Ok(p.clone());
        }

        let built = db.with_conn(|conn| {
            let Some(provider) = providers_repo::get(conn, provider_id)? else {
                return Ok(None);
            };
            let config = providers_repo::get_config(conn, provider_id)?;
            Ok(Some((provider, config)))
        })?;

        let Some((provider, config)) = built else {
            anyhow::bail!("no provider with id `{provider_id}`");
        };

        let config_map: HashMap<String, String> = config.into_iter().map(|e| (e.key, e.value)).collect();
        validate_config(&provider.kind, &config_map).map_err(anyhow::Error::msg)?;

        let instance: Arc<dyn ModelProvider> = build_provider(&provider.id, &provider.kind, &config_map)?;
        self.cache.lock().expect("provider registry mutex poisoned").insert(provider_id.to_string(), instance.clone());
        Ok(instance)
    }
}

fn build_provider(id: &str, kind: &str, config: &HashMap<String, String>) -> anyhow::Result<Arc<dyn ModelProvider>> {
    let base_url = config.get("baseURL").cloned().unwrap_or_default();
    let api_key = config.get("apiKey").cloned();
    let default_model = config.get("defaultModel").cloned();
    let timeout_ms: u64 = config.get("timeout").and_then(|v| v.parse().ok()).unwrap_or(120_000);

    match kind {
        "local-openai-compatible" | "web-chat-bridge" | "hosted-openai-compatible" => {
            Ok(Arc::new(OpenAiCompatProvider::new(id.to_string(), base_url, api_key, default_model, timeout_ms)))
        }
        other => anyhow::bail!("unrecognised provider type `{other}`"),
    }
}

/// Select a provider for `model` per §4.2's ordered rules.
pub fn select_provider_id(
    conn: &rusqlite::Connection,
    model: &str,
) -> rusqlite::Result<Option<String>> {
    let linked = providers_repo::enabled_providers_for_model(conn, model)?;
    if linked.len() == 1 {
        return Ok(Some(linked[0].id.clone()));
    }
    if linked.len() > 1 {
        // Already ordered by priority DESC, id ASC (rule 2's tie-break).
        return Ok(Some(linked[0].id.clone()));
    }
    crate::db::settings::get(conn, "active_provider")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_config_requires_base_url() {
        let empty = HashMap::new();
        assert!(validate_config("local-openai-compatible", &empty).is_err());
        let mut cfg = HashMap::new();
        cfg.insert("baseURL".to_string(), "http://x".to_string());
        assert!(validate_config("local-openai-compatible", &cfg).is_ok());
    }
}
