//! Provider selection (§4.2) and the gateway's chat-completion surface
//! (§6.2), against a mocked OpenAI-compatible upstream.

use std::sync::Arc;

use llm_gateway::config::Config;
use llm_gateway::db::Db;
use llm_gateway::providers::ProviderRegistry;
use llm_gateway::session::SessionManager;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn start_gateway(db: Arc<Db>, mut config: Config) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    config.server.port = 0;
    let registry = Arc::new(ProviderRegistry::new());
    let sessions = Arc::new(SessionManager::new(db.clone(), config.session.timeout_ms as i64));
    let handle = llm_gateway::gateway::start(db, registry, sessions, config).await.unwrap();
    (handle.addr, handle.task)
}

fn seed_provider(db: &Db, mock_base_url: &str) {
    db.with_conn(|c| {
        llm_gateway::db::providers::create(c, "lm-local", "LM Local", "local-openai-compatible", 0, None)?;
        llm_gateway::db::providers::set_config(c, "lm-local", "baseURL", &format!("{mock_base_url}/v1"), false)?;
        llm_gateway::db::models::create(c, "m1", "Model One", None, &[])?;
        llm_gateway::db::models::link(c, "lm-local", "m1", true)?;
        Ok(())
    })
    .unwrap();
}

/// Scenario 1: unary chat against a local provider.
#[tokio::test]
async fn unary_chat_against_local_provider() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-upstream-1",
            "object": "chat.completion",
            "created": 1,
            "model": "m1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "pong"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4},
        })))
        .mount(&mock)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let db = Arc::new(Db::open(&tmp.path().join("t.sqlite3")).unwrap());
    seed_provider(&db, &mock.uri());

    let (addr, _task) = start_gateway(db.clone(), Config::default()).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&json!({"model": "m1", "messages": [{"role": "user", "content": "ping"}], "stream": false}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "pong");

    let (req_count, resp_count): (i64, i64) = db
        .with_conn(|c| {
            let reqs: i64 = c.query_row("SELECT COUNT(*) FROM requests", [], |r| r.get(0))?;
            let resps: i64 = c.query_row("SELECT COUNT(*) FROM responses", [], |r| r.get(0))?;
            Ok((reqs, resps))
        })
        .unwrap();
    assert_eq!(req_count, 1);
    assert_eq!(resp_count, 1);

    let (request_id, response_request_id, duration_ms): (String, String, i64) = db
        .with_conn(|c| {
            c.query_row(
                "SELECT r.request_id, resp.request_id, resp.duration_ms FROM requests r JOIN responses resp ON resp.request_id = r.request_id",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
        })
        .unwrap();
    assert_eq!(request_id, response_request_id);
    assert!(duration_ms >= 0);
}

/// Scenario 2: streaming chat emits a terminal `[DONE]`.
#[tokio::test]
async fn streaming_chat_emits_done() {
    let mock = MockServer::start().await;
    let sse_body = concat!(
        "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"p\"}}]}\n\n",
        "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ong\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body.as_bytes().to_vec(), "text/event-stream"))
        .mount(&mock)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let db = Arc::new(Db::open(&tmp.path().join("t.sqlite3")).unwrap());
    seed_provider(&db, &mock.uri());

    let (addr, _task) = start_gateway(db.clone(), Config::default()).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&json!({"model": "m1", "messages": [{"role": "user", "content": "ping"}], "stream": true}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap().to_string();
    assert!(content_type.contains("text/event-stream"));

    let body = resp.text().await.unwrap();
    assert!(body.contains("chat.completion.chunk"));
    assert!(body.contains("[DONE]"));

    let finish_reason: String = db
        .with_conn(|c| c.query_row("SELECT finish_reason FROM responses LIMIT 1", [], |r| r.get(0)))
        .unwrap();
    assert_ne!(finish_reason, "error");
}

/// §4.2 routing rule 2: multiple enabled providers linked to the same
/// model tie-break on priority, then id.
#[test]
fn select_provider_id_prefers_higher_priority() {
    let tmp = tempfile::tempdir().unwrap();
    let db = Db::open(&tmp.path().join("t.sqlite3")).unwrap();
    db.with_conn(|c| {
        llm_gateway::db::providers::create(c, "low", "Low", "local-openai-compatible", 0, None)?;
        llm_gateway::db::providers::create(c, "high", "High", "local-openai-compatible", 10, None)?;
        llm_gateway::db::models::create(c, "shared", "Shared", None, &[])?;
        llm_gateway::db::models::link(c, "low", "shared", false)?;
        llm_gateway::db::models::link(c, "high", "shared", false)?;
        Ok(())
    })
    .unwrap();

    let chosen = db.with_conn(|c| llm_gateway::providers::select_provider_id(c, "shared")).unwrap();
    assert_eq!(chosen, Some("high".to_string()));
}

/// §4.2 routing rule 3: falls back to `active_provider` only when no
/// link resolves the model unambiguously.
#[test]
fn select_provider_id_falls_back_to_active_provider_setting() {
    let tmp = tempfile::tempdir().unwrap();
    let db = Db::open(&tmp.path().join("t.sqlite3")).unwrap();
    db.with_conn(|c| {
        llm_gateway::db::providers::create(c, "fallback", "Fallback", "local-openai-compatible", 0, None)?;
        llm_gateway::db::settings::set(c, "active_provider", "fallback")?;
        Ok(())
    })
    .unwrap();

    let chosen = db.with_conn(|c| llm_gateway::providers::select_provider_id(c, "unlinked-model")).unwrap();
    assert_eq!(chosen, Some("fallback".to_string()));
}

/// §8 boundary: no provider for a model is a 400, not a 500.
#[tokio::test]
async fn chat_completions_with_unknown_model_is_validation_error() {
    let tmp = tempfile::tempdir().unwrap();
    let db = Arc::new(Db::open(&tmp.path().join("t.sqlite3")).unwrap());
    let (addr, _task) = start_gateway(db, Config::default()).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&json!({"model": "ghost", "messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
}
