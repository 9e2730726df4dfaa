//! Session identity and continuity (§4.3, §8).

use std::sync::Arc;

use llm_gateway::config::Config;
use llm_gateway::db::Db;
use llm_gateway::providers::ProviderRegistry;
use llm_gateway::session::SessionManager;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn start_gateway(db: Arc<Db>) -> std::net::SocketAddr {
    let mut config = Config::default();
    config.server.port = 0;
    let registry = Arc::new(ProviderRegistry::new());
    let sessions = Arc::new(SessionManager::new(db.clone(), config.session.timeout_ms as i64));
    llm_gateway::gateway::start(db, registry, sessions, config).await.unwrap().addr
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

/// `Session.id = MD5_hex(first_user_message)`, stable across calls.
#[test]
fn derive_id_matches_md5_of_first_message() {
    let expected = llm_gateway::utils::md5_hex("hi");
    let derived = SessionManager::derive_id(None, "hi");
    assert_eq!(derived, expected);
    assert_eq!(derived.len(), 32);
}

/// Scenario 3: two turns with the same first user message share one
/// Session row and its message count advances.
#[tokio::test]
async fn session_continuity_across_turns() {
    let mock = MockServer::start().await;
    Mock::given(method("POST")).and(path("/v1/chat/completions")).respond_with(
        ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1,
            "model": "m1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "first"}, "finish_reason": "stop"}],
        })),
    ).up_to_n_times(1).mount(&mock).await;
    Mock::given(method("POST")).and(path("/v1/chat/completions")).respond_with(
        ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-2",
            "object": "chat.completion",
            "created": 2,
            "model": "m1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "second"}, "finish_reason": "stop"}],
        })),
    ).mount(&mock).await;

    let tmp = tempfile::tempdir().unwrap();
    let db = Arc::new(Db::open(&tmp.path().join("t.sqlite3")).unwrap());
    seed_provider(&db, &mock.uri());
    let addr = start_gateway(db.clone()).await;

    let client = reqwest::Client::new();
    for _ in 0..2 {
        let resp = client
            .post(format!("http://{addr}/v1/chat/completions"))
            .json(&json!({"model": "m1", "messages": [{"role": "user", "content": "hi"}], "stream": false}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let session_count: i64 = db.with_conn(|c| c.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))).unwrap();
    assert_eq!(session_count, 1);

    let message_count: i64 = db.with_conn(|c| c.query_row("SELECT message_count FROM sessions", [], |r| r.get(0))).unwrap();
    assert_eq!(message_count, 2);
}

/// §8 invariant: `expires_at >= last_accessed` always holds after a turn.
#[tokio::test]
async fn session_expiry_never_precedes_last_access() {
    let tmp = tempfile::tempdir().unwrap();
    let db = Arc::new(Db::open(&tmp.path().join("t.sqlite3")).unwrap());
    let sessions = SessionManager::new(db.clone(), 60_000);
    let id = SessionManager::derive_id(None, "hello");
    sessions.get_or_create(&id, "hello", None).unwrap();
    sessions.record_turn(&id, None).unwrap();

    let (expires_at, last_accessed): (i64, i64) = db
        .with_conn(|c| c.query_row("SELECT expires_at, last_accessed FROM sessions WHERE id = ?1", rusqlite::params![id], |r| Ok((r.get(0)?, r.get(1)?))))
        .unwrap();
    assert!(expires_at >= last_accessed);
}

/// The per-session lock serialises concurrent turns (§5) rather than
/// letting them interleave.
#[tokio::test]
async fn acquire_serialises_turns_on_the_same_session() {
    let tmp = tempfile::tempdir().unwrap();
    let db = Arc::new(Db::open(&tmp.path().join("t.sqlite3")).unwrap());
    let sessions = Arc::new(SessionManager::new(db, 60_000));
    let id = "shared-session";

    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for i in 0..3 {
        let sessions = sessions.clone();
        let order = order.clone();
        handles.push(tokio::spawn(async move {
            let _guard = sessions.acquire(id).await;
            order.lock().unwrap().push(i);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
    assert_eq!(order.lock().unwrap().len(), 3);
}
