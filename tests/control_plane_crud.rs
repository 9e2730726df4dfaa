//! Control plane REST surface (§6.1): CRUD round-trips, idempotence, and
//! pagination boundaries, plus the push channel (§4.6, scenario 6).

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use llm_gateway::config::Config;
use llm_gateway::control_plane;
use llm_gateway::db::Db;
use llm_gateway::providers::ProviderRegistry;
use llm_gateway::supervisor::ChildSupervisor;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

async fn start_control_plane(db: Arc<Db>) -> std::net::SocketAddr {
    let mut config = Config::default();
    config.server.control_plane_port = 0;
    let registry = Arc::new(ProviderRegistry::new());
    let supervisor = Arc::new(ChildSupervisor::new(PathBuf::from("/nonexistent/bridge"), PathBuf::from("/nonexistent/gateway"), config.clone()));
    control_plane::start(db, registry, supervisor, config).await.unwrap().addr
}

/// Round-trip law (§8): create a provider with config C, `GET .../config`
/// returns C back unmasked.
#[tokio::test]
async fn provider_config_round_trips_unmasked() {
    let tmp = tempfile::tempdir().unwrap();
    let db = Arc::new(Db::open(&tmp.path().join("t.sqlite3")).unwrap());
    let addr = start_control_plane(db).await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}/api");

    let created = client
        .post(format!("{base}/providers"))
        .json(&json!({"id": "p1", "name": "Provider One", "type": "local-openai-compatible", "priority": 0}))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 200);

    let put = client
        .put(format!("{base}/providers/p1/config"))
        .json(&json!({"key": "baseURL", "value": "http://localhost:9000/v1", "is_sensitive": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(put.status(), 200);

    let got = client.get(format!("{base}/providers/p1/config?mask=false")).send().await.unwrap();
    assert_eq!(got.status(), 200);
    let body: serde_json::Value = got.json().await.unwrap();
    let entries = body["config"].as_array().unwrap();
    let base_url = entries.iter().find(|e| e["key"] == "baseURL").unwrap();
    assert_eq!(base_url["value"], "http://localhost:9000/v1");
}

/// §8 round-trip: set a setting, read it back, delete it, then a further
/// read 404s.
#[tokio::test]
async fn setting_round_trips_then_404s_after_delete() {
    let tmp = tempfile::tempdir().unwrap();
    let db = Arc::new(Db::open(&tmp.path().join("t.sqlite3")).unwrap());
    let addr = start_control_plane(db).await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}/api");

    let put = client.put(format!("{base}/settings/active_provider")).json(&json!({"value": "p1"})).send().await.unwrap();
    assert_eq!(put.status(), 200);

    let got = client.get(format!("{base}/settings/active_provider")).send().await.unwrap();
    assert_eq!(got.status(), 200);
    let body: serde_json::Value = got.json().await.unwrap();
    assert_eq!(body["value"], "p1");

    let deleted = client.delete(format!("{base}/settings/active_provider")).send().await.unwrap();
    assert_eq!(deleted.status(), 200);

    let missing = client.get(format!("{base}/settings/active_provider")).send().await.unwrap();
    assert_eq!(missing.status(), 404);
}

/// §8 idempotence: enabling an already-enabled provider is a no-op, not
/// an error.
#[tokio::test]
async fn enabling_an_enabled_provider_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let db = Arc::new(Db::open(&tmp.path().join("t.sqlite3")).unwrap());
    let addr = start_control_plane(db).await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}/api");

    client
        .post(format!("{base}/providers"))
        .json(&json!({"id": "p1", "name": "Provider One", "type": "local-openai-compatible", "priority": 0}))
        .send()
        .await
        .unwrap();

    let first = client.post(format!("{base}/providers/p1/enable")).send().await.unwrap();
    assert_eq!(first.status(), 200);
    let second = client.post(format!("{base}/providers/p1/enable")).send().await.unwrap();
    assert_eq!(second.status(), 200);
    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body["enabled"], true);
}

/// §6.1 boundary: `limit` above 1000 is a validation error, not silently clamped.
#[tokio::test]
async fn pagination_limit_above_max_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let db = Arc::new(Db::open(&tmp.path().join("t.sqlite3")).unwrap());
    let addr = start_control_plane(db).await;

    let resp = reqwest::Client::new()
        .get(format!("http://{addr}/api/requests?limit=5000"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

/// Scenario 6: two WebSocket subscribers observe `providers:updated`
/// events in commit order.
#[tokio::test]
async fn websocket_subscribers_observe_events_in_commit_order() {
    let tmp = tempfile::tempdir().unwrap();
    let db = Arc::new(Db::open(&tmp.path().join("t.sqlite3")).unwrap());
    let addr = start_control_plane(db).await;

    let (mut ws_a, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let (mut ws_b, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await.unwrap();

    // Both sockets receive an initial proxy:status snapshot on connect.
    let _ = ws_a.next().await.unwrap().unwrap();
    let _ = ws_b.next().await.unwrap().unwrap();

    let client = reqwest::Client::new();
    let base = format!("http://{addr}/api");
    client
        .post(format!("{base}/providers"))
        .json(&json!({"id": "p1", "name": "Provider One", "type": "local-openai-compatible", "priority": 0}))
        .send()
        .await
        .unwrap();
    client.delete(format!("{base}/providers/p1")).send().await.unwrap();

    let events_a = next_n_provider_events(&mut ws_a, 2).await;
    let events_b = next_n_provider_events(&mut ws_b, 2).await;

    assert_eq!(events_a, vec!["created".to_string(), "deleted".to_string()]);
    assert_eq!(events_b, vec!["created".to_string(), "deleted".to_string()]);
}

async fn next_n_provider_events(ws: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin), n: usize) -> Vec<String> {
    let mut actions = Vec::new();
    while actions.len() < n {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
                if parsed["type"] == "providers:updated" {
                    actions.push(parsed["action"].as_str().unwrap().to_string());
                }
            }
            Some(Ok(_)) => continue,
            _ => break,
        }
    }
    actions
}
