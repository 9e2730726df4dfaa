//! Shared SSE streaming plumbing (§4.2, §5) for the gateway and bridge
//! `handle_streaming` handlers.
//!
//! `async_stream::stream!` generators only run the code after their last
//! `yield` once the consumer keeps polling to the end. A client that
//! disconnects mid-stream makes axum drop the response body, which drops
//! the generator without ever reaching that tail — so the usual
//! end-of-stream persistence never runs. [`DisconnectGuard`] catches that
//! case: armed for the lifetime of the generator, its `Drop` impl
//! persists a `cancelled` response row if the normal path never disarmed
//! it first.

use std::sync::Arc;

use tracing::warn;

use crate::db::requests::{self, NewResponse};
use crate::db::Db;
use crate::utils::now_ms;

pub struct DisconnectGuard {
    db: Arc<Db>,
    request_id: String,
    session_id: String,
    model: String,
    started: i64,
    armed: bool,
}

impl DisconnectGuard {
    pub fn new(db: Arc<Db>, request_id: String, session_id: String, model: String, started: i64) -> Self {
        Self { db, request_id, session_id, model, started, armed: true }
    }

    /// Call once the generator has reached its own end-of-stream
    /// persistence, so the drop glue below becomes a no-op.
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let openai_response = serde_json::json!({
            "model": self.model,
            "choices": [{"index": 0, "message": {"role": "assistant", "content": ""}, "finish_reason": "cancelled"}],
        });
        let result = self.db.with_conn(|c| {
            requests::insert_response(
                c,
                &NewResponse {
                    response_id: format!("resp_{}", uuid::Uuid::new_v4().simple()),
                    request_id: self.request_id.clone(),
                    session_id: self.session_id.clone(),
                    provider_response: None,
                    openai_response: openai_response.to_string(),
                    parent_id: None,
                    prompt_tokens: None,
                    completion_tokens: None,
                    total_tokens: None,
                    finish_reason: Some("cancelled".to_string()),
                    error: Some("client_disconnected".to_string()),
                    duration_ms: now_ms() - self.started,
                },
            )
        });
        if let Err(e) = result {
            warn!(error = %e, "failed to persist cancelled streaming response");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropping_an_armed_guard_persists_a_cancelled_response() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Arc::new(Db::open(&tmp.path().join("t.sqlite3")).unwrap());
        db.with_conn(|c| {
            requests::insert_request(
                c,
                &requests::RequestRow {
                    request_id: "req_1".to_string(),
                    session_id: "sess_1".to_string(),
                    timestamp: now_ms(),
                    method: "POST".to_string(),
                    path: "/v1/chat/completions".to_string(),
                    openai_request: "{}".to_string(),
                    provider_request: None,
                    model: Some("gpt-test".to_string()),
                    stream: true,
                },
            )
        })
        .unwrap();

        {
            let _guard = DisconnectGuard::new(db.clone(), "req_1".to_string(), "sess_1".to_string(), "gpt-test".to_string(), now_ms());
        }

        let responses = db.with_conn(|c| requests::list_responses(c, 10, 0)).unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].finish_reason.as_deref(), Some("cancelled"));
    }

    #[test]
    fn disarming_before_drop_skips_persistence() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Arc::new(Db::open(&tmp.path().join("t.sqlite3")).unwrap());
        db.with_conn(|c| {
            requests::insert_request(
                c,
                &requests::RequestRow {
                    request_id: "req_1".to_string(),
                    session_id: "sess_1".to_string(),
                    timestamp: now_ms(),
                    method: "POST".to_string(),
                    path: "/v1/chat/completions".to_string(),
                    openai_request: "{}".to_string(),
                    provider_request: None,
                    model: Some("gpt-test".to_string()),
                    stream: true,
                },
            )
        })
        .unwrap();

        {
            let mut guard = DisconnectGuard::new(db.clone(), "req_1".to_string(), "sess_1".to_string(), "gpt-test".to_string(), now_ms());
            guard.disarm();
        }

        let responses = db.with_conn(|c| requests::list_responses(c, 10, 0)).unwrap();
        assert!(responses.is_empty());
    }
}
