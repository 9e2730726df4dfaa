//! Request + Response repository (§3, §4.2). Append-only: requests are
//! written once up front, responses once on completion.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRow {
    pub request_id: String,
    pub session_id: String,
    pub timestamp: i64,
    pub method: String,
    pub path: String,
    pub openai_request: String,
    pub provider_request: Option<String>,
    pub model: Option<String>,
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NewResponse {
    pub response_id: String,
    pub request_id: String,
    pub session_id: String,
    pub provider_response: Option<String>,
    pub openai_response: String,
    pub parent_id: Option<String>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub finish_reason: Option<String>,
    pub error: Option<String>,
    pub duration_ms: i64,
}

pub fn insert_request(conn: &Connection, row: &RequestRow) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO requests (request_id, session_id, timestamp, method, path, openai_request, provider_request, model, stream)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            row.request_id,
            row.session_id,
            row.timestamp,
            row.method,
            row.path,
            row.openai_request,
            row.provider_request,
            row.model,
            row.stream as i64,
        ],
    )?;
    Ok(())
}

pub fn insert_response(conn: &Connection, row: &NewResponse) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO responses (response_id, request_id, session_id, provider_response, openai_response,
             parent_id, prompt_tokens, completion_tokens, total_tokens, finish_reason, error, duration_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            row.response_id,
            row.request_id,
            row.session_id,
            row.provider_response,
            row.openai_response,
            row.parent_id,
            row.prompt_tokens,
            row.completion_tokens,
            row.total_tokens,
            row.finish_reason,
            row.error,
            row.duration_ms,
        ],
    )?;
    Ok(())
}

pub fn get_request(conn: &Connection, request_id: &str) -> rusqlite::Result<Option<RequestRow>> {
    conn.query_row(
        "SELECT request_id, session_id, timestamp, method, path, openai_request, provider_request, model, stream
         FROM requests WHERE request_id = ?1",
        params![request_id],
        |row| {
            Ok(RequestRow {
                request_id: row.get(0)?,
                session_id: row.get(1)?,
                timestamp: row.get(2)?,
                method: row.get(3)?,
                path: row.get(4)?,
                openai_request: row.get(5)?,
                provider_request: row.get(6)?,
                model: row.get(7)?,
                stream: row.get::<_, i64>(8)? != 0,
            })
        },
    )
    .optional()
}

pub fn list_requests(conn: &Connection, limit: i64, offset: i64) -> rusqlite::Result<Vec<RequestRow>> {
    let mut stmt = conn.prepare(
        "SELECT request_id, session_id, timestamp, method, path, openai_request, provider_request, model, stream
         FROM requests ORDER BY timestamp DESC LIMIT ?1 OFFSET ?2",
    )?;
    let rows = stmt.query_map(params![limit, offset], |row| {
        Ok(RequestRow {
            request_id: row.get(0)?,
            session_id: row.get(1)?,
            timestamp: row.get(2)?,
            method: row.get(3)?,
            path: row.get(4)?,
            openai_request: row.get(5)?,
            provider_request: row.get(6)?,
            model: row.get(7)?,
            stream: row.get::<_, i64>(8)? != 0,
        })
    })?;
    rows.collect()
}

pub fn count_requests(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM requests", [], |r| r.get(0))
}

pub fn list_responses(conn: &Connection, limit: i64, offset: i64) -> rusqlite::Result<Vec<NewResponse>> {
    let mut stmt = conn.prepare(
        "SELECT response_id, request_id, session_id, provider_response, openai_response, parent_id,
             prompt_tokens, completion_tokens, total_tokens, finish_reason, error, duration_ms
         FROM responses ORDER BY id DESC LIMIT ?1 OFFSET ?2",
    )?;
    let rows = stmt.query_map(params![limit, offset], row_to_response)?;
    rows.collect()
}

pub fn count_responses(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM responses", [], |r| r.get(0))
}

fn row_to_response(row: &rusqlite::Row) -> rusqlite::Result<NewResponse> {
    Ok(NewResponse {
        response_id: row.get(0)?,
        request_id: row.get(1)?,
        session_id: row.get(2)?,
        provider_response: row.get(3)?,
        openai_response: row.get(4)?,
        parent_id: row.get(5)?,
        prompt_tokens: row.get(6)?,
        completion_tokens: row.get(7)?,
        total_tokens: row.get(8)?,
        finish_reason: row.get(9)?,
        error: row.get(10)?,
        duration_ms: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{sessions, Db};

    #[test]
    fn request_has_at_most_one_response() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Db::open(&tmp.path().join("t.sqlite3")).unwrap();
        db.with_conn(|c| {
            sessions::create(c, "s1", "hi", None, 0, 60_000).unwrap();
            insert_request(
                c,
                &RequestRow {
                    request_id: "r1".into(),
                    session_id: "s1".into(),
                    timestamp: 0,
                    method: "POST".into(),
                    path: "/v1/chat/completions".into(),
                    openai_request: "{}".into(),
                    provider_request: None,
                    model: Some("m1".into()),
                    stream: false,
                },
            )
            .unwrap();
            insert_response(
                c,
                &NewResponse {
                    response_id: "resp1".into(),
                    request_id: "r1".into(),
                    session_id: "s1".into(),
                    openai_response: "{}".into(),
                    duration_ms: 5,
                    ..Default::default()
                },
            )
            .unwrap();

            // A second response for the same request_id must fail the UNIQUE constraint.
            let second = insert_response(
                c,
                &NewResponse {
                    response_id: "resp2".into(),
                    request_id: "r1".into(),
                    session_id: "s1".into(),
                    openai_response: "{}".into(),
                    duration_ms: 5,
                    ..Default::default()
                },
            );
            assert!(second.is_err());
            Ok(())
        })
        .unwrap();
    }
}
