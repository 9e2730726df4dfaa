//! Persistence layer invariants (§4.5, §8): schema versioning, WAL mode,
//! foreign keys, and the request/response cardinality invariant.

use llm_gateway::db::credentials;
use llm_gateway::db::requests::{self, NewResponse, RequestRow};
use llm_gateway::db::{sessions, Db};

#[test]
fn fresh_database_is_stamped_at_current_schema_version() {
    let tmp = tempfile::tempdir().unwrap();
    let db = Db::open(&tmp.path().join("t.sqlite3")).unwrap();
    let version: i64 = db.with_conn(|c| c.query_row("SELECT schema_version FROM metadata", [], |r| r.get(0))).unwrap();
    assert_eq!(version, llm_gateway::db::schema::CURRENT_VERSION);
}

#[test]
fn reopening_an_existing_database_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("t.sqlite3");
    {
        let db = Db::open(&path).unwrap();
        db.with_conn(|c| llm_gateway::db::settings::set(c, "k", "v")).unwrap();
    }
    let db = Db::open(&path).unwrap();
    let value = db.with_conn(|c| llm_gateway::db::settings::get(c, "k")).unwrap();
    assert_eq!(value, Some("v".to_string()));
}

#[test]
fn journal_mode_is_wal_and_foreign_keys_are_enforced() {
    let tmp = tempfile::tempdir().unwrap();
    let db = Db::open(&tmp.path().join("t.sqlite3")).unwrap();
    db.with_conn(|c| {
        let mode: String = c.query_row("PRAGMA journal_mode", [], |r| r.get(0))?;
        assert_eq!(mode.to_lowercase(), "wal");
        let fk: i64 = c.query_row("PRAGMA foreign_keys", [], |r| r.get(0))?;
        assert_eq!(fk, 1);
        Ok(())
    })
    .unwrap();
}

/// §8 invariant: a request row has zero or one response row, matched by
/// `request_id`.
#[test]
fn every_request_has_at_most_one_response() {
    let tmp = tempfile::tempdir().unwrap();
    let db = Db::open(&tmp.path().join("t.sqlite3")).unwrap();
    db.with_conn(|c| {
        sessions::create(c, "s1", "hi", None, 0, 60_000)?;
        requests::insert_request(
            c,
            &RequestRow {
                request_id: "req-1".into(),
                session_id: "s1".into(),
                timestamp: 0,
                method: "POST".into(),
                path: "/v1/chat/completions".into(),
                openai_request: "{}".into(),
                provider_request: None,
                model: Some("m1".into()),
                stream: false,
            },
        )?;
        requests::insert_response(
            c,
            &NewResponse {
                response_id: "resp-1".into(),
                request_id: "req-1".into(),
                session_id: "s1".into(),
                provider_response: None,
                openai_response: "{}".into(),
                parent_id: None,
                prompt_tokens: Some(1),
                completion_tokens: Some(1),
                total_tokens: Some(2),
                finish_reason: Some("stop".into()),
                error: None,
                duration_ms: 5,
            },
        )?;
        Ok(())
    })
    .unwrap();

    // The UNIQUE constraint on responses.request_id makes a second
    // response for the same request a hard error rather than a silent
    // duplicate.
    let second = db.with_conn(|c| {
        requests::insert_response(
            c,
            &NewResponse {
                response_id: "resp-2".into(),
                request_id: "req-1".into(),
                session_id: "s1".into(),
                provider_response: None,
                openai_response: "{}".into(),
                parent_id: None,
                prompt_tokens: None,
                completion_tokens: None,
                total_tokens: None,
                finish_reason: Some("stop".into()),
                error: None,
                duration_ms: 1,
            },
        )
    });
    assert!(second.is_err());
}

/// §8 idempotence: pushing the same credentials twice yields one row.
#[test]
fn credentials_upsert_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let db = Db::open(&tmp.path().join("t.sqlite3")).unwrap();
    db.with_conn(|c| {
        credentials::set(c, "tok-a", "session=a", None)?;
        credentials::set(c, "tok-b", "session=b", None)?;
        let count: i64 = c.query_row("SELECT COUNT(*) FROM credentials", [], |r| r.get(0))?;
        assert_eq!(count, 1);
        Ok(())
    })
    .unwrap();
}
