//! Session repository (§3, §4.3).

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub chat_id: Option<String>,
    pub parent_id: Option<String>,
    pub first_user_message: String,
    pub message_count: i64,
    pub created_at: i64,
    pub last_accessed: i64,
    pub expires_at: i64,
}

pub fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<Session>> {
    conn.query_row(
        "SELECT id, chat_id, parent_id, first_user_message, message_count, created_at, last_accessed, expires_at
         FROM sessions WHERE id = ?1",
        params![id],
        row_to_session,
    )
    .optional()
}

pub fn create(conn: &Connection, id: &str, first_user_message: &str, chat_id: Option<&str>, now: i64, ttl_ms: i64) -> rusqlite::Result<Session> {
    let expires_at = now + ttl_ms;
    conn.execute(
        "INSERT INTO sessions (id, chat_id, parent_id, first_user_message, message_count, created_at, last_accessed, expires_at)
         VALUES (?1, ?2, NULL, ?3, 0, ?4, ?4, ?5)",
        params![id, chat_id, first_user_message, now, expires_at],
    )?;
    Ok(Session {
        id: id.to_string(),
        chat_id: chat_id.map(String::from),
        parent_id: None,
        first_user_message: first_user_message.to_string(),
        message_count: 0,
        created_at: now,
        last_accessed: now,
        expires_at,
    })
}

/// Record a completed turn: bump `message_count`/`last_accessed`/`expires_at`
/// and set `parent_id` when the upstream returned a new message id (§4.3).
pub fn record_turn(conn: &Connection, id: &str, parent_id: Option<&str>, now: i64, ttl_ms: i64) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE sessions SET message_count = message_count + 1, last_accessed = ?2, expires_at = ?3,
             parent_id = COALESCE(?4, parent_id)
         WHERE id = ?1",
        params![id, now, now + ttl_ms, parent_id],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    Ok(conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])? > 0)
}

pub fn delete_all(conn: &Connection) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM sessions", [])
}

/// Delete expired sessions in batches of ≤1000 so a large sweep stays
/// in bounded memory (§4.3, §8 boundary behaviour). Returns the total
/// number of rows deleted.
pub fn sweep_expired(conn: &Connection, now: i64) -> rusqlite::Result<usize> {
    let mut total = 0;
    loop {
        let ids: Vec<String> = {
            let mut stmt = conn.prepare("SELECT id FROM sessions WHERE expires_at < ?1 LIMIT 1000")?;
            stmt.query_map(params![now], |r| r.get(0))?.collect::<rusqlite::Result<_>>()?
        };
        if ids.is_empty() {
            break;
        }
        let batch_len = ids.len();
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("DELETE FROM sessions WHERE id IN ({placeholders})");
        let params: Vec<&dyn rusqlite::ToSql> = ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
        conn.execute(&sql, params.as_slice())?;
        total += batch_len;
        if batch_len < 1000 {
            break;
        }
    }
    Ok(total)
}

pub fn list(conn: &Connection, limit: i64, offset: i64) -> rusqlite::Result<Vec<Session>> {
    let mut stmt = conn.prepare(
        "SELECT id, chat_id, parent_id, first_user_message, message_count, created_at, last_accessed, expires_at
         FROM sessions ORDER BY last_accessed DESC LIMIT ?1 OFFSET ?2",
    )?;
    let rows = stmt.query_map(params![limit, offset], row_to_session)?;
    rows.collect()
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        parent_id: row.get(2)?,
        first_user_message: row.get(3)?,
        message_count: row.get(4)?,
        created_at: row.get(5)?,
        last_accessed: row.get(6)?,
        expires_at: row.get(7)?,
    })
}
