//! Web-chat Credential repository (§3, §4.4): process-wide singleton
//! row guarded by the database, upserted on every `POST`.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::utils::now_secs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub token: String,
    pub cookies: String,
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Credentials {
    pub fn is_valid(&self, now: i64) -> bool {
        !self.token.is_empty() && !self.cookies.is_empty() && self.expires_at.map(|exp| exp > now).unwrap_or(true)
    }

    /// First 20 chars of the token, for logging without leaking it.
    pub fn token_preview(&self) -> String {
        crate::utils::truncate_str(&self.token, 20)
    }

    pub fn first_cookie_name(&self) -> Option<String> {
        self.cookies.split(';').next().and_then(|kv| kv.split('=').next()).map(|s| s.trim().to_string())
    }
}

pub fn get(conn: &Connection) -> rusqlite::Result<Option<Credentials>> {
    conn.query_row(
        "SELECT token, cookies, expires_at, created_at, updated_at FROM credentials WHERE id = 1",
        [],
        row_to_credentials,
    )
    .optional()
}

/// Upsert the singleton row. Pushing the same credentials twice yields
/// one row (§8 idempotence).
pub fn set(conn: &Connection, token: &str, cookies: &str, expires_at: Option<i64>) -> rusqlite::Result<Credentials> {
    let now = now_secs();
    let created_at = get(conn)?.map(|c| c.created_at).unwrap_or(now);
    conn.execute(
        "INSERT INTO credentials (id, token, cookies, expires_at, created_at, updated_at)
         VALUES (1, ?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET token=excluded.token, cookies=excluded.cookies,
             expires_at=excluded.expires_at, updated_at=excluded.updated_at",
        params![token, cookies, expires_at, created_at, now],
    )?;
    Ok(Credentials { token: token.to_string(), cookies: cookies.to_string(), expires_at, created_at, updated_at: now })
}

pub fn delete(conn: &Connection) -> rusqlite::Result<bool> {
    Ok(conn.execute("DELETE FROM credentials WHERE id = 1", [])? > 0)
}

fn row_to_credentials(row: &rusqlite::Row) -> rusqlite::Result<Credentials> {
    Ok(Credentials {
        token: row.get(0)?,
        cookies: row.get(1)?,
        expires_at: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    #[test]
    fn set_twice_is_single_row() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Db::open(&tmp.path().join("t.sqlite3")).unwrap();
        db.with_conn(|c| {
            set(c, "tok1", "session=a", Some(now_secs() + 3600)).unwrap();
            set(c, "tok2", "session=b", Some(now_secs() + 7200)).unwrap();
            let count: i64 = c.query_row("SELECT COUNT(*) FROM credentials", [], |r| r.get(0)).unwrap();
            assert_eq!(count, 1);
            let creds = get(c).unwrap().unwrap();
            assert_eq!(creds.token, "tok2");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn expired_credentials_are_invalid() {
        let creds = Credentials { token: "t".into(), cookies: "c".into(), expires_at: Some(now_secs() - 1), created_at: 0, updated_at: 0 };
        assert!(!creds.is_valid(now_secs()));
    }

    #[test]
    fn null_expiry_never_expires() {
        let creds = Credentials { token: "t".into(), cookies: "c".into(), expires_at: None, created_at: 0, updated_at: 0 };
        assert!(creds.is_valid(now_secs()));
    }
}
