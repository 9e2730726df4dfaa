//! Setting repository (§3, §6.1).

use rusqlite::{params, Connection, OptionalExtension};

pub fn get(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value FROM settings WHERE key = ?1", params![key], |r| r.get(0)).optional()
}

pub fn set(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        params![key, value],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, key: &str) -> rusqlite::Result<bool> {
    Ok(conn.execute("DELETE FROM settings WHERE key = ?1", params![key])? > 0)
}

/// List settings, optionally filtered by `key` prefix (§6.1 `category`).
pub fn list(conn: &Connection, prefix: Option<&str>) -> rusqlite::Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
    let rows: Vec<(String, String)> = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?.collect::<rusqlite::Result<_>>()?;
    Ok(match prefix {
        Some(p) => rows.into_iter().filter(|(k, _)| k.starts_with(p)).collect(),
        None => rows,
    })
}

pub fn set_bulk(conn: &Connection, entries: &[(String, String)]) -> rusqlite::Result<()> {
    for (k, v) in entries {
        set(conn, k, v)?;
    }
    Ok(())
}

/// Bool-valued setting with a default, used for `persistence.storeStreamChunks` (§9/§11).
pub fn get_bool(conn: &Connection, key: &str, default: bool) -> rusqlite::Result<bool> {
    Ok(get(conn, key)?.map(|v| v == "true" || v == "1").unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    #[test]
    fn set_get_delete_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Db::open(&tmp.path().join("t.sqlite3")).unwrap();
        db.with_conn(|c| {
            set(c, "active_provider", "lm-local").unwrap();
            assert_eq!(get(c, "active_provider").unwrap(), Some("lm-local".to_string()));
            assert!(delete(c, "active_provider").unwrap());
            assert_eq!(get(c, "active_provider").unwrap(), None);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn default_false_when_unset() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Db::open(&tmp.path().join("t.sqlite3")).unwrap();
        db.with_conn(|c| {
            assert!(!get_bool(c, "persistence.storeStreamChunks", false).unwrap());
            Ok(())
        })
        .unwrap();
    }
}
