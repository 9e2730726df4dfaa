//! Persistence layer (§4.5): single SQLite file, WAL journaling,
//! foreign keys enforced, versioned forward-only migrations.
//!
//! [`Db`] wraps the one writer connection a process is allowed to hold
//! open, guarded by a [`Mutex`] the way the teacher's `MemoryStore`
//! guards its own `Connection`. Short-lived reader connections (for
//! concurrent reads under WAL) are opened ad hoc via [`Db::read_conn`].

pub mod credentials;
pub mod models;
pub mod providers;
pub mod requests;
pub mod schema;
pub mod sessions;
pub mod settings;

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context as _;
use rusqlite::{Connection, ErrorCode};

pub struct Db {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl Db {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create data dir: {}", parent.display()))?;
        }

        let conn = Connection::open(path).with_context(|| format!("open database: {}", path.display()))?;
        configure_connection(&conn)?;
        schema::migrate(&conn)?;

        Ok(Self { path: path.to_path_buf(), conn: Mutex::new(conn) })
    }

    /// Run `f` with the single writer connection locked. A `SQLITE_BUSY`
    /// that survives the connection's own `busy_timeout` pragma is retried
    /// a bounded number of times with backoff before it is surfaced.
    pub fn with_conn<T>(&self, f: impl Fn(&Connection) -> rusqlite::Result<T>) -> rusqlite::Result<T> {
        let mut backoff = Duration::from_millis(25);
        for attempt in 0..BUSY_RETRY_ATTEMPTS {
            let conn = self.conn.lock().expect("db connection mutex poisoned");
            match f(&conn) {
                Ok(v) => return Ok(v),
                Err(e) if is_busy(&e) && attempt + 1 < BUSY_RETRY_ATTEMPTS => {
                    drop(conn);
                    std::thread::sleep(backoff);
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("loop always returns on its last attempt")
    }

    /// Open a short-lived reader connection. WAL allows these to run
    /// concurrently with the writer.
    pub fn read_conn(&self) -> anyhow::Result<Connection> {
        let conn = Connection::open(&self.path).with_context(|| format!("open reader: {}", self.path.display()))?;
        configure_connection(&conn)?;
        Ok(conn)
    }
}

const BUSY_RETRY_ATTEMPTS: u32 = 3;

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::DatabaseBusy)
}

fn configure_connection(conn: &Connection) -> anyhow::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL").context("set journal_mode=WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON").context("set foreign_keys=ON")?;
    conn.busy_timeout(std::time::Duration::from_secs(5)).context("set busy_timeout")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_schema() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Db::open(&tmp.path().join("test.sqlite3")).unwrap();
        let version: i64 = db
            .with_conn(|c| c.query_row("SELECT schema_version FROM metadata", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(version, schema::CURRENT_VERSION);
    }

    #[test]
    fn reopening_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.sqlite3");
        Db::open(&path).unwrap();
        let db2 = Db::open(&path).unwrap();
        let version: i64 = db2
            .with_conn(|c| c.query_row("SELECT schema_version FROM metadata", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(version, schema::CURRENT_VERSION);
    }

    #[test]
    fn is_busy_does_not_match_unrelated_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Db::open(&tmp.path().join("test.sqlite3")).unwrap();
        let err = db.with_conn(|c| c.query_row("SELECT * FROM no_such_table", [], |r| r.get::<_, i64>(0))).unwrap_err();
        assert!(!is_busy(&err));
    }
}
