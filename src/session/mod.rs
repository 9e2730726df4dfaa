//! Session manager (§4.3, §5): derives session identity, serialises
//! concurrent turns on the same session, and sweeps expired rows.
//!
//! Storage is SQLite-backed (`crate::db::sessions`) rather than the
//! teacher's JSONL-per-session files, but the per-id mutual-exclusion
//! idiom — a keyed lock so two requests for the same id never
//! interleave while unrelated sessions proceed concurrently — carries
//! over directly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::db::{sessions, Db};
use crate::utils::{md5_hex, now_ms};

pub use sessions::Session;

/// Holds a per-session async lock checked out for the duration of one
/// turn. Dropping it releases the lock.
pub type SessionGuard = tokio::sync::OwnedMutexGuard<()>;

pub struct SessionManager {
    db: Arc<Db>,
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    ttl_ms: i64,
}

impl SessionManager {
    pub fn new(db: Arc<Db>, ttl_ms: i64) -> Self {
        Self { db, locks: StdMutex::new(HashMap::new()), ttl_ms }
    }

    /// Derive the session id for an inbound request per §4.3: the MD5
    /// hash of the first user message's content, unless a caller-supplied
    /// id (continuing an existing conversation) is given.
    pub fn derive_id(explicit_id: Option<&str>, first_user_message: &str) -> String {
        explicit_id.map(String::from).unwrap_or_else(|| md5_hex(first_user_message))
    }

    fn lock_for(&self, id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().expect("session lock map poisoned");
        locks.entry(id.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Acquire the per-session lock, serialising concurrent turns on the
    /// same session id (§5 happens-before ordering).
    pub async fn acquire(&self, id: &str) -> SessionGuard {
        self.lock_for(id).lock_owned().await
    }

    pub fn get(&self, id: &str) -> anyhow::Result<Option<Session>> {
        self.db.with_conn(|c| sessions::get(c, id)).map_err(Into::into)
    }

    /// Load an existing session or create a fresh one, returning it. A
    /// session past its idle timeout (§4.3) is treated as absent: its row
    /// is dropped and a fresh session is created in its place rather than
    /// resumed.
    pub fn get_or_create(&self, id: &str, first_user_message: &str, chat_id: Option<&str>) -> anyhow::Result<Session> {
        let now = now_ms();
        self.db
            .with_conn(|c| match sessions::get(c, id)? {
                Some(s) if s.expires_at > now => Ok(s),
                Some(_) => {
                    sessions::delete(c, id)?;
                    sessions::create(c, id, first_user_message, chat_id, now, self.ttl_ms)
                }
                None => sessions::create(c, id, first_user_message, chat_id, now, self.ttl_ms),
            })
            .map_err(Into::into)
    }

    /// Record a completed turn: bumps message_count/expiry and, when the
    /// upstream handed back a new message id, advances `parent_id`.
    pub fn record_turn(&self, id: &str, upstream_message_id: Option<&str>) -> anyhow::Result<()> {
        let now = now_ms();
        self.db.with_conn(|c| sessions::record_turn(c, id, upstream_message_id, now, self.ttl_ms)).map_err(Into::into)
    }

    pub fn delete(&self, id: &str) -> anyhow::Result<bool> {
        self.db.with_conn(|c| sessions::delete(c, id)).map_err(Into::into)
    }

    /// Drop every session row (bridge startup policy, §9/§11: the web
    /// chat's own continuity state doesn't survive a `W` restart, so
    /// neither does ours).
    pub fn clear_all(&self) -> anyhow::Result<usize> {
        self.db.with_conn(sessions::delete_all).map_err(Into::into)
    }

    pub fn list(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<Session>> {
        self.db.with_conn(|c| sessions::list(c, limit, offset)).map_err(Into::into)
    }

    /// Spawn the periodic expired-session sweep. Returns the task handle;
    /// dropping it does not stop the sweep — abort it explicitly on
    /// shutdown if needed.
    pub fn spawn_sweeper(self: &Arc<Self>, interval_ms: u64) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(interval_ms));
            loop {
                ticker.tick().await;
                let now = now_ms();
                match manager.db.with_conn(|c| sessions::sweep_expired(c, now)) {
                    Ok(0) => {}
                    Ok(n) => info!(removed = n, "swept expired sessions"),
                    Err(e) => warn!(error = %e, "session sweep failed"),
                }
                manager.prune_locks();
            }
        })
    }

    /// Drop lock entries nobody else holds a reference to, so the lock
    /// map doesn't grow without bound across a long-lived process.
    fn prune_locks(&self) {
        let mut locks = self.locks.lock().expect("session lock map poisoned");
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        let removed = before - locks.len();
        if removed > 0 {
            debug!(removed, "pruned idle session locks");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn manager() -> (tempfile::TempDir, Arc<SessionManager>) {
        let tmp = tempfile::tempdir().unwrap();
        let db = Arc::new(Db::open(&tmp.path().join("t.sqlite3")).unwrap());
        (tmp, Arc::new(SessionManager::new(db, 60_000)))
    }

    #[test]
    fn derive_id_is_stable_for_same_message() {
        let a = SessionManager::derive_id(None, "hello world");
        let b = SessionManager::derive_id(None, "hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn derive_id_prefers_explicit() {
        let id = SessionManager::derive_id(Some("explicit-id"), "hello world");
        assert_eq!(id, "explicit-id");
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let (_tmp, mgr) = manager();
        let id = SessionManager::derive_id(None, "hi");
        let s1 = mgr.get_or_create(&id, "hi", None).unwrap();
        let s2 = mgr.get_or_create(&id, "hi", None).unwrap();
        assert_eq!(s1.created_at, s2.created_at);
    }

    #[tokio::test]
    async fn get_or_create_replaces_an_expired_session() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Arc::new(Db::open(&tmp.path().join("t.sqlite3")).unwrap());
        let mgr = Arc::new(SessionManager::new(db, 0));
        let id = "expiring-session";
        let first = mgr.get_or_create(id, "hi", None).unwrap();
        // ttl_ms of 0 means the row is already expired by the time the
        // next call checks it.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = mgr.get_or_create(id, "hi again", None).unwrap();
        assert!(second.created_at > first.created_at);
        assert_eq!(second.first_user_message, "hi again");
    }

    #[tokio::test]
    async fn acquire_serialises_same_session() {
        let (_tmp, mgr) = manager();
        let id = "concurrent-session";
        mgr.get_or_create(id, "hi", None).unwrap();

        let order = Arc::new(StdMutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..4 {
            let mgr = mgr.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _guard = mgr.acquire(id).await;
                order.lock().unwrap().push(i);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(order.lock().unwrap().len(), 4);
    }
}
