//! Forward-only schema migrations.
//!
//! Each migration is a single transaction; the version bump is the
//! last statement inside it. On a mismatch with newer code the caller
//! aborts startup rather than silently downgrading — there is no
//! down-migration path by design (§4.5).

use rusqlite::Connection;

pub const CURRENT_VERSION: i64 = 1;

pub fn migrate(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS metadata (schema_version INTEGER NOT NULL);",
    )?;

    let applied: i64 = conn
        .query_row("SELECT schema_version FROM metadata LIMIT 1", [], |r| r.get(0))
        .unwrap_or(0);

    if applied > CURRENT_VERSION {
        anyhow::bail!(
            "database schema version {applied} is newer than this build supports ({CURRENT_VERSION}); refusing to start"
        );
    }

    if applied < 1 {
        migration_001_initial(conn)?;
    }

    Ok(())
}

fn migration_001_initial(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "BEGIN;

        CREATE TABLE providers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            type TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            priority INTEGER NOT NULL DEFAULT 0,
            description TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE provider_configs (
            provider_id TEXT NOT NULL REFERENCES providers(id) ON DELETE CASCADE,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            is_sensitive INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (provider_id, key)
        );

        CREATE TABLE models (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            capabilities TEXT NOT NULL DEFAULT '[]'
        );

        CREATE TABLE provider_models (
            provider_id TEXT NOT NULL REFERENCES providers(id) ON DELETE CASCADE,
            model_id TEXT NOT NULL REFERENCES models(id) ON DELETE CASCADE,
            is_default INTEGER NOT NULL DEFAULT 0,
            config TEXT,
            PRIMARY KEY (provider_id, model_id)
        );

        CREATE TABLE credentials (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            token TEXT NOT NULL,
            cookies TEXT NOT NULL,
            expires_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE sessions (
            id TEXT PRIMARY KEY,
            chat_id TEXT,
            parent_id TEXT,
            first_user_message TEXT NOT NULL,
            message_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            last_accessed INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        );

        CREATE TABLE requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            request_id TEXT NOT NULL UNIQUE,
            session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            timestamp INTEGER NOT NULL,
            method TEXT NOT NULL,
            path TEXT NOT NULL,
            openai_request TEXT NOT NULL,
            provider_request TEXT,
            model TEXT,
            stream INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE responses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            response_id TEXT NOT NULL UNIQUE,
            request_id TEXT NOT NULL UNIQUE REFERENCES requests(request_id) ON DELETE CASCADE,
            session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            provider_response TEXT,
            openai_response TEXT NOT NULL,
            parent_id TEXT,
            prompt_tokens INTEGER,
            completion_tokens INTEGER,
            total_tokens INTEGER,
            finish_reason TEXT,
            error TEXT,
            duration_ms INTEGER NOT NULL
        );

        CREATE INDEX idx_requests_session ON requests(session_id);
        CREATE INDEX idx_responses_session ON responses(session_id);
        CREATE INDEX idx_provider_configs_provider ON provider_configs(provider_id);
        CREATE INDEX idx_provider_models_model ON provider_models(model_id);
        CREATE INDEX idx_sessions_expires_at ON sessions(expires_at);

        DELETE FROM metadata;
        INSERT INTO metadata (schema_version) VALUES (1);

        COMMIT;",
    )?;
    Ok(())
}
