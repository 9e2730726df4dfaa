//! Provider + ProviderConfig repository (§3, §6.1).

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::utils::now_ms;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub enabled: bool,
    pub priority: i64,
    pub description: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfigEntry {
    pub key: String,
    pub value: String,
    pub is_sensitive: bool,
}

const ID_PATTERN_MSG: &str = "provider id must match ^[a-z0-9-]+$";

pub fn validate_id(id: &str) -> Result<(), String> {
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        Ok(())
    } else {
        Err(ID_PATTERN_MSG.to_string())
    }
}

pub fn create(conn: &Connection, id: &str, name: &str, kind: &str, priority: i64, description: Option<&str>) -> rusqlite::Result<Provider> {
    let now = now_ms();
    conn.execute(
        "INSERT INTO providers (id, name, type, enabled, priority, description, created_at, updated_at)
         VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?6)",
        params![id, name, kind, priority, description, now],
    )?;
    Ok(Provider {
        id: id.to_string(),
        name: name.to_string(),
        kind: kind.to_string(),
        enabled: true,
        priority,
        description: description.map(String::from),
        created_at: now,
        updated_at: now,
    })
}

pub fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<Provider>> {
    conn.query_row(
        "SELECT id, name, type, enabled, priority, description, created_at, updated_at FROM providers WHERE id = ?1",
        params![id],
        row_to_provider,
    )
    .optional()
}

pub fn list(conn: &Connection, type_filter: Option<&str>, enabled_filter: Option<bool>) -> rusqlite::Result<Vec<Provider>> {
    let mut sql = "SELECT id, name, type, enabled, priority, description, created_at, updated_at FROM providers WHERE 1=1".to_string();
    if type_filter.is_some() {
        sql.push_str(" AND type = ?1");
    }
    if enabled_filter.is_some() {
        sql.push_str(if type_filter.is_some() { " AND enabled = ?2" } else { " AND enabled = ?1" });
    }
    sql.push_str(" ORDER BY priority DESC, id ASC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = match (type_filter, enabled_filter) {
        (Some(t), Some(e)) => stmt.query_map(params![t, e as i64], row_to_provider)?,
        (Some(t), None) => stmt.query_map(params![t], row_to_provider)?,
        (None, Some(e)) => stmt.query_map(params![e as i64], row_to_provider)?,
        (None, None) => stmt.query_map([], row_to_provider)?,
    };
    rows.collect()
}

pub fn update(
    conn: &Connection,
    id: &str,
    name: Option<&str>,
    enabled: Option<bool>,
    priority: Option<i64>,
    description: Option<Option<&str>>,
) -> rusqlite::Result<Option<Provider>> {
    let Some(mut provider) = get(conn, id)? else { return Ok(None) };
    if let Some(name) = name {
        provider.name = name.to_string();
    }
    if let Some(enabled) = enabled {
        provider.enabled = enabled;
    }
    if let Some(priority) = priority {
        provider.priority = priority;
    }
    if let Some(description) = description {
        provider.description = description.map(String::from);
    }
    provider.updated_at = now_ms();

    conn.execute(
        "UPDATE providers SET name=?2, enabled=?3, priority=?4, description=?5, updated_at=?6 WHERE id=?1",
        params![id, provider.name, provider.enabled as i64, provider.priority, provider.description, provider.updated_at],
    )?;
    Ok(Some(provider))
}

pub fn set_enabled(conn: &Connection, id: &str, enabled: bool) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "UPDATE providers SET enabled=?2, updated_at=?3 WHERE id=?1",
        params![id, enabled as i64, now_ms()],
    )?;
    Ok(n > 0)
}

pub fn delete(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let n = conn.execute("DELETE FROM providers WHERE id = ?1", params![id])?;
    Ok(n > 0)
}

fn row_to_provider(row: &rusqlite::Row) -> rusqlite::Result<Provider> {
    Ok(Provider {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: row.get(2)?,
        enabled: row.get::<_, i64>(3)? != 0,
        priority: row.get(4)?,
        description: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

// --- ProviderConfig ---

pub fn get_config(conn: &Connection, provider_id: &str) -> rusqlite::Result<Vec<ProviderConfigEntry>> {
    let mut stmt = conn.prepare("SELECT key, value, is_sensitive FROM provider_configs WHERE provider_id = ?1")?;
    let rows = stmt.query_map(params![provider_id], |row| {
        Ok(ProviderConfigEntry {
            key: row.get(0)?,
            value: row.get(1)?,
            is_sensitive: row.get::<_, i64>(2)? != 0,
        })
    })?;
    rows.collect()
}

pub fn set_config(conn: &Connection, provider_id: &str, key: &str, value: &str, is_sensitive: bool) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO provider_configs (provider_id, key, value, is_sensitive) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(provider_id, key) DO UPDATE SET value=excluded.value, is_sensitive=excluded.is_sensitive",
        params![provider_id, key, value, is_sensitive as i64],
    )?;
    Ok(())
}

pub fn delete_config_key(conn: &Connection, provider_id: &str, key: &str) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "DELETE FROM provider_configs WHERE provider_id = ?1 AND key = ?2",
        params![provider_id, key],
    )?;
    Ok(n > 0)
}

/// Mask sensitive values unless `mask` is false (§6.1).
pub fn mask_config(entries: Vec<ProviderConfigEntry>, mask: bool) -> Vec<ProviderConfigEntry> {
    if !mask {
        return entries;
    }
    entries
        .into_iter()
        .map(|mut e| {
            if e.is_sensitive {
                e.value = "***MASKED***".to_string();
            }
            e
        })
        .collect()
}

/// Find enabled providers linked to `model_id`, highest priority first
/// (§4.2 rule 2's tie-break is applied by the caller via `id` order).
pub fn enabled_providers_for_model(conn: &Connection, model_id: &str) -> rusqlite::Result<Vec<Provider>> {
    let mut stmt = conn.prepare(
        "SELECT p.id, p.name, p.type, p.enabled, p.priority, p.description, p.created_at, p.updated_at
         FROM providers p
         JOIN provider_models pm ON pm.provider_id = p.id
         WHERE pm.model_id = ?1 AND p.enabled = 1
         ORDER BY p.priority DESC, p.id ASC",
    )?;
    let rows = stmt.query_map(params![model_id], row_to_provider)?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    #[test]
    fn create_get_update_delete_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Db::open(&tmp.path().join("t.sqlite3")).unwrap();
        db.with_conn(|c| {
            create(c, "lm-local", "Local LM", "local-openai-compatible", 10, None).unwrap();
            let p = get(c, "lm-local").unwrap().unwrap();
            assert!(p.enabled);

            set_config(c, "lm-local", "baseURL", "http://127.0.0.1:9999/v1", false).unwrap();
            set_config(c, "lm-local", "apiKey", "secret", true).unwrap();
            let cfg = get_config(c, "lm-local").unwrap();
            assert_eq!(cfg.len(), 2);
            let masked = mask_config(cfg.clone(), true);
            assert!(masked.iter().find(|e| e.key == "apiKey").unwrap().value == "***MASKED***");
            let unmasked = mask_config(cfg, false);
            assert_eq!(unmasked.iter().find(|e| e.key == "apiKey").unwrap().value, "secret");

            update(c, "lm-local", None, Some(false), None, None).unwrap();
            assert!(!get(c, "lm-local").unwrap().unwrap().enabled);

            assert!(delete(c, "lm-local").unwrap());
            assert!(get(c, "lm-local").unwrap().is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn validate_id_rejects_uppercase() {
        assert!(validate_id("Bad-ID").is_err());
        assert!(validate_id("good-id-1").is_ok());
    }
}
