//! Model + ProviderModel repository (§3, §6.1).

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub capabilities: Vec<String>,
}

pub fn create(conn: &Connection, id: &str, name: &str, description: Option<&str>, capabilities: &[String]) -> rusqlite::Result<Model> {
    let caps_json = serde_json::to_string(capabilities).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        "INSERT INTO models (id, name, description, capabilities) VALUES (?1, ?2, ?3, ?4)",
        params![id, name, description, caps_json],
    )?;
    Ok(Model { id: id.to_string(), name: name.to_string(), description: description.map(String::from), capabilities: capabilities.to_vec() })
}

pub fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<Model>> {
    conn.query_row(
        "SELECT id, name, description, capabilities FROM models WHERE id = ?1",
        params![id],
        row_to_model,
    )
    .optional()
}

pub fn list(conn: &Connection, capability_filter: Option<&str>, provider_filter: Option<&str>) -> rusqlite::Result<Vec<Model>> {
    let all: Vec<Model> = {
        let mut stmt = if let Some(provider_id) = provider_filter {
            conn.prepare(
                "SELECT m.id, m.name, m.description, m.capabilities FROM models m
                 JOIN provider_models pm ON pm.model_id = m.id WHERE pm.provider_id = ?1 ORDER BY m.id",
            )?
        } else {
            conn.prepare("SELECT id, name, description, capabilities FROM models ORDER BY id")?
        };
        let rows = if let Some(provider_id) = provider_filter {
            stmt.query_map(params![provider_id], row_to_model)?.collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt.query_map([], row_to_model)?.collect::<rusqlite::Result<Vec<_>>>()?
        };
        rows
    };

    Ok(match capability_filter {
        Some(cap) => all.into_iter().filter(|m| m.capabilities.iter().any(|c| c == cap)).collect(),
        None => all,
    })
}

pub fn update(conn: &Connection, id: &str, name: Option<&str>, description: Option<Option<&str>>, capabilities: Option<&[String]>) -> rusqlite::Result<Option<Model>> {
    let Some(mut model) = get(conn, id)? else { return Ok(None) };
    if let Some(name) = name {
        model.name = name.to_string();
    }
    if let Some(description) = description {
        model.description = description.map(String::from);
    }
    if let Some(caps) = capabilities {
        model.capabilities = caps.to_vec();
    }
    let caps_json = serde_json::to_string(&model.capabilities).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        "UPDATE models SET name=?2, description=?3, capabilities=?4 WHERE id=?1",
        params![id, model.name, model.description, caps_json],
    )?;
    Ok(Some(model))
}

pub fn delete(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    Ok(conn.execute("DELETE FROM models WHERE id = ?1", params![id])? > 0)
}

fn row_to_model(row: &rusqlite::Row) -> rusqlite::Result<Model> {
    let caps_json: String = row.get(3)?;
    let capabilities: Vec<String> = serde_json::from_str(&caps_json).unwrap_or_default();
    Ok(Model { id: row.get(0)?, name: row.get(1)?, description: row.get(2)?, capabilities })
}

// --- ProviderModel link ---

pub fn link(conn: &Connection, provider_id: &str, model_id: &str, is_default: bool) -> rusqlite::Result<()> {
    if is_default {
        conn.execute(
            "UPDATE provider_models SET is_default = 0 WHERE provider_id = ?1",
            params![provider_id],
        )?;
    }
    conn.execute(
        "INSERT INTO provider_models (provider_id, model_id, is_default) VALUES (?1, ?2, ?3)
         ON CONFLICT(provider_id, model_id) DO UPDATE SET is_default=excluded.is_default",
        params![provider_id, model_id, is_default as i64],
    )?;
    Ok(())
}

pub fn unlink(conn: &Connection, provider_id: &str, model_id: &str) -> rusqlite::Result<bool> {
    Ok(conn.execute(
        "DELETE FROM provider_models WHERE provider_id = ?1 AND model_id = ?2",
        params![provider_id, model_id],
    )? > 0)
}
