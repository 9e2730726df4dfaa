use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::{requests as req_repo, sessions as session_repo};
use crate::error::GatewayError;

use super::super::SharedState;
use super::Pagination;

#[derive(Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_recent_limit")]
    pub limit: i64,
}
fn default_recent_limit() -> i64 {
    20
}

/// `GET /api/activity/recent?limit=20` — most recent requests, newest first.
pub async fn activity_recent(State(state): State<SharedState>, Query(q): Query<RecentQuery>) -> Result<Json<Value>, GatewayError> {
    if !(1..=1000).contains(&q.limit) {
        return Err(GatewayError::validation("limit must be between 1 and 1000"));
    }
    let items = state.db.with_conn(|c| req_repo::list_requests(c, q.limit, 0))?;
    Ok(Json(json!({"requests": items})))
}

/// `GET /api/activity/stats` — coarse counters.
pub async fn activity_stats(State(state): State<SharedState>) -> Result<Json<Value>, GatewayError> {
    let (requests, responses, sessions) = state.db.with_conn(|c| {
        Ok((req_repo::count_requests(c)?, req_repo::count_responses(c)?, c.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get::<_, i64>(0))?))
    })?;
    Ok(Json(json!({"requestsTotal": requests, "responsesTotal": responses, "sessionsActive": sessions})))
}

pub async fn requests(State(state): State<SharedState>, Query(p): Query<Pagination>) -> Result<Json<Value>, GatewayError> {
    p.validate()?;
    let items = state.db.with_conn(|c| req_repo::list_requests(c, p.limit, p.offset))?;
    let total = state.db.with_conn(|c| req_repo::count_requests(c))?;
    let has_more = p.offset + items.len() as i64 < total;
    Ok(Json(json!({"requests": items, "total": total, "hasMore": has_more})))
}

pub async fn responses(State(state): State<SharedState>, Query(p): Query<Pagination>) -> Result<Json<Value>, GatewayError> {
    p.validate()?;
    let items = state.db.with_conn(|c| req_repo::list_responses(c, p.limit, p.offset))?;
    let total = state.db.with_conn(|c| req_repo::count_responses(c))?;
    let has_more = p.offset + items.len() as i64 < total;
    Ok(Json(json!({"responses": items, "total": total, "hasMore": has_more})))
}

pub async fn sessions(State(state): State<SharedState>, Query(p): Query<Pagination>) -> Result<Json<Value>, GatewayError> {
    p.validate()?;
    let items = state.db.with_conn(|c| session_repo::list(c, p.limit, p.offset))?;
    let has_more = items.len() as i64 == p.limit;
    Ok(Json(json!({"sessions": items, "hasMore": has_more})))
}
