pub mod credentials;
pub mod models;
pub mod observability;
pub mod providers;
pub mod proxy;
pub mod settings;

use axum::extract::Query;
use serde::Deserialize;

use crate::error::GatewayError;

/// Shared pagination query params (§6.1: `limit` 1-1000, `offset` >= 0).
#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

impl Pagination {
    pub fn validate(&self) -> Result<(), GatewayError> {
        if !(1..=1000).contains(&self.limit) {
            return Err(GatewayError::validation("limit must be between 1 and 1000"));
        }
        if self.offset < 0 {
            return Err(GatewayError::validation("offset must be >= 0"));
        }
        Ok(())
    }
}

pub type PaginationQuery = Query<Pagination>;
