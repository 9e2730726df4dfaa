//! Shared error taxonomy translated into the HTTP error envelope.
//!
//! Library code keeps using `anyhow::Result` with `.context(...)` at
//! fallible boundaries; handler code converts the richest available
//! error into [`GatewayError`] right before responding.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// One of the error kinds from the taxonomy. Not exhaustive over every
/// Rust error type — a classification handlers assign deliberately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    AuthMissing,
    Provider,
    Connection,
    Timeout,
    Persistence,
    Internal,
}

impl ErrorKind {
    fn status(self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::AuthMissing => StatusCode::UNAUTHORIZED,
            ErrorKind::Provider => StatusCode::BAD_GATEWAY,
            ErrorKind::Connection => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Persistence => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Status family a captured upstream status code maps to (§7): an
    /// upstream 503/504 is passed through as-is, everything else
    /// upstream collapses to 502 since `G`/`W` themselves reached the
    /// upstream fine but got back something it can't vouch for.
    fn provider_status(upstream: Option<u16>) -> StatusCode {
        match upstream {
            Some(503) => StatusCode::SERVICE_UNAVAILABLE,
            Some(504) | Some(408) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    fn type_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::NotFound => "not_found_error",
            ErrorKind::AuthMissing => "authentication_error",
            ErrorKind::Provider => "provider_error",
            ErrorKind::Connection => "connection_error",
            ErrorKind::Timeout => "timeout_error",
            ErrorKind::Persistence => "internal_error",
            ErrorKind::Internal => "internal_error",
        }
    }
}

/// A gateway error ready to be rendered as the `{error: {...}, requestId}`
/// envelope (§6.1, §7).
#[derive(Debug)]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub message: String,
    pub provider: Option<String>,
    pub code: Option<String>,
    pub request_id: String,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider: None,
            code: None,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn auth_missing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthMissing, message)
    }

    pub fn provider(provider: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        let mut e = Self::new(ErrorKind::Provider, message);
        e.provider = Some(provider.into());
        e.code = status.map(|s| s.to_string());
        e
    }

    pub fn connection(provider: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        let mut e = Self::new(ErrorKind::Connection, message);
        e.provider = Some(provider.into());
        e.code = Some(code.into());
        e
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Persistence, message)
    }

    pub fn internal(err: anyhow::Error) -> Self {
        tracing::error!(error = format!("{err:#}"), "internal error");
        Self::new(ErrorKind::Internal, "internal error")
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
    #[serde(rename = "requestId")]
    request_id: String,
}

#[derive(Serialize)]
struct ErrorDetail {
    message: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if self.kind == ErrorKind::Validation {
            tracing::info!(message = %self.message, "validation error");
        } else {
            tracing::warn!(kind = ?self.kind, message = %self.message, "request failed");
        }

        let status = if self.kind == ErrorKind::Provider {
            let upstream = self.code.as_deref().and_then(|c| c.parse::<u16>().ok());
            ErrorKind::provider_status(upstream)
        } else {
            self.kind.status()
        };
        let body = ErrorBody {
            error: ErrorDetail {
                message: self.message,
                kind: self.kind.type_str().to_string(),
                code: self.code,
                provider: self.provider,
            },
            request_id: self.request_id.clone(),
        };

        let mut response = (status, Json(body)).into_response();
        if let Ok(value) = self.request_id.parse() {
            response.headers_mut().insert("x-request-id", value);
        }
        response
    }
}

impl From<rusqlite::Error> for GatewayError {
    fn from(err: rusqlite::Error) -> Self {
        GatewayError::persistence(format!("{err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_with_no_upstream_status_falls_back_to_bad_gateway() {
        let err = GatewayError::provider("p1", None, "boom");
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn provider_error_passes_through_upstream_service_unavailable() {
        let err = GatewayError::provider("p1", Some(503), "overloaded");
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn provider_error_maps_upstream_timeout_family_to_gateway_timeout() {
        let err = GatewayError::provider("p1", Some(504), "timed out");
        assert_eq!(err.into_response().status(), StatusCode::GATEWAY_TIMEOUT);
        let err = GatewayError::provider("p1", Some(408), "request timeout");
        assert_eq!(err.into_response().status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn provider_error_with_ordinary_upstream_4xx_collapses_to_bad_gateway() {
        let err = GatewayError::provider("p1", Some(400), "bad request upstream");
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }
}
